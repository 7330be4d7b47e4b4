use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorKind, ExternalSystem};

/// One alias-table row: a service-name fragment and the repository that owns
/// services containing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAlias {
    pub alias: String,
    pub url: String,
}

/// Ordered alias table. Order is significant: the first matching alias wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryMap(Vec<RepoAlias>);

impl RepositoryMap {
    pub fn new(entries: Vec<RepoAlias>) -> Self {
        Self(entries)
    }

    pub fn from_pairs<A, U>(pairs: impl IntoIterator<Item = (A, U)>) -> Self
    where
        A: Into<String>,
        U: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(alias, url)| RepoAlias {
                    alias: alias.into(),
                    url: url.into(),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[RepoAlias] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Return the URL of the first alias (in table order) that appears, ignoring
/// case, inside `service_name`. Empty aliases never match.
pub fn resolve<'a>(service_name: &str, map: &'a RepositoryMap) -> Option<&'a str> {
    let service = service_name.to_lowercase();
    map.0
        .iter()
        .find(|entry| !entry.alias.is_empty() && service.contains(&entry.alias.to_lowercase()))
        .map(|entry| entry.url.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum RepoMapError {
    #[error("failed to read repository map {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("repository map {} is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl RepoMapError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::External(ExternalSystem::RepoMapSource)
    }
}

impl From<RepoMapError> for ApiError {
    fn from(err: RepoMapError) -> Self {
        Self::classified(err.kind(), err.to_string())
    }
}

/// Where the alias table comes from. Queried on every resolution; no caching.
#[async_trait]
pub trait RepoMapSource: Send + Sync {
    async fn fetch(&self) -> Result<RepositoryMap, RepoMapError>;
}

/// Fixed table, for tests and single-repository deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticRepoMapSource(pub RepositoryMap);

#[async_trait]
impl RepoMapSource for StaticRepoMapSource {
    async fn fetch(&self) -> Result<RepositoryMap, RepoMapError> {
        Ok(self.0.clone())
    }
}

/// YAML file re-read on every fetch, so edits apply without a restart.
///
/// Accepts either a list of `{alias, url}` rows or a mapping of
/// `alias: url`; both keep their document order.
#[derive(Debug, Clone)]
pub struct FileRepoMapSource {
    path: PathBuf,
}

impl FileRepoMapSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(&self, raw: &str) -> Result<RepositoryMap, RepoMapError> {
        let malformed = |reason: String| RepoMapError::Malformed {
            path: self.path.clone(),
            reason,
        };

        if raw.trim().is_empty() {
            return Ok(RepositoryMap::default());
        }

        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| malformed(e.to_string()))?;

        match doc {
            serde_yaml::Value::Null => Ok(RepositoryMap::default()),
            serde_yaml::Value::Sequence(_) => {
                let rows: Vec<RepoAlias> =
                    serde_yaml::from_value(doc).map_err(|e| malformed(e.to_string()))?;
                Ok(RepositoryMap::new(rows))
            }
            serde_yaml::Value::Mapping(mapping) => {
                let mut rows = Vec::with_capacity(mapping.len());
                for (key, value) in mapping {
                    let (Some(alias), Some(url)) = (key.as_str(), value.as_str()) else {
                        return Err(malformed("aliases and urls must be strings".into()));
                    };
                    rows.push(RepoAlias {
                        alias: alias.to_owned(),
                        url: url.to_owned(),
                    });
                }
                Ok(RepositoryMap::new(rows))
            }
            _ => Err(malformed("expected a list or a mapping".into())),
        }
    }
}

#[async_trait]
impl RepoMapSource for FileRepoMapSource {
    #[tracing::instrument(skip(self), fields(path = %self.path.display()), err)]
    async fn fetch(&self) -> Result<RepositoryMap, RepoMapError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RepoMapError::Read {
                path: self.path.clone(),
                source,
            })?;
        self.parse(&raw)
    }
}
