use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{CatalogError, CatalogReconciler, ReconcileOptions, Reconciliation};
use crate::config::Config;
use crate::error::{ApiError, ErrorKind};
use crate::gitops::{self, GitError, GitPublisher, PublishOutcome, PublishRequest};
use crate::identifier::{self, ServiceIdentifier};
use crate::renderer::{self, JobSpec, RenderContext, RenderError};
use crate::repo_map::{self, RepoMapError, RepoMapSource, RepositoryMap};
use crate::secrets::publisher::{clean_path, validate_flat_map};
use crate::secrets::{SecretPublisher, SecretRequest, SecretWrite, SecretsError, VaultClient};

/// Last segment of `<id>/database`, where role credentials live.
const CREDENTIALS_SEGMENT: &str = "database";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Full pipeline input. Each sub-request is optional and reported on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    pub service_name: String,
    #[serde(default)]
    pub database: Option<DatabaseRequest>,
    #[serde(default)]
    pub secrets: Option<SecretInput>,
    #[serde(default)]
    pub publish: Option<PublishInput>,
}

/// Presence asks for catalog reconciliation. `name` overrides the service
/// name used to derive the database and role.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecretInput {
    Yaml { vault_yaml: String },
    Direct(SecretRequest),
}

impl SecretInput {
    pub fn into_request(self) -> Result<SecretRequest, SecretsError> {
        match self {
            Self::Yaml { vault_yaml } => SecretRequest::from_yaml(&vault_yaml),
            Self::Direct(req) => Ok(req),
        }
    }
}

/// Either pre-rendered `content` or a `job` to render first.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishInput {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub job: Option<JobSpec>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one pipeline step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl StepReport {
    pub fn ok(message: impl Into<String>, detail: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            detail,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(kind),
            detail: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub service_name: String,
    pub identifier: String,
    /// True when every requested step succeeded.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<StepReport>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid service name for publishing: {0:?}")]
    InvalidServiceName(String),

    #[error("no repository configured for service {0:?}")]
    NoRepository(String),

    #[error("publish request needs either content or a job to render")]
    MissingContent,

    #[error(transparent)]
    RepoMap(#[from] RepoMapError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Git(#[from] GitError),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidServiceName(_) | Self::NoRepository(_) | Self::MissingContent => {
                ErrorKind::Validation
            }
            Self::RepoMap(e) => e.kind(),
            Self::Render(e) => e.kind(),
            Self::Git(e) => e.kind(),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        Self::classified(err.kind(), err.to_string())
    }
}

/// Database step result, including the hand-off of the role password to
/// the secret store.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseOutcome {
    #[serde(flatten)]
    pub reconciliation: Reconciliation,
    /// Secret path (under the mount) holding the role's credentials.
    pub credentials_path: String,
    /// Whether this run wrote new credentials there.
    pub credentials_written: bool,
}

impl DatabaseOutcome {
    /// Sentence describing a password rotation, if one happened.
    pub fn rotation_note(&self) -> Option<String> {
        let rec = &self.reconciliation;
        rec.password_rotated.then(|| {
            format!(
                "Role {} had no stored credentials; password rotated and stored at {}.",
                rec.role, self.credentials_path
            )
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("credential store unavailable; catalog left untouched: {0}")]
    CredentialStore(#[source] SecretsError),

    #[error("role {role} password was set but could not be stored (a re-run rotates it): {source}")]
    CredentialHandoff {
        role: String,
        #[source]
        source: SecretsError,
    },
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Catalog(e) => e.kind(),
            Self::CredentialStore(source) | Self::CredentialHandoff { source, .. } => {
                source.kind()
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match &err {
            DatabaseError::CredentialStore(SecretsError::NotConfigured) => {
                Self::ServiceUnavailable(err.to_string())
            }
            _ => Self::classified(err.kind(), err.to_string()),
        }
    }
}

/// Published job: the repository it landed in and what happened.
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub repo_url: String,
    pub branch: String,
    pub target_path: String,
    #[serde(flatten)]
    pub outcome: PublishOutcome,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Sequences catalog, secret store and git publishing for one service.
///
/// Holds no per-request state; concurrent requests for the same service are
/// not serialized and rely on catalog uniqueness and remote push atomicity.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    catalog: CatalogReconciler,
    repo_maps: Arc<dyn RepoMapSource>,
    git: GitPublisher,
    vault: Option<VaultClient>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        catalog: CatalogReconciler,
        repo_maps: Arc<dyn RepoMapSource>,
        git: GitPublisher,
        vault: Option<VaultClient>,
    ) -> Self {
        Self {
            config,
            catalog,
            repo_maps,
            git,
            vault,
        }
    }

    pub fn render_context(&self) -> RenderContext {
        RenderContext {
            registries: RepositoryMap::from_pairs(self.config.registry_aliases.iter().cloned()),
            registry_user: self.config.registry_username.clone(),
            registry_pass: self.config.registry_password.clone(),
            secret_mount: self.config.secret_mount.clone(),
        }
    }

    /// Authenticated publisher, or `NotConfigured` when no store is set up.
    async fn secret_publisher(&self) -> Result<SecretPublisher, SecretsError> {
        let client = self.vault.clone().ok_or(SecretsError::NotConfigured)?;
        SecretPublisher::connect(client).await
    }

    /// Run every requested step. Steps never roll each other back.
    #[tracing::instrument(skip(self, req), fields(service = %req.service_name))]
    pub async fn provision(&self, req: ProvisionRequest) -> ProvisionReport {
        let database = match &req.database {
            Some(db) => {
                let name = db.name.as_deref().unwrap_or(&req.service_name);
                Some(match self.prepare_database(name).await {
                    Ok(outcome) => database_report(&outcome),
                    Err(e) => StepReport::failed(e.kind(), e.to_string()),
                })
            }
            None => None,
        };

        let secrets = match req.secrets {
            Some(input) => Some(match self.deploy_service_secrets(&req.service_name, input).await {
                Ok(write) => StepReport::ok(
                    format!("Vault secrets created at {}", write.path),
                    serde_json::to_value(&write).unwrap_or(Value::Null),
                ),
                Err(e) => StepReport::failed(e.kind(), e.to_string()),
            }),
            None => None,
        };

        let publish = match req.publish {
            Some(input) => Some(match self.publish_input(&req.service_name, input).await {
                Ok(result) => StepReport::ok(
                    result.outcome.message(),
                    serde_json::to_value(&result).unwrap_or(Value::Null),
                ),
                Err(e) => StepReport::failed(e.kind(), e.to_string()),
            }),
            None => None,
        };

        let success = [&database, &secrets, &publish]
            .into_iter()
            .flatten()
            .all(|step| step.success);

        if !success {
            tracing::warn!("provisioning finished with failed steps");
        }

        ProvisionReport {
            identifier: identifier::normalize(&req.service_name).to_string(),
            service_name: req.service_name,
            success,
            database,
            secrets,
            publish,
        }
    }

    /// Reconcile the catalog and keep the role's credentials in the secret
    /// store at `<mount>/<id>/database`.
    ///
    /// Nothing is touched without a reachable store. A role whose stored
    /// credentials are missing gets a fresh password, so a run that failed
    /// after setting a password is healed by the next one.
    pub async fn prepare_database(&self, name: &str) -> Result<DatabaseOutcome, DatabaseError> {
        let id = identifier::normalize(name);
        if id.is_empty() {
            return Err(CatalogError::InvalidName(name.to_owned()).into());
        }
        let credentials_path = format!("{}/{CREDENTIALS_SEGMENT}", id.role_name());
        let mount = &self.config.secret_mount;

        let publisher = self
            .secret_publisher()
            .await
            .map_err(DatabaseError::CredentialStore)?;
        publisher
            .ensure_mount(mount)
            .await
            .map_err(DatabaseError::CredentialStore)?;
        let stored = publisher
            .secret_exists(mount, &credentials_path)
            .await
            .map_err(DatabaseError::CredentialStore)?;

        let options = ReconcileOptions {
            rotate_password: !stored,
        };
        let reconciliation = self.catalog.reconcile_with(name, options).await?;

        let credentials_written = match &reconciliation.role_password {
            Some(password) => {
                let data = serde_json::json!({
                    "username": reconciliation.role,
                    "password": password,
                    "database": reconciliation.database,
                });
                publisher
                    .write_secret(mount, &credentials_path, &data)
                    .await
                    .map_err(|source| DatabaseError::CredentialHandoff {
                        role: reconciliation.role.clone(),
                        source,
                    })?;
                true
            }
            None => false,
        };

        Ok(DatabaseOutcome {
            reconciliation,
            credentials_path,
            credentials_written,
        })
    }

    /// Ensure the shared mount exists and replace the secret at the request path.
    ///
    /// `<x>/database` paths hold catalog credentials and are refused.
    pub async fn deploy_secrets(&self, input: SecretInput) -> Result<SecretWrite, SecretsError> {
        let req = input.into_request()?;
        let path = clean_path(&req.path)?;
        if is_credentials_path(&path) {
            return Err(SecretsError::Validation(format!(
                "secret path {path:?} is reserved for database credentials"
            )));
        }
        // Reject bad payloads before authenticating.
        validate_flat_map(&req.env)?;
        self.store_secret(&path, &req.env).await
    }

    /// [`Self::deploy_secrets`] restricted to the service's own `<id>/` prefix.
    pub async fn deploy_service_secrets(
        &self,
        service_name: &str,
        input: SecretInput,
    ) -> Result<SecretWrite, SecretsError> {
        let id = identifier::normalize(service_name);
        let req = input.into_request()?;
        check_owned_path(&id, &req.path)?;
        self.deploy_secrets(SecretInput::Direct(req)).await
    }

    async fn store_secret(&self, path: &str, data: &Value) -> Result<SecretWrite, SecretsError> {
        let publisher = self.secret_publisher().await?;
        publisher.ensure_mount(&self.config.secret_mount).await?;
        publisher
            .write_secret(&self.config.secret_mount, path, data)
            .await
    }

    async fn publish_input(
        &self,
        service_name: &str,
        input: PublishInput,
    ) -> Result<PublishResult, PublishError> {
        let content = match (input.content, input.job) {
            (Some(content), _) => content,
            (None, Some(job)) => renderer::render_job(&job, &self.render_context())?,
            (None, None) => return Err(PublishError::MissingContent),
        };
        self.publish_job(service_name, &content, input.branch.as_deref())
            .await
    }

    /// Resolve the owning repository (fresh alias table every call) and publish
    /// `<jobs_dir>/<service_name>.hcl`.
    pub async fn publish_job(
        &self,
        service_name: &str,
        content: &str,
        branch: Option<&str>,
    ) -> Result<PublishResult, PublishError> {
        let name = service_name.trim();
        if name.is_empty() || name.contains(['/', '\\', '\0']) || name.contains("..") {
            return Err(PublishError::InvalidServiceName(service_name.to_owned()));
        }

        let map = self.repo_maps.fetch().await?;
        let repo_url = repo_map::resolve(name, &map)
            .ok_or_else(|| PublishError::NoRepository(name.to_owned()))?
            .to_owned();

        let request = PublishRequest {
            repo_url,
            branch: branch.unwrap_or(&self.config.default_branch).to_owned(),
            target_path: gitops::job_file_path(&self.config.jobs_dir, name),
            content: content.to_owned(),
            commit_message: gitops::job_commit_message(name),
        };

        let outcome = self.git.publish(&request).await?;
        Ok(PublishResult {
            repo_url: request.repo_url,
            branch: request.branch,
            target_path: request.target_path,
            outcome,
        })
    }
}

fn is_credentials_path(path: &str) -> bool {
    matches!(path.split_once('/'), Some((_, rest)) if rest == CREDENTIALS_SEGMENT)
}

/// Require `path` to sit under `<id>/`.
fn check_owned_path(id: &ServiceIdentifier, path: &str) -> Result<(), SecretsError> {
    if id.is_empty() {
        return Err(SecretsError::Validation(
            "service name normalizes to an empty identifier".into(),
        ));
    }
    let path = clean_path(path)?;
    match path.split_once('/') {
        Some((owner, _)) if owner == id.as_str() => Ok(()),
        _ => Err(SecretsError::Validation(format!(
            "secret path {path:?} is outside {}/",
            id.as_str()
        ))),
    }
}

fn database_report(outcome: &DatabaseOutcome) -> StepReport {
    let rec = &outcome.reconciliation;
    let mut message = if rec.database_created {
        format!("Database {} created.", rec.database)
    } else {
        format!("Database {} already exists; grants confirmed.", rec.database)
    };
    if let Some(note) = outcome.rotation_note() {
        message.push(' ');
        message.push_str(&note);
    }
    StepReport::ok(message, serde_json::to_value(outcome).unwrap_or(Value::Null))
}
