use crate::error::{ApiError, ErrorKind, ExternalSystem};

use super::Step;

/// SQLSTATE `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";
/// SQLSTATE `duplicate_object` (roles).
const DUPLICATE_OBJECT: &str = "42710";
/// SQLSTATE `unique_violation`; raised by racing `CREATE DATABASE`/`CREATE ROLE`
/// when both pass the catalog's own existence check.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("service name {0:?} normalizes to an empty identifier")]
    InvalidName(String),

    #[error("catalog connection to {database} failed: {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{step} failed: {source}")]
    Statement {
        step: Step,
        #[source]
        source: sqlx::Error,
    },

    #[error("{step} raced with a concurrent create of {name}")]
    AlreadyExists { step: Step, name: String },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName(_) => ErrorKind::Validation,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::Connect { .. } | Self::Statement { .. } => {
                ErrorKind::External(ExternalSystem::Catalog)
            }
        }
    }

    /// Classify a failed statement. Duplicate-object errors on a create step
    /// mean another caller created the same resource between our existence
    /// check and the create.
    pub(crate) fn from_statement(step: Step, name: &str, source: sqlx::Error) -> Self {
        let duplicate = match &source {
            sqlx::Error::Database(db_err) => matches!(
                db_err.code().as_deref(),
                Some(DUPLICATE_DATABASE | DUPLICATE_OBJECT | UNIQUE_VIOLATION)
            ),
            _ => false,
        };

        if duplicate && step.is_create() {
            Self::AlreadyExists {
                step,
                name: name.to_owned(),
            }
        } else {
            Self::Statement { step, source }
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        Self::classified(err.kind(), err.to_string())
    }
}
