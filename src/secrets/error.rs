use crate::error::{ApiError, ErrorKind, ExternalSystem};

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("secret store is not configured")]
    NotConfigured,

    #[error("invalid secret store address: {0}")]
    InvalidAddress(String),

    #[error("secret store authentication failed: {0}")]
    Unauthenticated(String),

    #[error("invalid secret payload: {0}")]
    Validation(String),

    #[error("secret store {op} request failed: {source}")]
    Request {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("secret store {op} returned {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },
}

impl SecretsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotConfigured
            | Self::InvalidAddress(_)
            | Self::Unauthenticated(_)
            | Self::Request { .. }
            | Self::Status { .. } => ErrorKind::External(ExternalSystem::SecretStore),
        }
    }
}

impl From<SecretsError> for ApiError {
    fn from(err: SecretsError) -> Self {
        match err {
            SecretsError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            _ => Self::classified(err.kind(), err.to_string()),
        }
    }
}
