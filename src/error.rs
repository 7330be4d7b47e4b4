use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// External collaborator that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalSystem {
    Catalog,
    SecretStore,
    GitRemote,
    RepoMapSource,
}

impl ExternalSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::SecretStore => "secret_store",
            Self::GitRemote => "git_remote",
            Self::RepoMapSource => "repo_map_source",
        }
    }
}

/// Classification every component error reduces to. Callers use it to decide
/// whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "system", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input. Retrying the same request cannot succeed.
    Validation,
    /// Connectivity or command failure in one of the collaborators.
    External(ExternalSystem),
    /// Push rejected or a concurrent duplicate create.
    Conflict,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Validation)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{} failure: {message}", .system.as_str())]
    BadGateway {
        system: ExternalSystem,
        message: String,
    },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Build the response error for a classified component failure.
    pub fn classified(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => Self::BadRequest(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::External(system) => Self::BadGateway { system, message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            Self::Conflict(msg) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            Self::BadGateway { system, message } => {
                tracing::warn!(system = system.as_str(), error = %message, "external system failure");
                (
                    StatusCode::BAD_GATEWAY,
                    serde_json::json!({
                        "success": false,
                        "error": message,
                        "system": system,
                    }),
                )
            }
            Self::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "error": "internal server error" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}
