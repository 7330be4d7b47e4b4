use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use super::AppState;
use crate::error::ApiError;
use crate::orchestrator::SecretInput;

pub fn router() -> Router<AppState> {
    Router::new().route("/deploy_vault", post(deploy))
}

async fn deploy(
    State(state): State<AppState>,
    Json(input): Json<SecretInput>,
) -> Result<impl IntoResponse, ApiError> {
    let write = state.orchestrator.deploy_secrets(input).await?;

    let mut body = serde_json::to_value(&write).map_err(anyhow::Error::from)?;
    body["success"] = true.into();
    body["message"] = format!("Vault secrets created at {}", write.path).into();
    Ok(Json(body))
}
