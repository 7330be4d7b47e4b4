use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub job_name: String,
    #[serde(default, rename = "hclOutput", alias = "hcl")]
    pub hcl_output: String,
    #[serde(default)]
    pub branch: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/deploy_git", post(deploy))
}

async fn deploy(
    State(state): State<AppState>,
    Json(body): Json<DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.job_name.trim().is_empty() || body.hcl_output.is_empty() {
        return Err(ApiError::BadRequest(
            "job_name and hclOutput required".into(),
        ));
    }

    let result = state
        .orchestrator
        .publish_job(&body.job_name, &body.hcl_output, body.branch.as_deref())
        .await?;

    let mut response = serde_json::to_value(&result).map_err(anyhow::Error::from)?;
    response["success"] = true.into();
    response["message"] = result.outcome.message().into();
    Ok(Json(response))
}
