use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use super::AppState;
use crate::error::ApiError;
use crate::renderer::{self, JobSpec};

pub fn router() -> Router<AppState> {
    Router::new().route("/generate_job", post(generate_job))
}

async fn generate_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<impl IntoResponse, ApiError> {
    let hcl = renderer::render_job(&spec, &state.orchestrator.render_context())?;
    tracing::debug!(job = %spec.job_name, "job rendered");
    Ok(Json(serde_json::json!({ "success": true, "hcl": hcl })))
}
