use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use super::AppState;
use crate::orchestrator::ProvisionRequest;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/provision", post(provision))
}

/// Run the whole pipeline. Partial failure is reported per step with 207.
async fn provision(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> impl IntoResponse {
    let report = state.orchestrator.provision(req).await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(report))
}
