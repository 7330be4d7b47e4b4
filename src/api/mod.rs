pub mod database;
pub mod git;
pub mod jobs;
pub mod provision;
pub mod secrets;

use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::Orchestrator;

/// Request bodies are small JSON/YAML documents.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(jobs::router())
        .merge(database::router())
        .merge(secrets::router())
        .merge(git::router())
        .merge(provision::router())
}

/// Full application: health check, API routes and the HTTP layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
