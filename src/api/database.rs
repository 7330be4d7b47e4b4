use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::orchestrator::DatabaseRequest;

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    #[serde(default)]
    pub database: Option<DatabaseRequest>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/db_prepare", post(prepare))
}

async fn prepare(
    State(state): State<AppState>,
    Json(body): Json<PrepareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body
        .database
        .and_then(|db| db.name)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("database.name is required".into()))?;

    let outcome = state.orchestrator.prepare_database(&name).await?;
    let rec = &outcome.reconciliation;
    let mut message = if rec.database_created {
        format!("Database {} created.", rec.database)
    } else {
        format!("Database {} already exists.", rec.database)
    };
    if let Some(note) = outcome.rotation_note() {
        message.push(' ');
        message.push_str(&note);
    }

    let mut body = serde_json::to_value(&outcome).map_err(anyhow::Error::from)?;
    body["success"] = true.into();
    body["message"] = message.into();
    Ok(Json(body))
}
