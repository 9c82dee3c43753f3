use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod workflows;

pub use workflows::workflow_routes;

/// Store health plus the most recent background job run.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let last_job_run = state.job_log.latest().await;

    if state.store.health_check().await {
        (
            StatusCode::OK,
            Json(json!({"status": "healthy", "service": "verigrade-workflows", "lastJobRun": last_job_run})),
        )
    } else {
        tracing::error!("Store health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy", "service": "verigrade-workflows", "lastJobRun": last_job_run})),
        )
    }
}
