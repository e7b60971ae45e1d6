use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "ok",
        "config": {
            "upstream_host": state.upstream.url().host_str(),
            "validate_checksums": config.upstream.validate_checksums,
            "pipeline_queue_capacity": config.server.pipeline_queue_capacity,
            "features": {
                "log_level": config.features.log_level,
                "thinking_budget_default": config.features.thinking_budget_default,
            }
        }
    }))
}
