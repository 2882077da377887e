use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db_ok = {
        let db = state.db();
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    };

    if db_ok {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        tracing::error!("health check could not reach the database");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded"})),
        )
    }
}
