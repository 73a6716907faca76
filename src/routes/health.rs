use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::json;
use tracing::warn;

use crate::{db, state::AppState};

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = db::connection(&state.pool)
        .ok()
        .map(|mut conn| sql_query("SELECT 1").execute(&mut conn).is_ok())
        .unwrap_or(false);

    if database_ok {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        warn!("health check failed: database unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}
