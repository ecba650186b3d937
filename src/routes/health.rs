use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = state
        .db()
        .ok()
        .and_then(|mut conn| sql_query("SELECT 1").execute(&mut conn).ok());

    match database {
        Some(_) => (StatusCode::OK, Json(json!({ "status": "ok", "database": "ok" }))),
        None => {
            warn!("health check could not reach the database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
