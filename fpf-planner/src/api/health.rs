//! GET /health: database, broker and critical task registration

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::tasks::names::CRITICAL_TASKS;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub db_ok: bool,
    pub broker_ok: bool,
    /// Critical task names the broker cannot run
    pub missing_tasks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let db_ok = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check database probe failed");
            false
        }
    };

    let broker_ok = match state.broker.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check broker ping failed");
            false
        }
    };

    let registered: BTreeSet<String> = state.broker.registered().into_iter().collect();
    let missing_tasks: Vec<String> = CRITICAL_TASKS
        .iter()
        .filter(|name| !registered.contains(**name))
        .map(|name| name.to_string())
        .collect();

    let healthy = db_ok && broker_ok && missing_tasks.is_empty();
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        module: "fpf-planner".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        db_ok,
        broker_ok,
        missing_tasks,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
