//! POST /run: dispatch an autoplan run through the fallback ladder

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::flowlang::is_valid_plan_name;
use crate::tasks::{DispatchError, DispatchMode, Dispatched, RunParams};
use crate::AppState;

/// Query string of POST /run
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunQuery {
    pub mode: Option<String>,
    pub plan: Option<String>,
    pub limit: Option<i64>,
    pub window_min: Option<i64>,
    pub write_audit: Option<bool>,
    pub dry: Option<bool>,
}

impl RunQuery {
    fn params(&self) -> RunParams {
        RunParams {
            plan: self.plan.clone(),
            limit: self.limit,
            window_min: self.window_min,
            write_audit: self.write_audit,
            dry: self.dry,
        }
    }
}

/// POST /run?mode=chain|kick&limit=&window_min=
///
/// An optional JSON body `{limit, window_min, write_audit, dry}` overrides the query.
pub async fn run(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
    body: Bytes,
) -> ApiResult<Json<Dispatched>> {
    let mode = DispatchMode::parse(query.mode.as_deref().unwrap_or("chain"))
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown mode: {}", query.mode.as_deref().unwrap_or(""))))?;

    let mut params = query.params();
    if !body.iter().all(u8::is_ascii_whitespace) {
        let overrides: RunParams = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        params = params.overridden_by(overrides);
    }
    if let Some(limit) = params.limit {
        if limit < 1 {
            return Err(ApiError::BadRequest(format!("limit must be positive, got {}", limit)));
        }
    }

    if let Some(plan) = params.plan.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        if !is_valid_plan_name(plan) {
            return Err(ApiError::BadRequest(format!("Invalid plan name: {}", plan)));
        }
    }

    match state.dispatcher.dispatch(mode, &params).await {
        Ok(dispatched) => Ok(Json(dispatched)),
        Err(e @ DispatchError::Exhausted { .. }) => {
            let message = e.to_string();
            *state.last_error.write().await = Some(message.clone());
            Err(ApiError::Unavailable(message))
        }
    }
}

pub fn run_routes() -> Router<AppState> {
    Router::new().route("/run", post(run))
}
