//! GET /config: resolved settings of the active plan

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::flowlang::Settings;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigQuery {
    /// Another plan to inspect instead of the active one
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub active_plan: String,
    /// Resolved settings, including the source of every field
    pub settings: Settings,
}

pub async fn get_config(State(state): State<AppState>, Query(query): Query<ConfigQuery>) -> Json<ConfigResponse> {
    let settings = state.settings.get_or_active(query.plan.as_deref()).await;
    Json(ConfigResponse {
        active_plan: state.settings.active_plan().to_string(),
        settings: (*settings).clone(),
    })
}

pub fn config_routes() -> Router<AppState> {
    Router::new().route("/config", get(get_config))
}
