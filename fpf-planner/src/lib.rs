//! fpf-planner library interface
//!
//! Autoplan pipeline, geocoding and routing enrichment, the task queue
//! surface and the thin HTTP boundary. Exposed as a library for the binary
//! and for integration tests.

pub mod api;
pub mod autoplan;
pub mod config;
pub mod error;
pub mod flowlang;
pub mod geo;
pub mod observability;
pub mod routing;
pub mod tasks;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use flowlang::SettingsCache;
use sqlx::SqlitePool;
use std::sync::Arc;
use tasks::{Broker, Dispatcher};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: Arc<SettingsCache>,
    pub broker: Arc<dyn Broker>,
    pub dispatcher: Arc<Dispatcher>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: Arc<SettingsCache>, broker: Arc<dyn Broker>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&broker), Arc::clone(&settings)));
        Self {
            db,
            settings,
            broker,
            dispatcher,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::run_routes())
        .merge(api::result_routes())
        .merge(api::config_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
