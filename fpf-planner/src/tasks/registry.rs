//! Named task handlers and the context they run with

use super::broker::Broker;
use crate::autoplan::AutoplanPipeline;
use crate::config::GeocoderConfig;
use crate::flowlang::SettingsCache;
use crate::geo::GeoResolver;
use crate::observability::EventSink;
use crate::routing::RoutingEnricher;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a task handler may use; built once per process
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: SqlitePool,
    pub settings: Arc<SettingsCache>,
    pub autoplan: Arc<AutoplanPipeline>,
    pub routing: Arc<RoutingEnricher>,
    /// `None` when no geocoder API key is configured
    pub geo: Option<Arc<GeoResolver>>,
    pub geocoder: GeocoderConfig,
    pub sink: Option<Arc<EventSink>>,
}

/// Per-invocation context
#[derive(Clone)]
pub struct TaskContext {
    pub worker: Arc<WorkerContext>,
    /// Broker running this task, for follow-up enqueues
    pub broker: Arc<dyn Broker>,
    pub task_id: Uuid,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext, args: Value) -> anyhow::Result<Value>;
}

#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            tracing::warn!(task = name, "Task handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
