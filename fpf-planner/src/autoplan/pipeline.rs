//! Pipeline entry point shared by all phases

use super::audit_log::AuditWriter;
use crate::flowlang::{is_valid_plan_name, Settings, SettingsCache};
use crate::observability::EventSink;
use fpf_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Arguments common to every phase; unset fields fall back to the plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseRequest {
    pub plan: Option<String>,
    pub limit: Option<i64>,
    pub dry: Option<bool>,
    pub window_min: Option<i64>,
}

impl PhaseRequest {
    /// Parse task arguments, ignoring unknown keys
    pub fn from_args(args: &Value) -> Result<Self> {
        if args.is_null() {
            return Ok(Self::default());
        }
        let req: Self = serde_json::from_value(args.clone())
            .map_err(|e| Error::InvalidInput(format!("Bad phase arguments: {}", e)))?;
        if let Some(plan) = req.plan.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            if !is_valid_plan_name(plan) {
                return Err(Error::InvalidInput(format!("Invalid plan name: {}", plan)));
            }
        }
        Ok(req)
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn dry(mut self, dry: bool) -> Self {
        self.dry = Some(dry);
        self
    }
}

pub struct AutoplanPipeline {
    pub(crate) pool: SqlitePool,
    pub(crate) settings: Arc<SettingsCache>,
    pub(crate) audit: AuditWriter,
}

impl AutoplanPipeline {
    pub fn new(pool: SqlitePool, settings: Arc<SettingsCache>, sink: Option<Arc<EventSink>>) -> Self {
        let audit = AuditWriter::new(pool.clone(), sink);
        Self {
            pool,
            settings,
            audit,
        }
    }

    pub fn settings_cache(&self) -> &Arc<SettingsCache> {
        &self.settings
    }

    pub(crate) async fn settings_for(&self, req: &PhaseRequest) -> Arc<Settings> {
        self.settings.get_or_active(req.plan.as_deref()).await
    }

    /// Requested dry flag or the plan's safety switch
    pub(crate) fn is_dry(settings: &Settings, req: &PhaseRequest) -> bool {
        req.dry.unwrap_or(false) || settings.safety.dry_run
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(format!("Serialize phase result: {}", e)))
}
