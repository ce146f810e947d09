//! Append-only operational event log
//!
//! `emit` never fails: the column set of `ops_event_log` is introspected and
//! cached, statements are built from the columns that exist, a schema
//! mismatch triggers one refresh-and-retry, and anything beyond that is
//! logged and answered with id 0.
//!
//! The sink owns its own pool. Writes are autocommit statements on that pool
//! and never join a caller's transaction.

use fpf_common::db::{ColumnCache, InsertBuilder, SqlValue};
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const EVENT_TABLE: &str = "ops_event_log";

/// Column set lifetime before re-introspection
pub const COLUMN_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

pub struct EventSink {
    pool: SqlitePool,
    columns: ColumnCache,
}

impl EventSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_ttl(pool, COLUMN_TTL)
    }

    pub fn with_ttl(pool: SqlitePool, ttl: Duration) -> Self {
        Self {
            pool,
            columns: ColumnCache::new(ttl),
        }
    }

    /// Record an event; returns its id, or 0 when it could not be written
    pub async fn emit(
        &self,
        source: &str,
        event_type: &str,
        severity: Severity,
        correlation_id: Option<&str>,
        payload: Value,
    ) -> i64 {
        let first = self
            .try_emit(source, event_type, severity, correlation_id, &payload, false)
            .await;

        let err = match first {
            Ok(id) => return id,
            Err(e) => e,
        };

        if !err.is_schema_mismatch() {
            error!(source, event_type, error = %err, "Event sink write failed");
            return 0;
        }

        warn!(source, event_type, error = %err, "Event log schema changed, refreshing columns");
        match self
            .try_emit(source, event_type, severity, correlation_id, &payload, true)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(source, event_type, error = %e, "Event sink write failed after column refresh");
                0
            }
        }
    }

    async fn try_emit(
        &self,
        source: &str,
        event_type: &str,
        severity: Severity,
        correlation_id: Option<&str>,
        payload: &Value,
        refresh: bool,
    ) -> fpf_common::Result<i64> {
        let columns = if refresh {
            self.columns.refresh(&self.pool, EVENT_TABLE).await?
        } else {
            self.columns.get(&self.pool, EVENT_TABLE).await?
        };

        let stmt = InsertBuilder::new(EVENT_TABLE)
            .value_any(&["ts", "created_at"], fpf_common::time::now_rfc3339())
            .value_any(&["source", "src"], source)
            .value_any(&["event_type", "type", "kind"], event_type)
            .value_any(&["severity", "level"], severity.as_str())
            .value_any(&["correlation_id", "corr_id"], correlation_id)
            .value_any(&["payload", "payload_json", "data"], SqlValue::Json(payload.clone()))
            .build(&columns)?;

        if !stmt.skipped.is_empty() {
            debug!(skipped = ?stmt.skipped, "Event log lacks some columns");
        }

        stmt.insert_returning_id(&self.pool).await
    }

    /// Drop the cached column set (e.g. after a migration)
    pub fn invalidate_columns(&self) {
        self.columns.invalidate(EVENT_TABLE);
    }
}
