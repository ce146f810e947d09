//! Autoplan audit trail writer
//!
//! Rows go to `autoplan_audit` through the column-set builder, so a
//! deployment lacking `trip_ref`/`truck_ref` (or naming its JSON columns
//! differently) still gets its rows. A UUID reference fills `trip_id` /
//! `truck_id`; anything else goes to the `*_ref` text columns. The raw value
//! is always copied into `payload.refs`.

use super::decision::AuditRecord;
use crate::observability::{EventSink, Severity};
use fpf_common::db::{ColumnCache, InsertBuilder, SqlValue};
use fpf_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const AUDIT_TABLE: &str = "autoplan_audit";
const COLUMN_TTL: Duration = Duration::from_secs(300);

pub struct AuditWriter {
    pool: SqlitePool,
    columns: ColumnCache,
    sink: Option<Arc<EventSink>>,
}

impl AuditWriter {
    pub fn new(pool: SqlitePool, sink: Option<Arc<EventSink>>) -> Self {
        Self {
            pool,
            columns: ColumnCache::new(COLUMN_TTL),
            sink,
        }
    }

    /// Append one record. `None` when the audit table does not exist.
    ///
    /// Must not be called while the caller holds a transaction on the same pool.
    pub async fn record(&self, record: &AuditRecord) -> Result<Option<i64>> {
        let id = match self.try_record(record, false).await {
            Ok(id) => id,
            Err(e) if e.is_schema_mismatch() => {
                warn!(error = %e, "Audit table schema changed, refreshing columns");
                self.try_record(record, true).await?
            }
            Err(e) => return Err(e),
        };

        match id {
            Some(id) => debug!(
                id,
                phase = record.phase.as_str(),
                decision = record.decision.as_str(),
                reason = record.reason.as_deref().unwrap_or(""),
                "Audit row written"
            ),
            None => warn!(
                phase = record.phase.as_str(),
                decision = record.decision.as_str(),
                "autoplan_audit table missing, decision only mirrored to event log"
            ),
        }

        self.mirror(record, id).await;
        Ok(id)
    }

    async fn try_record(&self, record: &AuditRecord, refresh: bool) -> Result<Option<i64>> {
        let columns = if refresh {
            self.columns.refresh(&self.pool, AUDIT_TABLE).await?
        } else {
            self.columns.get(&self.pool, AUDIT_TABLE).await?
        };
        if columns.is_empty() {
            return Ok(None);
        }

        let uuid_text = |r: &Option<super::EntityRef>| r.as_ref().and_then(|r| r.as_uuid()).map(|u| u.to_string());
        let opaque_text = |r: &Option<super::EntityRef>| r.as_ref().and_then(|r| r.as_opaque()).map(str::to_string);

        let stmt = InsertBuilder::new(AUDIT_TABLE)
            .value_any(&["ts", "created_at"], fpf_common::time::now_rfc3339())
            .value("plan", record.plan.as_str())
            .value("phase", record.phase.as_str())
            .value("decision", record.decision.as_str())
            .value("reason", record.reason.clone())
            .value("applied", record.applied)
            .value("truck_id", uuid_text(&record.truck))
            .value("trip_id", uuid_text(&record.trip))
            .value_any(&["truck_ref", "truck_text"], opaque_text(&record.truck))
            .value_any(&["trip_ref", "trip_text"], opaque_text(&record.trip))
            .value_any(&["thresholds", "thresholds_json"], SqlValue::Json(record.thresholds.clone()))
            .value_any(&["payload", "payload_json", "data"], SqlValue::Json(record.payload_with_refs()))
            .build(&columns)?;

        if !stmt.skipped.is_empty() {
            debug!(skipped = ?stmt.skipped, "Audit table lacks some columns");
        }

        Ok(Some(stmt.insert_returning_id(&self.pool).await?))
    }

    async fn mirror(&self, record: &AuditRecord, audit_id: Option<i64>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let severity = match record.decision {
            super::Decision::Noop => Severity::Debug,
            _ => Severity::Info,
        };
        let correlation = record.trip.as_ref().map(|t| t.raw());
        sink.emit(
            "autoplan",
            &format!("autoplan.{}", record.phase.as_str()),
            severity,
            correlation.as_deref(),
            serde_json::json!({
                "audit_id": audit_id,
                "plan": record.plan,
                "decision": record.decision.as_str(),
                "reason": record.reason,
                "applied": record.applied,
                "payload": record.payload_with_refs(),
            }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoplan::{Decision, EntityRef, Phase};
    use crate::flowlang::Settings;
    use sqlx::Row;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_uuid_and_opaque_refs() {
        let pool = fpf_common::db::init_memory_database().await.unwrap();
        let writer = AuditWriter::new(pool.clone(), None);
        let settings = Settings::defaults("rolling_msk");
        let trip = Uuid::new_v4();

        let id = writer
            .record(
                &AuditRecord::new(&settings, Phase::Apply, Decision::Apply)
                    .applied(true)
                    .with_trip(Some(EntityRef::Uuid(trip)))
                    .with_truck(Some(EntityRef::parse("12"))),
            )
            .await
            .unwrap()
            .unwrap();

        let row = sqlx::query("SELECT trip_id, truck_id, truck_ref, applied, payload FROM autoplan_audit WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<Option<String>, _>("trip_id"), Some(trip.to_string()));
        assert_eq!(row.get::<Option<String>, _>("truck_id"), None);
        assert_eq!(row.get::<Option<String>, _>("truck_ref").as_deref(), Some("12"));
        assert!(row.get::<bool, _>("applied"));

        let payload: serde_json::Value = serde_json::from_str(&row.get::<String, _>("payload")).unwrap();
        assert_eq!(payload["refs"]["truck"]["raw"], "12");
        assert_eq!(payload["refs"]["trip"]["kind"], "uuid");
    }

    #[tokio::test]
    async fn test_legacy_table_without_ref_columns() {
        let pool = fpf_common::db::init_memory_database().await.unwrap();
        sqlx::query("DROP TABLE autoplan_audit").execute(&pool).await.unwrap();
        sqlx::query(
            "CREATE TABLE autoplan_audit (id INTEGER PRIMARY KEY, decision TEXT NOT NULL, trip_id TEXT, payload_json TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let writer = AuditWriter::new(pool.clone(), None);
        let settings = Settings::defaults("p");
        let id = writer
            .record(&AuditRecord::noop(&settings, Phase::Confirm, "no_planned").with_trip(Some(EntityRef::parse("legacy-7"))))
            .await
            .unwrap();
        assert!(id.is_some());

        let payload: String = sqlx::query_scalar("SELECT payload_json FROM autoplan_audit")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(payload.contains("legacy-7"));
    }

    #[tokio::test]
    async fn test_missing_table_returns_none() {
        let pool = fpf_common::db::init_memory_database().await.unwrap();
        sqlx::query("DROP TABLE autoplan_audit").execute(&pool).await.unwrap();
        let writer = AuditWriter::new(pool, None);
        let settings = Settings::defaults("p");
        let id = writer
            .record(&AuditRecord::noop(&settings, Phase::Audit, "storage_missing"))
            .await
            .unwrap();
        assert_eq!(id, None);
    }
}
