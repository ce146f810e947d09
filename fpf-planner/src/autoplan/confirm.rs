//! Confirm phase: promote `planned` trips to `confirmed`
//!
//! Each trip is confirmed in its own transaction. The first statement is a
//! write guarded by `status = 'planned'`, which takes the database write lock
//! before metrics are computed; a trip confirmed by a concurrent run simply
//! matches zero rows and is skipped. `confirmed_at` is only set when empty.

use super::decision::{AuditRecord, Decision, EntityRef, Phase};
use super::pipeline::{AutoplanPipeline, PhaseRequest};
use super::store;
use crate::flowlang::{Settings, SlaSettings};
use crate::tasks::names::ROUTING_ENRICH_CONFIRMED;
use crate::tasks::Broker;
use fpf_common::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmMetrics {
    pub distance_km: f64,
    /// `od_km`, `est_km` or `fallback_km`
    pub distance_source: String,
    pub price: Option<f64>,
    /// `price` or `rpm_x_distance`
    pub price_source: Option<String>,
    pub drive_hours: f64,
    pub rph: Option<f64>,
}

fn positive_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }?;
    (n.is_finite() && n > 0.0).then_some(n)
}

impl ConfirmMetrics {
    /// Distance: `od_km` → `est_km` → plan fallback. Price: `price` → `rpm × distance`.
    pub fn compute(meta: &Value, sla: &SlaSettings) -> Self {
        let autoplan = meta.get("autoplan");
        let field = |key: &str| positive_number(autoplan.and_then(|a| a.get(key)));

        let (distance_km, distance_source) = field("od_km")
            .map(|d| (d, "od_km"))
            .or_else(|| field("est_km").map(|d| (d, "est_km")))
            .unwrap_or((sla.fallback_km, "fallback_km"));

        let price = field("price")
            .map(|p| (p, "price"))
            .or_else(|| field("rpm").map(|r| (r * distance_km, "rpm_x_distance")));

        let drive_hours = distance_km / sla.avg_speed_kmh;
        let rph = price.and_then(|(p, _)| (drive_hours > 0.0).then(|| p / drive_hours));

        Self {
            distance_km,
            distance_source: distance_source.to_string(),
            price: price.map(|(p, _)| p),
            price_source: price.map(|(_, s)| s.to_string()),
            drive_hours,
            rph,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmOutcome {
    pub ok: bool,
    pub decision: Decision,
    pub reason: String,
    pub dry: bool,
    pub limit: i64,
    pub selected: usize,
    pub confirmed: usize,
    /// Selected trips no longer `planned` when their turn came
    pub skipped: usize,
    pub trip_ids: Vec<String>,
    pub routing_enqueued: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routing_errors: Vec<String>,
    pub audit_id: Option<i64>,
}

impl ConfirmOutcome {
    fn empty(dry: bool, limit: i64) -> Self {
        Self {
            ok: true,
            decision: Decision::Noop,
            reason: String::new(),
            dry,
            limit,
            selected: 0,
            confirmed: 0,
            skipped: 0,
            trip_ids: Vec::new(),
            routing_enqueued: 0,
            routing_errors: Vec::new(),
            audit_id: None,
        }
    }
}

impl AutoplanPipeline {
    /// Confirm up to `limit` planned trips, newest first. With a broker and
    /// `confirm_trigger_routing`, each confirmed trip gets a routing task.
    pub async fn confirm(&self, req: &PhaseRequest, trigger: Option<&dyn Broker>) -> Result<ConfirmOutcome> {
        let settings = self.settings_for(req).await;
        let limit = settings.effective_limit(req.limit);
        let dry = Self::is_dry(&settings, req);
        let mut outcome = ConfirmOutcome::empty(dry, limit);

        if dry {
            return self.confirm_noop(&settings, outcome, "dry_run", json!({"limit": limit})).await;
        }

        let missing = store::missing_relations(&self.pool, &["trips"]).await?;
        if !missing.is_empty() {
            return self
                .confirm_noop(&settings, outcome, "storage_missing", json!({"missing": missing}))
                .await;
        }

        let planned = store::planned_trip_ids(&self.pool, limit).await?;
        outcome.selected = planned.len();
        if planned.is_empty() {
            return self.confirm_noop(&settings, outcome, "no_planned", json!({"limit": limit})).await;
        }

        let mut per_trip = Vec::new();
        for trip_id in &planned {
            match self.confirm_trip(&settings, trip_id).await? {
                Some(metrics) => {
                    per_trip.push(json!({"trip_id": trip_id, "metrics": metrics}));
                    outcome.trip_ids.push(trip_id.clone());
                }
                None => {
                    debug!(trip_id = %trip_id, "Trip no longer planned, skipped");
                    outcome.skipped += 1;
                }
            }
        }
        outcome.confirmed = outcome.trip_ids.len();

        if settings.chain.confirm_trigger_routing {
            if let Some(broker) = trigger {
                for trip_id in &outcome.trip_ids {
                    match broker
                        .enqueue(ROUTING_ENRICH_CONFIRMED, json!({"trip_id": trip_id}))
                        .await
                    {
                        Ok(_) => outcome.routing_enqueued += 1,
                        Err(e) => {
                            warn!(trip_id = %trip_id, error = %e, "Routing trigger for confirmed trip failed");
                            outcome.routing_errors.push(e.to_string());
                        }
                    }
                }
            }
        }

        if outcome.confirmed == 0 {
            let payload = json!({"limit": limit, "selected": outcome.selected});
            return self.confirm_noop(&settings, outcome, "already_confirmed", payload).await;
        }

        let single_trip = match outcome.trip_ids.as_slice() {
            [only] => Some(EntityRef::parse(only)),
            _ => None,
        };
        let record = AuditRecord::new(&settings, Phase::Confirm, Decision::Confirm)
            .with_reason("trips_confirmed")
            .applied(true)
            .with_trip(single_trip)
            .with_payload(json!({
                "limit": limit,
                "selected": outcome.selected,
                "confirmed": outcome.confirmed,
                "skipped": outcome.skipped,
                "trips": per_trip,
                "routing_enqueued": outcome.routing_enqueued,
            }));
        outcome.audit_id = self.audit.record(&record).await?;
        outcome.decision = Decision::Confirm;
        outcome.reason = "trips_confirmed".to_string();

        info!(
            plan = %settings.plan,
            confirmed = outcome.confirmed,
            skipped = outcome.skipped,
            routing_enqueued = outcome.routing_enqueued,
            "Autoplan confirm finished"
        );
        Ok(outcome)
    }

    /// Confirm one trip if it is still `planned`
    async fn confirm_trip(&self, settings: &Settings, trip_id: &str) -> Result<Option<ConfirmMetrics>> {
        let now = fpf_common::time::now_rfc3339();
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query("UPDATE trips SET updated_at = ? WHERE id = ? AND status = 'planned'")
            .bind(&now)
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let meta_text: Option<String> = sqlx::query_scalar("SELECT meta FROM trips WHERE id = ?")
            .bind(trip_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut meta: Value = meta_text
            .as_deref()
            .and_then(|t| serde_json::from_str(t).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));

        let metrics = ConfirmMetrics::compute(&meta, &settings.sla);
        if let Some(obj) = meta.as_object_mut() {
            let autoplan = obj.entry("autoplan").or_insert_with(|| json!({}));
            if let Some(ap) = autoplan.as_object_mut() {
                ap.insert("drive_hours".into(), json!(metrics.drive_hours));
                ap.insert("rph".into(), json!(metrics.rph));
                ap.insert("distance_km".into(), json!(metrics.distance_km));
                ap.insert("distance_source".into(), json!(metrics.distance_source));
                ap.insert("confirmed_by".into(), json!("autoplan.confirm"));
            }
        }

        sqlx::query(
            r#"
            UPDATE trips
            SET status = 'confirmed',
                confirmed_at = COALESCE(confirmed_at, ?),
                updated_at = ?,
                meta = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(meta.to_string())
        .bind(trip_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(metrics))
    }

    /// Put a planned or confirmed trip back to `draft`. Trips are never deleted.
    pub async fn revert_to_draft(&self, trip_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trips SET status = 'draft', updated_at = ? WHERE id = ? AND status IN ('planned', 'confirmed')",
        )
        .bind(fpf_common::time::now_rfc3339())
        .bind(trip_id)
        .execute(&self.pool)
        .await?;

        let reverted = result.rows_affected() == 1;
        info!(trip_id, reverted, "Revert to draft");
        Ok(reverted)
    }

    async fn confirm_noop(
        &self,
        settings: &Settings,
        mut outcome: ConfirmOutcome,
        reason: &str,
        payload: Value,
    ) -> Result<ConfirmOutcome> {
        let record = AuditRecord::noop(settings, Phase::Confirm, reason).with_payload(payload);
        outcome.audit_id = self.audit.record(&record).await?;
        outcome.decision = Decision::Noop;
        outcome.reason = reason.to_string();
        info!(plan = %settings.plan, reason, "Autoplan confirm noop");
        Ok(outcome)
    }
}
