//! Apply phase: turn fresh freight candidates into `planned` trips
//!
//! Candidates already referenced by a trip's `meta.autoplan.freight_id` are
//! excluded at selection time, and the insert itself is guarded by the same
//! condition, so re-running apply never duplicates a trip for one freight.

use super::decision::{AuditRecord, Decision, EntityRef, Phase};
use super::economics::rpm_threshold;
use super::pipeline::{AutoplanPipeline, PhaseRequest};
use super::store::{self, FreightCandidate, PRICE_VIEW};
use crate::flowlang::Settings;
use chrono::Duration as ChronoDuration;
use fpf_common::db::SchemaIntrospector;
use fpf_common::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub ok: bool,
    pub decision: Decision,
    pub reason: String,
    pub dry: bool,
    pub limit: i64,
    pub candidates: usize,
    pub created: usize,
    pub trip_ids: Vec<String>,
    pub truck: Option<String>,
    pub rpm_min: f64,
    pub audit_id: Option<i64>,
}

impl ApplyOutcome {
    fn empty(dry: bool, limit: i64) -> Self {
        Self {
            ok: true,
            decision: Decision::Noop,
            reason: String::new(),
            dry,
            limit,
            candidates: 0,
            created: 0,
            trip_ids: Vec::new(),
            truck: None,
            rpm_min: 0.0,
            audit_id: None,
        }
    }
}

/// Trip metadata recording where the trip came from
pub fn trip_meta(
    settings: &Settings,
    freight: &FreightCandidate,
    truck: &EntityRef,
    window_min: i64,
    now: chrono::DateTime<chrono::Utc>,
) -> Value {
    json!({
        "autoplan": {
            "freight_id": freight.id,
            "plan": settings.plan,
            "origin_region": freight.origin_region,
            "dest_region": freight.dest_region,
            "origin_place": freight.origin_place,
            "dest_place": freight.dest_place,
            "price": freight.price,
            "od_km": freight.road_km,
            "rpm": freight.rpm,
            "freight_ts": freight.ts,
            "truck_id": truck.raw(),
            "apply_window_min": window_min,
            "apply_until": (now + ChronoDuration::minutes(window_min)).to_rfc3339(),
            "created_by": "autoplan.apply",
            "created_at": now.to_rfc3339(),
        }
    })
}

impl AutoplanPipeline {
    pub async fn apply(&self, req: &PhaseRequest) -> Result<ApplyOutcome> {
        let settings = self.settings_for(req).await;
        let limit = settings.effective_limit(req.limit);
        let dry = Self::is_dry(&settings, req);
        let window_min = req
            .window_min
            .unwrap_or(settings.window.apply_window_min)
            .max(0);
        let mut outcome = ApplyOutcome::empty(dry, limit);

        if dry {
            return self
                .apply_noop(&settings, outcome, "dry_run", json!({"limit": limit}))
                .await;
        }

        let missing = store::missing_relations(&self.pool, &[PRICE_VIEW, "trips", "trucks"]).await?;
        if !missing.is_empty() {
            return self
                .apply_noop(&settings, outcome, "storage_missing", json!({"missing": missing}))
                .await;
        }

        let cutoff = fpf_common::time::cutoff_date(settings.window.freights_days_back);
        let threshold = rpm_threshold(&self.pool, &settings, cutoff).await?;
        outcome.rpm_min = threshold.effective;

        let candidates = store::fetch_candidates(&self.pool, cutoff, threshold.effective, limit).await?;
        outcome.candidates = candidates.len();
        if candidates.is_empty() {
            let payload = json!({"limit": limit, "cutoff": cutoff.to_string(), "rpm_min": threshold.effective});
            return self.apply_noop(&settings, outcome, "no_candidates", payload).await;
        }

        let Some(truck) = store::first_active_truck(&self.pool).await? else {
            let payload = json!({"limit": limit, "candidates": outcome.candidates});
            return self.apply_noop(&settings, outcome, "no_active_truck", payload).await;
        };
        let truck_ref = truck.reference();
        outcome.truck = Some(truck_ref.raw());

        let with_segments = SchemaIntrospector::table_exists(&self.pool, "trip_segments").await?;
        let now = fpf_common::time::now();
        let now_text = now.to_rfc3339();

        let mut tx = self.pool.begin().await?;
        for freight in &candidates {
            let trip_id = Uuid::new_v4().to_string();
            let meta = trip_meta(&settings, freight, &truck_ref, window_min, now);
            let inserted =
                store::insert_planned_trip(&mut *tx, &trip_id, &truck_ref.raw(), &freight.id, &meta, &now_text)
                    .await?;
            if !inserted {
                debug!(freight_id = %freight.id, "Freight already linked to a trip");
                continue;
            }
            if with_segments {
                store::insert_segment(&mut *tx, &trip_id, freight).await?;
            }
            outcome.trip_ids.push(trip_id);
        }
        tx.commit().await?;

        outcome.created = outcome.trip_ids.len();
        if outcome.created == 0 {
            let payload = json!({"limit": limit, "candidates": outcome.candidates});
            return self.apply_noop(&settings, outcome, "no_new_trips", payload).await;
        }

        let single_trip = match outcome.trip_ids.as_slice() {
            [only] => Some(EntityRef::parse(only)),
            _ => None,
        };
        let record = AuditRecord::new(&settings, Phase::Apply, Decision::Apply)
            .with_reason("trips_created")
            .applied(true)
            .with_truck(Some(truck_ref))
            .with_trip(single_trip)
            .with_payload(json!({
                "limit": limit,
                "candidates": outcome.candidates,
                "created": outcome.created,
                "trip_ids": outcome.trip_ids,
                "rpm_min": threshold.effective,
                "apply_window_min": window_min,
            }));
        outcome.audit_id = self.audit.record(&record).await?;
        outcome.decision = Decision::Apply;
        outcome.reason = "trips_created".to_string();

        info!(
            plan = %settings.plan,
            created = outcome.created,
            candidates = outcome.candidates,
            truck = outcome.truck.as_deref().unwrap_or(""),
            "Autoplan apply created trips"
        );
        Ok(outcome)
    }

    async fn apply_noop(
        &self,
        settings: &Settings,
        mut outcome: ApplyOutcome,
        reason: &str,
        payload: Value,
    ) -> Result<ApplyOutcome> {
        let record = AuditRecord::noop(settings, Phase::Apply, reason).with_payload(payload);
        outcome.audit_id = self.audit.record(&record).await?;
        outcome.decision = Decision::Noop;
        outcome.reason = reason.to_string();
        info!(plan = %settings.plan, reason, "Autoplan apply noop");
        Ok(outcome)
    }
}
