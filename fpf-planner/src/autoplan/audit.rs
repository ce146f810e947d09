//! Audit phase: read-only market scan

use super::decision::{AuditRecord, Decision, Phase};
use super::economics::{rpm_threshold, RpmThreshold};
use super::pipeline::{AutoplanPipeline, PhaseRequest};
use super::store::{self, PRICE_VIEW};
use fpf_common::Result;
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    pub ok: bool,
    pub decision: Decision,
    pub reason: String,
    pub limit: i64,
    /// Freshness cutoff actually used (`YYYY-MM-DD`)
    pub cutoff: String,
    pub freights_fresh: i64,
    pub trucks_active: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<RpmThreshold>,
    pub audit_id: Option<i64>,
}

impl AutoplanPipeline {
    pub async fn audit(&self, req: &PhaseRequest) -> Result<AuditOutcome> {
        let settings = self.settings_for(req).await;
        let limit = settings.effective_limit(req.limit);
        let cutoff = fpf_common::time::cutoff_date(settings.window.freights_days_back);

        let missing = store::missing_relations(&self.pool, &[PRICE_VIEW]).await?;
        if !missing.is_empty() {
            let record = AuditRecord::noop(&settings, Phase::Audit, "storage_missing").with_payload(json!({
                "missing": missing,
                "limit": limit,
                "cutoff": cutoff.to_string(),
            }));
            let audit_id = self.audit.record(&record).await?;
            return Ok(AuditOutcome {
                ok: true,
                decision: Decision::Noop,
                reason: "storage_missing".to_string(),
                limit,
                cutoff: cutoff.to_string(),
                freights_fresh: 0,
                trucks_active: 0,
                rpm: None,
                audit_id,
            });
        }

        let freights_fresh = store::count_fresh_freights(&self.pool, cutoff).await?;
        let trucks_active = store::count_active_trucks(&self.pool).await?;
        let rpm = rpm_threshold(&self.pool, &settings, cutoff).await?;

        let record = AuditRecord::new(&settings, Phase::Audit, Decision::Audit)
            .with_reason("market_scan")
            .with_payload(json!({
                "limit": limit,
                "cutoff": cutoff.to_string(),
                "freights_fresh": freights_fresh,
                "trucks_active": trucks_active,
                "rpm": rpm,
            }));
        let audit_id = self.audit.record(&record).await?;

        info!(
            plan = %settings.plan,
            freights_fresh,
            trucks_active,
            cutoff = %cutoff,
            rpm_min = rpm.effective,
            "Autoplan market scan"
        );

        Ok(AuditOutcome {
            ok: true,
            decision: Decision::Audit,
            reason: "market_scan".to_string(),
            limit,
            cutoff: cutoff.to_string(),
            freights_fresh,
            trucks_active,
            rpm: Some(rpm),
            audit_id,
        })
    }
}
