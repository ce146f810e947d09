//! Push phase
//!
//! Apply already writes trips directly, so push has nothing to hand over.
//! It still runs in every chain and leaves its `noop` row in the audit trail.

use super::decision::{AuditRecord, Decision, Phase};
use super::pipeline::{AutoplanPipeline, PhaseRequest};
use fpf_common::Result;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    pub ok: bool,
    pub decision: Decision,
    pub reason: String,
    pub audit_id: Option<i64>,
}

impl AutoplanPipeline {
    pub async fn push(&self, req: &PhaseRequest) -> Result<PushOutcome> {
        let settings = self.settings_for(req).await;
        let limit = settings.effective_limit(req.limit);

        let record = AuditRecord::noop(&settings, Phase::Push, "placeholder").with_payload(json!({"limit": limit}));
        let audit_id = self.audit.record(&record).await?;
        debug!(plan = %settings.plan, "Autoplan push placeholder");

        Ok(PushOutcome {
            ok: true,
            decision: Decision::Noop,
            reason: "placeholder".to_string(),
            audit_id,
        })
    }
}
