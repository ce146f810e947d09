//! Full pipeline run: audit → apply → push → confirm
//!
//! Phases run in order on the caller's task. A phase error aborts the chain
//! and propagates; expected degraded states come back as `noop` outcomes.

use super::pipeline::{to_json, AutoplanPipeline, PhaseRequest};
use crate::tasks::Broker;
use fpf_common::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ChainResult {
    pub ok: bool,
    pub plan: String,
    pub dry: bool,
    pub limit: i64,
    /// Phase name → that phase's outcome or skip marker
    pub phases: BTreeMap<String, Value>,
}

fn skipped(reason: &str) -> Value {
    json!({"skipped": true, "reason": reason})
}

impl AutoplanPipeline {
    /// Run every enabled phase of the requested plan. Dry runs never confirm.
    pub async fn run_chain(&self, req: &PhaseRequest, trigger: Option<&dyn Broker>) -> Result<ChainResult> {
        let settings = self.settings_for(req).await;
        let limit = settings.effective_limit(req.limit);
        let dry = Self::is_dry(&settings, req);
        let phase_req = PhaseRequest {
            plan: Some(settings.plan.clone()),
            limit: Some(limit),
            dry: Some(dry),
            window_min: req.window_min,
        };

        info!(plan = %settings.plan, limit, dry, "Autoplan chain started");
        let mut phases = BTreeMap::new();

        let audit = if settings.chain.chain_enable_audit {
            to_json(&self.audit(&phase_req).await?)?
        } else {
            skipped("disabled")
        };
        phases.insert("audit".to_string(), audit);

        let apply = if settings.chain.chain_enable_apply {
            to_json(&self.apply(&phase_req).await?)?
        } else {
            skipped("disabled")
        };
        phases.insert("apply".to_string(), apply);

        phases.insert("push".to_string(), to_json(&self.push(&phase_req).await?)?);

        let confirm = if dry {
            skipped("dry_run")
        } else if settings.chain.chain_enable_confirm {
            to_json(&self.confirm(&phase_req, trigger).await?)?
        } else {
            skipped("disabled")
        };
        phases.insert("confirm".to_string(), confirm);

        info!(plan = %settings.plan, "Autoplan chain finished");
        Ok(ChainResult {
            ok: true,
            plan: settings.plan.clone(),
            dry,
            limit,
            phases,
        })
    }
}
