//! Dispatch ladder for the `/run` entry point
//!
//! Strategies are tried in rank order:
//! 1. a registered chain task (any of [`CHAIN_TASK_NAMES`])
//! 2. a manually built chain of the phase tasks the plan enables
//! 3. a single `autoplan.kick` task carrying only limit and dry
//!
//! Each abandoned step leaves a note for the caller. Only a fully exhausted
//! ladder is an error.

use super::broker::{Broker, TaskSignature};
use super::names::{
    AUTOPLAN_APPLY, AUTOPLAN_AUDIT, AUTOPLAN_CONFIRM, AUTOPLAN_KICK, AUTOPLAN_PUSH, CANVAS_STEPS,
    CHAIN_TASK_NAMES,
};
use crate::flowlang::{Settings, SettingsCache};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RegisteredChain,
    ManualCanvas,
    Kick,
}

/// Requested entry point on the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Chain,
    Kick,
}

impl DispatchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "chain" => Some(DispatchMode::Chain),
            "kick" => Some(DispatchMode::Kick),
            _ => None,
        }
    }

    fn strategies(&self) -> &'static [Strategy] {
        match self {
            DispatchMode::Chain => &[Strategy::RegisteredChain, Strategy::ManualCanvas, Strategy::Kick],
            DispatchMode::Kick => &[Strategy::Kick],
        }
    }
}

/// Run parameters accepted from the query string and body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub plan: Option<String>,
    pub limit: Option<i64>,
    pub window_min: Option<i64>,
    pub write_audit: Option<bool>,
    pub dry: Option<bool>,
}

impl RunParams {
    /// Fields set in `other` win
    pub fn overridden_by(self, other: RunParams) -> Self {
        Self {
            plan: other.plan.or(self.plan),
            limit: other.limit.or(self.limit),
            window_min: other.window_min.or(self.window_min),
            write_audit: other.write_audit.or(self.write_audit),
            dry: other.dry.or(self.dry),
        }
    }

    /// Task arguments; unset fields are left to the plan
    pub fn task_args(&self) -> Value {
        let mut args = Map::new();
        if let Some(plan) = &self.plan {
            args.insert("plan".into(), json!(plan));
        }
        if let Some(limit) = self.limit {
            args.insert("limit".into(), json!(limit));
        }
        if let Some(window_min) = self.window_min {
            args.insert("window_min".into(), json!(window_min));
        }
        if let Some(write_audit) = self.write_audit {
            args.insert("write_audit".into(), json!(write_audit));
        }
        if let Some(dry) = self.dry {
            args.insert("dry".into(), json!(dry));
        }
        Value::Object(args)
    }

    /// The minimal kick payload
    pub fn kick_args(&self) -> Value {
        json!({"limit": self.limit, "dry": self.dry.unwrap_or(false)})
    }
}

/// What the broker can run right now
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub registered: BTreeSet<String>,
    /// First registered chain task name
    pub chain_task: Option<String>,
    pub canvas_ready: bool,
    pub kick_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dispatched {
    pub ok: bool,
    pub mode: DispatchMode,
    pub strategy: Strategy,
    pub task_name: String,
    /// Head task to poll
    pub task_id: Uuid,
    /// Every queued task, in execution order
    pub task_ids: Vec<Uuid>,
    pub notes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("All dispatch strategies failed: {}", notes.join("; "))]
    Exhausted { notes: Vec<String> },
}

/// Phase tasks for a manual chain under `settings`.
/// Push always runs; confirm is dropped on a dry run.
pub fn canvas_steps(settings: &Settings, dry: bool) -> Vec<&'static str> {
    let chain = &settings.chain;
    let mut steps = Vec::with_capacity(CANVAS_STEPS.len());
    if chain.chain_enable_audit {
        steps.push(AUTOPLAN_AUDIT);
    }
    if chain.chain_enable_apply {
        steps.push(AUTOPLAN_APPLY);
    }
    steps.push(AUTOPLAN_PUSH);
    if chain.chain_enable_confirm && !dry {
        steps.push(AUTOPLAN_CONFIRM);
    }
    steps
}

pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    settings: Arc<SettingsCache>,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn Broker>, settings: Arc<SettingsCache>) -> Self {
        Self { broker, settings }
    }

    pub fn probe(&self) -> Capabilities {
        let registered: BTreeSet<String> = self.broker.registered().into_iter().collect();
        let chain_task = CHAIN_TASK_NAMES
            .iter()
            .find(|name| registered.contains(**name))
            .map(|name| name.to_string());
        let canvas_ready = CANVAS_STEPS.iter().all(|name| registered.contains(*name));
        let kick_ready = registered.contains(AUTOPLAN_KICK);
        Capabilities {
            registered,
            chain_task,
            canvas_ready,
            kick_ready,
        }
    }

    pub async fn dispatch(&self, mode: DispatchMode, params: &RunParams) -> Result<Dispatched, DispatchError> {
        let caps = self.probe();
        let mut notes = Vec::new();

        for strategy in mode.strategies() {
            match self.attempt(*strategy, &caps, params).await {
                Ok((task_name, task_ids)) => {
                    let task_id = task_ids[0];
                    info!(?strategy, task = %task_name, task_id = %task_id, notes = notes.len(), "Autoplan run dispatched");
                    return Ok(Dispatched {
                        ok: true,
                        mode,
                        strategy: *strategy,
                        task_name,
                        task_id,
                        task_ids,
                        notes,
                    });
                }
                Err(note) => {
                    warn!(?strategy, note = %note, "Dispatch strategy abandoned");
                    notes.push(note);
                }
            }
        }

        Err(DispatchError::Exhausted { notes })
    }

    /// Queue one strategy; `Err` carries the note explaining why it was abandoned.
    /// On success the returned id list is never empty.
    async fn attempt(
        &self,
        strategy: Strategy,
        caps: &Capabilities,
        params: &RunParams,
    ) -> Result<(String, Vec<Uuid>), String> {
        match strategy {
            Strategy::RegisteredChain => {
                let name = caps
                    .chain_task
                    .clone()
                    .ok_or_else(|| format!("no chain task registered (tried {})", CHAIN_TASK_NAMES.join(", ")))?;
                let id = self
                    .broker
                    .enqueue(&name, params.task_args())
                    .await
                    .map_err(|e| format!("enqueue of {} failed: {}", name, e))?;
                Ok((name, vec![id]))
            }
            Strategy::ManualCanvas => {
                if !caps.canvas_ready {
                    let missing: Vec<&str> = CANVAS_STEPS
                        .iter()
                        .filter(|name| !caps.registered.contains(**name))
                        .copied()
                        .collect();
                    return Err(format!("manual chain unavailable, missing {}", missing.join(", ")));
                }
                let settings = self.settings.get_or_active(params.plan.as_deref()).await;
                let dry = params.dry.unwrap_or(false) || settings.safety.dry_run;
                let names = canvas_steps(&settings, dry);
                let args = params.task_args();
                let steps = names
                    .iter()
                    .map(|name| TaskSignature::new(*name, args.clone()))
                    .collect();
                let ids = self
                    .broker
                    .enqueue_chain(steps)
                    .await
                    .map_err(|e| format!("manual chain enqueue failed: {}", e))?;
                if ids.is_empty() {
                    return Err("manual chain enqueue returned no tasks".to_string());
                }
                Ok((names[0].to_string(), ids))
            }
            Strategy::Kick => {
                if !caps.kick_ready {
                    return Err(format!("{} not registered", AUTOPLAN_KICK));
                }
                let id = self
                    .broker
                    .enqueue(AUTOPLAN_KICK, params.kick_args())
                    .await
                    .map_err(|e| format!("kick enqueue failed: {}", e))?;
                Ok((AUTOPLAN_KICK.to_string(), vec![id]))
            }
        }
    }
}
