//! Periodic task scheduler
//!
//! One tokio interval per schedule; all stop when the cancellation token fires.
//! The first run happens one full period after startup.

use super::broker::Broker;
use super::names::{AUTOPLAN_CHAIN, GEO_RESOLVE_BATCH, ROUTING_ENRICH_TRIPS};
use crate::config::BeatConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub task: &'static str,
    pub every: Duration,
    pub args: Value,
}

/// Schedules for the given chain cadence and beat configuration; 0 disables one
pub fn schedules(chain_every_min: i64, plan: &str, config: &BeatConfig) -> Vec<Schedule> {
    let mut out = Vec::new();
    if chain_every_min > 0 {
        out.push(Schedule {
            task: AUTOPLAN_CHAIN,
            every: Duration::from_secs(chain_every_min as u64 * 60),
            args: json!({"plan": plan}),
        });
    }
    if config.geocode_every_min > 0 {
        out.push(Schedule {
            task: GEO_RESOLVE_BATCH,
            every: Duration::from_secs(config.geocode_every_min * 60),
            args: json!({}),
        });
    }
    if config.routing_every_min > 0 {
        out.push(Schedule {
            task: ROUTING_ENRICH_TRIPS,
            every: Duration::from_secs(config.routing_every_min * 60),
            args: json!({}),
        });
    }
    out
}

pub struct Beat {
    broker: Arc<dyn Broker>,
    schedules: Vec<Schedule>,
}

impl Beat {
    pub fn new(broker: Arc<dyn Broker>, schedules: Vec<Schedule>) -> Self {
        Self { broker, schedules }
    }

    /// Spawn one loop per schedule
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        if self.schedules.is_empty() {
            info!("Beat has no schedules");
        }
        self.schedules
            .into_iter()
            .map(|schedule| {
                let broker = Arc::clone(&self.broker);
                let cancel = cancel.clone();
                tokio::spawn(run_schedule(broker, schedule, cancel))
            })
            .collect()
    }
}

async fn run_schedule(broker: Arc<dyn Broker>, schedule: Schedule, cancel: CancellationToken) {
    info!(
        task = schedule.task,
        every_secs = schedule.every.as_secs(),
        "Beat schedule started"
    );
    let mut ticker = tokio::time::interval(schedule.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = schedule.task, "Beat schedule stopped");
                return;
            }
            _ = ticker.tick() => {
                match broker.enqueue(schedule.task, schedule.args.clone()).await {
                    Ok(task_id) => debug!(task = schedule.task, task_id = %task_id, "Beat enqueued task"),
                    Err(e) => warn!(task = schedule.task, error = %e, "Beat enqueue failed"),
                }
            }
        }
    }
}
