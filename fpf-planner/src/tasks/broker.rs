//! In-process task broker
//!
//! Tasks run on the tokio runtime, bounded by a semaphore. Every task's
//! lifecycle (`PENDING` → `STARTED` → `SUCCESS`/`FAILURE`) is persisted in
//! `task_results` so `/result` can be polled from any request.

use super::registry::{TaskContext, TaskRegistry, WorkerContext};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STATUS_WRITE_MAX_WAIT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Task not registered: {0}")]
    NotRegistered(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker storage error: {0}")]
    Storage(#[from] fpf_common::Error),
}

impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        BrokerError::Storage(err.into())
    }
}

/// A task name with its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSignature {
    pub name: String,
    pub args: Value,
}

impl TaskSignature {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "STARTED" => Some(TaskStatus::Started),
            "SUCCESS" => Some(TaskStatus::Success),
            "FAILURE" => Some(TaskStatus::Failure),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

/// Persisted state of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub args: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Task names this broker can run
    fn registered(&self) -> Vec<String>;

    async fn ping(&self) -> Result<(), BrokerError>;

    async fn enqueue(&self, name: &str, args: Value) -> Result<Uuid, BrokerError>;

    /// Queue steps that run one after another; a failed step fails the rest
    async fn enqueue_chain(&self, steps: Vec<TaskSignature>) -> Result<Vec<Uuid>, BrokerError>;

    async fn result(&self, task_id: Uuid) -> Result<Option<TaskRecord>, BrokerError>;
}

pub struct LocalBroker {
    pool: SqlitePool,
    registry: Arc<TaskRegistry>,
    worker: Arc<WorkerContext>,
    slots: Arc<Semaphore>,
    this: Weak<LocalBroker>,
}

impl LocalBroker {
    /// `concurrency` bounds how many tasks run at once (at least 1)
    pub fn new(
        pool: SqlitePool,
        registry: Arc<TaskRegistry>,
        worker: Arc<WorkerContext>,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            pool,
            registry,
            worker,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            this: this.clone(),
        })
    }

    fn handle(&self) -> Result<Arc<LocalBroker>, BrokerError> {
        self.this
            .upgrade()
            .ok_or_else(|| BrokerError::Unavailable("broker is shutting down".to_string()))
    }

    fn ensure_registered(&self, name: &str) -> Result<(), BrokerError> {
        if self.registry.contains(name) {
            Ok(())
        } else {
            Err(BrokerError::NotRegistered(name.to_string()))
        }
    }

    async fn insert_pending(
        &self,
        task_id: Uuid,
        name: &str,
        args: &Value,
        parent_id: Option<Uuid>,
    ) -> Result<(), BrokerError> {
        sqlx::query(
            r#"
            INSERT INTO task_results (task_id, name, status, args, parent_id, created_at)
            VALUES (?, ?, 'PENDING', ?, ?, ?)
            "#,
        )
        .bind(task_id.to_string())
        .bind(name)
        .bind(args.to_string())
        .bind(parent_id.map(|p| p.to_string()))
        .bind(fpf_common::time::now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_started(&self, task_id: Uuid) -> fpf_common::Result<()> {
        let id = task_id.to_string();
        retry_on_lock("task_results.started", STATUS_WRITE_MAX_WAIT_MS, || async {
            sqlx::query("UPDATE task_results SET status = 'STARTED', started_at = ? WHERE task_id = ?")
                .bind(fpf_common::time::now_rfc3339())
                .bind(&id)
                .execute(&self.pool)
                .await?;
            Ok::<_, fpf_common::Error>(())
        })
        .await
    }

    async fn mark_finished(&self, task_id: Uuid, outcome: &Result<Value, String>) -> fpf_common::Result<()> {
        let id = task_id.to_string();
        let (status, result, error) = match outcome {
            Ok(value) => (TaskStatus::Success, Some(value.to_string()), None),
            Err(message) => (TaskStatus::Failure, None, Some(message.clone())),
        };
        retry_on_lock("task_results.finished", STATUS_WRITE_MAX_WAIT_MS, || async {
            sqlx::query(
                "UPDATE task_results SET status = ?, result = ?, error = ?, finished_at = ? WHERE task_id = ?",
            )
            .bind(status.as_str())
            .bind(result.as_deref())
            .bind(error.as_deref())
            .bind(fpf_common::time::now_rfc3339())
            .bind(&id)
            .execute(&self.pool)
            .await?;
            Ok::<_, fpf_common::Error>(())
        })
        .await
    }

    /// Run one task to completion and persist its outcome. Returns whether it succeeded.
    async fn execute(self: Arc<Self>, task_id: Uuid, name: String, args: Value) -> bool {
        let outcome = self.run_handler(task_id, &name, args).await;

        match &outcome {
            Ok(_) => info!(task = %name, task_id = %task_id, "Task succeeded"),
            Err(message) => error!(task = %name, task_id = %task_id, error = %message, "Task failed"),
        }

        if let Err(e) = self.mark_finished(task_id, &outcome).await {
            error!(task = %name, task_id = %task_id, error = %e, "Failed to persist task outcome");
        }
        outcome.is_ok()
    }

    async fn run_handler(self: &Arc<Self>, task_id: Uuid, name: &str, args: Value) -> Result<Value, String> {
        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| format!("Task not registered: {}", name))?;

        let _permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| "Worker pool closed".to_string())?;

        if let Err(e) = self.mark_started(task_id).await {
            warn!(task = name, task_id = %task_id, error = %e, "Failed to mark task started");
        }
        debug!(task = name, task_id = %task_id, "Task started");

        let ctx = TaskContext {
            worker: Arc::clone(&self.worker),
            broker: Arc::clone(self) as Arc<dyn Broker>,
            task_id,
        };
        handler.run(ctx, args).await.map_err(|e| format!("{:#}", e))
    }

    async fn fail_remaining(&self, steps: &[(Uuid, TaskSignature)]) {
        for (task_id, step) in steps {
            let outcome = Err("upstream failed".to_string());
            if let Err(e) = self.mark_finished(*task_id, &outcome).await {
                error!(task = %step.name, task_id = %task_id, error = %e, "Failed to persist task outcome");
            }
        }
    }

    /// Poll until the task finishes or `timeout` elapses
    pub async fn wait_for(&self, task_id: Uuid, timeout: Duration) -> Result<Option<TaskRecord>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.result(task_id).await?;
            let ready = record.as_ref().map(|r| r.status.is_ready()).unwrap_or(false);
            if ready || tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<TaskRecord> {
    let task_id: String = row.get("task_id");
    let status: String = row.get("status");
    let args: String = row.get("args");
    let result: Option<String> = row.get("result");
    Some(TaskRecord {
        task_id: Uuid::parse_str(&task_id).ok()?,
        name: row.get("name"),
        status: TaskStatus::parse(&status)?,
        args: serde_json::from_str(&args).unwrap_or_else(|_| json!({})),
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        error: row.get("error"),
        parent_id: row.get("parent_id"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}

#[async_trait]
impl Broker for LocalBroker {
    fn registered(&self) -> Vec<String> {
        self.registry.names()
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        if self.slots.is_closed() {
            return Err(BrokerError::Unavailable("worker pool closed".to_string()));
        }
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn enqueue(&self, name: &str, args: Value) -> Result<Uuid, BrokerError> {
        self.ensure_registered(name)?;
        let broker = self.handle()?;

        let task_id = Uuid::new_v4();
        self.insert_pending(task_id, name, &args, None).await?;
        info!(task = name, task_id = %task_id, "Task enqueued");

        let name = name.to_string();
        tokio::spawn(async move {
            broker.execute(task_id, name, args).await;
        });
        Ok(task_id)
    }

    async fn enqueue_chain(&self, steps: Vec<TaskSignature>) -> Result<Vec<Uuid>, BrokerError> {
        if steps.is_empty() {
            return Ok(Vec::new());
        }
        for step in &steps {
            self.ensure_registered(&step.name)?;
        }
        let broker = self.handle()?;

        let mut queued = Vec::with_capacity(steps.len());
        let mut parent = None;
        for step in steps {
            let task_id = Uuid::new_v4();
            self.insert_pending(task_id, &step.name, &step.args, parent).await?;
            parent = Some(task_id);
            queued.push((task_id, step));
        }
        let ids: Vec<Uuid> = queued.iter().map(|(id, _)| *id).collect();
        info!(steps = ids.len(), head = %ids[0], "Task chain enqueued");

        tokio::spawn(async move {
            for (idx, (task_id, step)) in queued.iter().enumerate() {
                let ok = Arc::clone(&broker)
                    .execute(*task_id, step.name.clone(), step.args.clone())
                    .await;
                if !ok {
                    warn!(task = %step.name, task_id = %task_id, "Chain step failed, remaining steps abandoned");
                    broker.fail_remaining(&queued[idx + 1..]).await;
                    break;
                }
            }
        });
        Ok(ids)
    }

    async fn result(&self, task_id: Uuid) -> Result<Option<TaskRecord>, BrokerError> {
        let row = sqlx::query("SELECT * FROM task_results WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(record_from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!(TaskStatus::parse("SUCCESS"), Some(TaskStatus::Success));
        assert_eq!(TaskStatus::parse("success"), None);
        assert!(TaskStatus::Failure.is_ready());
        assert!(!TaskStatus::Started.is_ready());
        assert_eq!(serde_json::to_value(TaskStatus::Pending).unwrap(), json!("PENDING"));
    }
}
