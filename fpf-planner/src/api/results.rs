//! Task result polling
//!
//! GET|POST /result/{task_id}, GET|POST /result/batch

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::tasks::{Broker, TaskRecord, TaskStatus};
use crate::AppState;

/// Maximum ids per batch request
const MAX_BATCH: usize = 200;

#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: Uuid,
    /// Unknown ids report `PENDING`, as a task may not be persisted yet
    pub status: TaskStatus,
    pub known: bool,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl TaskResultResponse {
    fn from_record(task_id: Uuid, record: Option<TaskRecord>) -> Self {
        match record {
            Some(r) => Self {
                task_id,
                status: r.status,
                known: true,
                ready: r.status.is_ready(),
                name: Some(r.name),
                result: r.result,
                error: r.error,
                parent_id: r.parent_id,
                finished_at: r.finished_at,
            },
            None => Self {
                task_id,
                status: TaskStatus::Pending,
                known: false,
                ready: false,
                name: None,
                result: None,
                error: None,
                parent_id: None,
                finished_at: None,
            },
        }
    }
}

fn parse_task_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest(format!("Invalid task id: {}", raw)))
}

async fn lookup(broker: &dyn Broker, task_id: Uuid) -> ApiResult<TaskResultResponse> {
    let record = broker
        .result(task_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(TaskResultResponse::from_record(task_id, record))
}

/// GET|POST /result/{task_id}
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskResultResponse>> {
    let task_id = parse_task_id(&task_id)?;
    Ok(Json(lookup(state.broker.as_ref(), task_id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BatchQuery {
    /// Comma-separated task ids
    pub ids: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub count: usize,
    pub results: Vec<TaskResultResponse>,
}

/// GET|POST /result/batch?ids=a,b or body `{"ids": [...]}`
pub async fn get_batch(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
    body: Bytes,
) -> ApiResult<Json<BatchResponse>> {
    let mut raw_ids: Vec<String> = query
        .ids
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if !body.iter().all(u8::is_ascii_whitespace) {
        let parsed: BatchBody = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        raw_ids.extend(parsed.ids);
    }

    if raw_ids.is_empty() {
        return Err(ApiError::BadRequest("No task ids given".to_string()));
    }
    if raw_ids.len() > MAX_BATCH {
        return Err(ApiError::BadRequest(format!(
            "Too many task ids: {} (max {})",
            raw_ids.len(),
            MAX_BATCH
        )));
    }

    let ids = raw_ids
        .iter()
        .map(|raw| parse_task_id(raw))
        .collect::<ApiResult<Vec<Uuid>>>()?;

    let mut results = Vec::with_capacity(ids.len());
    for task_id in ids {
        results.push(lookup(state.broker.as_ref(), task_id).await?);
    }

    Ok(Json(BatchResponse {
        count: results.len(),
        results,
    }))
}

pub fn result_routes() -> Router<AppState> {
    Router::new()
        .route("/result/batch", get(get_batch).post(get_batch))
        .route("/result/:task_id", get(get_result).post(get_result))
}
