//! HTTP boundary integration tests

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fpf_planner::tasks::{Broker, LocalBroker, TaskRegistry, TaskStatus};
use fpf_planner::{build_router, AppState};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

struct TestApp {
    app: Router,
    broker: Arc<LocalBroker>,
    _plans: TempDir,
}

async fn create_test_app(registry: Option<TaskRegistry>) -> TestApp {
    let plans = plans_dir();
    let settings = settings_in(plans.path());
    let pool = memory_pool().await;
    let broker = match registry {
        Some(registry) => broker_with(&pool, &settings, registry),
        None => test_broker(&pool, &settings),
    };
    let state = AppState::new(pool, settings, Arc::clone(&broker) as Arc<dyn Broker>);
    TestApp {
        app: build_router(state),
        broker,
        _plans: plans,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_ok_with_all_tasks() {
    let test = create_test_app(None).await;
    let (status, body) = send(&test.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "fpf-planner");
    assert_eq!(body["db_ok"], true);
    assert_eq!(body["missing_tasks"], json!([]));
}

#[tokio::test]
async fn test_health_degraded_without_critical_tasks() {
    let test = create_test_app(Some(TaskRegistry::new())).await;
    let (status, body) = send(&test.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["missing_tasks"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_config_reports_active_plan() {
    let test = create_test_app(None).await;
    let (status, body) = send(&test.app, "GET", "/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_plan"], TEST_PLAN);
    assert!(body["settings"].is_object());
}

#[tokio::test]
async fn test_run_returns_pollable_task_id() {
    let test = create_test_app(None).await;
    let (status, body) = send(&test.app, "POST", "/run?limit=5", Some(json!({"dry": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["strategy"], "registered_chain");
    assert_eq!(body["mode"], "chain");

    let task_id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
    let record = test
        .broker
        .wait_for(task_id, Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.args, json!({"limit": 5, "dry": true}));

    let (status, polled) = send(&test.app, "GET", &format!("/result/{}", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["status"], "SUCCESS");
    assert_eq!(polled["known"], true);
    assert_eq!(polled["ready"], true);
    assert_eq!(polled["result"]["dry"], true);
}

#[tokio::test]
async fn test_run_rejects_bad_input() {
    let test = create_test_app(None).await;

    let (status, body) = send(&test.app, "POST", "/run?mode=sideways", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(&test.app, "POST", "/run", Some(json!({"limit": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&test.app, "POST", "/run?plan=../x", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("plan"));

    let (status, _) = send(&test.app, "POST", "/run", Some(json!({"plan": "a/b"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_run_unavailable_when_ladder_exhausted() {
    let test = create_test_app(Some(TaskRegistry::new())).await;
    let (status, body) = send(&test.app, "POST", "/run", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "UNAVAILABLE");

    let (_, health) = send(&test.app, "GET", "/health", None).await;
    assert!(health["last_error"].as_str().unwrap().contains("All dispatch strategies failed"));
}

#[tokio::test]
async fn test_result_lookup() {
    let test = create_test_app(None).await;

    let (status, _) = send(&test.app, "GET", "/result/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = Uuid::new_v4();
    let (status, body) = send(&test.app, "POST", &format!("/result/{}", unknown), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["known"], false);
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn test_result_batch() {
    let test = create_test_app(None).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, body) = send(&test.app, "GET", &format!("/result/batch?ids={},{}", a, b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][1]["task_id"], b.to_string());

    let (status, body) = send(
        &test.app,
        "POST",
        "/result/batch",
        Some(json!({"ids": [a.to_string()]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = send(&test.app, "GET", "/result/batch", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let many: Vec<String> = (0..201).map(|_| Uuid::new_v4().to_string()).collect();
    let (status, _) = send(&test.app, "POST", "/result/batch", Some(json!({ "ids": many }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
