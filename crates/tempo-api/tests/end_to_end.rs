//! Tasks created over the API, executed by the scheduler, observed over the API.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt as _;
use serde_json::{Value, json};
use tempo_api::{AppState, build_router};
use tempo_core::ManualClock;
use tempo_network::{DispatchConfig, HttpDispatcher};
use tempo_scheduler::{Scheduler, SchedulerConfig};
use tempo_storage::SqliteTaskStore;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Stack {
    clock: Arc<ManualClock>,
    router: Router,
    scheduler: Scheduler,
}

fn stack() -> Stack {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 4, 22, 10, 0, 0).unwrap(),
    ));
    let store = Arc::new(SqliteTaskStore::open_in_memory(clock.clone()).unwrap());
    let router = build_router(Arc::new(AppState::new(store.clone(), clock.clone())));
    let dispatcher = HttpDispatcher::new(DispatchConfig {
        timeout: StdDuration::from_secs(2),
        connect_timeout: StdDuration::from_millis(500),
        ..DispatchConfig::default()
    })
    .unwrap();
    let scheduler = Scheduler::new(
        store,
        Arc::new(dispatcher),
        clock.clone(),
        SchedulerConfig::default(),
    );

    Stack {
        clock,
        router,
        scheduler,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Value {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    assert!(resp.status().is_success(), "{}", resp.status());
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn run_pass(stack: &Stack) {
    stack.scheduler.tick().await.unwrap();
    stack.scheduler.drain().await;
}

#[tokio::test]
async fn once_task_completes_with_echo_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("echo"))
        .expect(1)
        .mount(&server)
        .await;

    let stack = stack();
    let created = call(
        &stack.router,
        "POST",
        "/tasks",
        Some(json!({
            "type": "once",
            "httpEndpoint": format!("{}/ok", server.uri()),
            "method": "GET",
            "userId": 1001,
            "startTime": "2025-04-22T10:00:02Z"
        })),
    )
    .await;
    let id = created["taskId"].as_str().unwrap().to_owned();

    run_pass(&stack).await;
    let task = call(&stack.router, "GET", &format!("/tasks/{id}"), None).await;
    assert_eq!(task["taskStatus"], "pending", "not due yet");

    stack.clock.advance(Duration::seconds(5));
    run_pass(&stack).await;
    run_pass(&stack).await;

    let task = call(&stack.router, "GET", &format!("/tasks/{id}"), None).await;
    assert_eq!(task["taskStatus"], "completed");
    assert_eq!(task["lastExecution"]["statusCode"], 200);
    assert_eq!(task["lastExecution"]["responseBody"], "echo");
}

#[tokio::test]
async fn unreachable_endpoint_fails_with_transport_marker() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let stack = stack();
    let created = call(
        &stack.router,
        "POST",
        "/tasks",
        Some(json!({
            "type": "once",
            "httpEndpoint": format!("http://127.0.0.1:{port}/hook"),
            "method": "POST",
            "body": {"ping": true},
            "userId": 1001,
            "startTime": "2025-04-22T10:00:00Z"
        })),
    )
    .await;
    let id = created["taskId"].as_str().unwrap().to_owned();

    run_pass(&stack).await;

    let task = call(&stack.router, "GET", &format!("/tasks/{id}"), None).await;
    assert_eq!(task["taskStatus"], "failed");
    let last = &task["lastExecution"];
    assert!(last.get("statusCode").is_none());
    assert_eq!(last["error"]["kind"], "connect");

    let count = call(&stack.router, "GET", "/users/1001/tasks/running-count", None).await;
    assert_eq!(count["runningTasks"], 0);
}

#[tokio::test]
async fn recurring_task_stops_after_max_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let stack = stack();
    let created = call(
        &stack.router,
        "POST",
        "/tasks",
        Some(json!({
            "type": "recurring",
            "httpEndpoint": server.uri(),
            "method": "POST",
            "body": {"data": "example"},
            "userId": 1001,
            "intervalSeconds": 20,
            "stopCondition": {"maxCnt": 2}
        })),
    )
    .await;
    let id = created["taskId"].as_str().unwrap().to_owned();

    for _ in 0..4 {
        run_pass(&stack).await;
        stack.clock.advance(Duration::seconds(20));
    }

    let task = call(&stack.router, "GET", &format!("/tasks/{id}"), None).await;
    assert_eq!(task["taskStatus"], "completed");
    assert_eq!(task["runCount"], 2);

    let logs = call(&stack.router, "GET", &format!("/tasks/{id}/logs"), None).await;
    assert_eq!(logs["logs"].as_array().unwrap().len(), 2);
}
