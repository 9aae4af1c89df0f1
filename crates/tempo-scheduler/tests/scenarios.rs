//! End-to-end runs against a live mock endpoint.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempo_core::{
    ExecutionOutcome, HttpMethod, ManualClock, Recurrence, RetryPolicy, Task, TaskStatus,
    TransportErrorKind,
};
use tempo_network::{DispatchConfig, HttpDispatcher};
use tempo_scheduler::{Scheduler, SchedulerConfig};
use tempo_storage::{SqliteTaskStore, TaskStore};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 22, 10, 0, 0).unwrap()
}

fn setup(config: SchedulerConfig) -> (Arc<ManualClock>, Arc<SqliteTaskStore>, Scheduler) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(SqliteTaskStore::open_in_memory(clock.clone()).unwrap());
    let dispatcher = HttpDispatcher::new(DispatchConfig {
        timeout: StdDuration::from_secs(2),
        connect_timeout: StdDuration::from_millis(500),
        ..DispatchConfig::default()
    })
    .unwrap();
    let scheduler = Scheduler::new(store.clone(), Arc::new(dispatcher), clock.clone(), config);
    (clock, store, scheduler)
}

#[tokio::test]
async fn once_post_is_delivered_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(header("authorization", "Bearer token123"))
        .and(body_string(r#"{"data":"example"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let (_clock, store, scheduler) = setup(SchedulerConfig::default());
    let task = Task::builder(format!("{}/execute", server.uri()), t0())
        .user_id(1001)
        .method(HttpMethod::Post)
        .header("Authorization", "Bearer token123")
        .body(r#"{"data":"example"}"#)
        .build(t0());
    let id = store.insert(&task).unwrap();

    scheduler.tick().await.unwrap();
    scheduler.drain().await;
    // a second pass must not fire it again
    scheduler.tick().await.unwrap();
    scheduler.drain().await;

    let task = store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        task.last_execution.unwrap().outcome,
        ExecutionOutcome::Response {
            status_code: 200,
            body: "OK".into()
        }
    );
}

#[tokio::test]
async fn interval_task_fires_until_stop_condition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tick"))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&server)
        .await;

    let (clock, store, scheduler) = setup(SchedulerConfig::default());
    let task = Task::builder(format!("{}/tick", server.uri()), t0())
        .recurrence(Recurrence::every_secs(20))
        .max_runs(3)
        .build(t0());
    let id = store.insert(&task).unwrap();

    for _ in 0..5 {
        scheduler.tick().await.unwrap();
        scheduler.drain().await;
        clock.advance(Duration::seconds(20));
    }

    let task = store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.run_count, 3);
    assert_eq!(store.logs(&id, 10).unwrap().len(), 3);
}

#[tokio::test]
async fn missed_occurrences_are_skipped_not_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (clock, store, scheduler) = setup(SchedulerConfig::default());
    let task = Task::builder(server.uri(), t0())
        .recurrence(Recurrence::every_secs(10))
        .build(t0());
    let id = store.insert(&task).unwrap();

    // scheduler was down for a while
    clock.advance(Duration::seconds(95));
    scheduler.tick().await.unwrap();
    scheduler.drain().await;

    let task = store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.next_run_time, t0() + Duration::seconds(100));
}

#[tokio::test]
async fn server_error_is_recorded_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let (clock, store, scheduler) = setup(SchedulerConfig {
        retry: RetryPolicy::builder().max_retries(3).backoff_ms(10).build(),
        ..SchedulerConfig::default()
    });
    let id = store
        .insert(&Task::builder(server.uri(), t0()).build(t0()))
        .unwrap();

    scheduler.tick().await.unwrap();
    scheduler.drain().await;
    clock.advance(Duration::seconds(1));
    scheduler.tick().await.unwrap();
    scheduler.drain().await;

    let task = store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.last_execution.unwrap().status_code(), Some(503));
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_retries_then_fails() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let (clock, store, scheduler) = setup(SchedulerConfig {
        retry: RetryPolicy::builder().max_retries(2).backoff_ms(1_000).build(),
        ..SchedulerConfig::default()
    });
    let id = store
        .insert(&Task::builder(format!("http://127.0.0.1:{port}/"), t0()).build(t0()))
        .unwrap();

    for _ in 0..3 {
        scheduler.tick().await.unwrap();
        scheduler.drain().await;
        clock.advance(Duration::seconds(1));
    }

    let task = store.get(&id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(store.logs(&id, 10).unwrap().len(), 3);
    assert!(matches!(
        task.last_execution.unwrap().outcome,
        ExecutionOutcome::TransportError {
            kind: TransportErrorKind::Connect,
            ..
        }
    ));
}
