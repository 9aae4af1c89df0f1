use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tempo_core::{Clock, TaskId};
use tempo_proto::{
    CreateTaskRequest, CreateTaskResponse, Health, ListTasksParams, LogView, LogsParams,
    RunningCount, TaskDetail, TaskList, TaskLogs,
};
use tempo_storage::TaskStore;
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, Result};
use crate::service::TaskService;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub tasks: TaskService,
}

impl AppState {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: TaskService::new(store, clock),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/cancel", put(cancel_task))
        .route("/tasks/{id}/logs", get(task_logs))
        .route("/users/{user_id}/tasks", get(list_user_tasks))
        .route("/users/{user_id}/tasks/running-count", get(running_count))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Runs a store-bound service call off the async workers.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&TaskService) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let tasks = state.tasks.clone();
    tokio::task::spawn_blocking(move || f(&tasks))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

fn user_path(path: std::result::Result<Path<i64>, PathRejection>) -> Result<i64> {
    path.map(|Path(user_id)| user_id)
        .map_err(|e| ApiError::Validation(format!("userId: {}", e.body_text())))
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateTaskResponse>)> {
    let Json(req) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let id = blocking(&state, move |tasks| tasks.create(req)).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id: id.to_string(),
        }),
    ))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>> {
    let id = TaskId::from(id);
    let task = blocking(&state, move |tasks| tasks.get(&id)).await?;
    Ok(Json(TaskDetail::from(&task)))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>> {
    let id = TaskId::from(id);
    let task = blocking(&state, move |tasks| tasks.cancel(&id)).await?;
    Ok(Json(TaskDetail::from(&task)))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = TaskId::from(id);
    blocking(&state, move |tasks| tasks.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn task_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: std::result::Result<Query<LogsParams>, QueryRejection>,
) -> Result<Json<TaskLogs>> {
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let task_id = TaskId::from(id);

    let lookup = task_id.clone();
    let logs = blocking(&state, move |tasks| tasks.logs(&lookup, params.limit)).await?;

    Ok(Json(TaskLogs {
        task_id: task_id.to_string(),
        logs: logs.iter().map(LogView::from).collect(),
    }))
}

async fn list_user_tasks(
    State(state): State<Arc<AppState>>,
    path: std::result::Result<Path<i64>, PathRejection>,
    params: std::result::Result<Query<ListTasksParams>, QueryRejection>,
) -> Result<Json<TaskList>> {
    let user_id = user_path(path)?;
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;

    let (tasks, total) =
        blocking(&state, move |tasks| tasks.list_user_tasks(user_id, &params)).await?;

    Ok(Json(TaskList {
        tasks: tasks.iter().map(TaskDetail::from).collect(),
        total,
    }))
}

async fn running_count(
    State(state): State<Arc<AppState>>,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<RunningCount>> {
    let user_id = user_path(path)?;
    let count = blocking(&state, move |tasks| tasks.running_count(user_id)).await?;
    Ok(Json(count))
}
