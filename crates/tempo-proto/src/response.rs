use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempo_core::{
    ExecutionLog, ExecutionOutcome, ExecutionRecord, HttpMethod, Recurrence, Task, TaskStatus,
    TransportErrorKind,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task_id: String,
}

/// Full projection of a task as returned by `GET /tasks/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub http_endpoint: String,
    pub method: HttpMethod,
    pub user_id: i64,
    pub task_status: TaskStatus,
    pub next_run_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    pub run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<ExecutionView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskDetail {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            kind: task.kind.as_str().to_owned(),
            http_endpoint: task.endpoint.clone(),
            method: task.method,
            user_id: task.user_id,
            task_status: task.status,
            next_run_time: task.next_run_time,
            recurrence: task.recurrence.clone(),
            run_count: task.run_count,
            max_runs: task.max_runs,
            last_execution: task.last_execution.as_ref().map(ExecutionView::from),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// `lastExecution`. Transport failures carry `error` and never a status code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionView {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionErrorView {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl From<&ExecutionRecord> for ExecutionView {
    fn from(record: &ExecutionRecord) -> Self {
        let (status_code, response_body, error) = match &record.outcome {
            ExecutionOutcome::Response { status_code, body } => {
                (Some(*status_code), Some(body.clone()), None)
            }
            ExecutionOutcome::TransportError { kind, message } => (
                None,
                None,
                Some(ExecutionErrorView {
                    kind: *kind,
                    message: message.clone(),
                }),
            ),
        };

        Self {
            timestamp: record.executed_at,
            duration_ms: record.duration_ms,
            status_code,
            response_body,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub log_id: String,
    #[serde(flatten)]
    pub execution: ExecutionView,
}

impl From<&ExecutionLog> for LogView {
    fn from(log: &ExecutionLog) -> Self {
        Self {
            log_id: log.id.as_str().to_owned(),
            execution: ExecutionView::from(&log.record),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogs {
    pub task_id: String,
    pub logs: Vec<LogView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskList {
    pub tasks: Vec<TaskDetail>,
    /// All matches, not just this page.
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunningCount {
    pub user_id: i64,
    pub running_tasks: u64,
    pub last_updated: DateTime<Utc>,
}

/// Error payload of every non-2xx API answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    pub version: String,
}
