use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ExecutionRecord, Recurrence, TaskId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskTransitionError {
    #[error("illegal task transition from {from} to {to}")]
    Illegal {
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn illegal(&self, to: TaskStatus) -> TaskTransitionError {
        TaskTransitionError::Illegal {
            from: self.as_str(),
            to: to.as_str(),
        }
    }

    /// Claim: the only way into `Running`.
    pub fn mark_as_running(&self) -> Result<TaskStatus, TaskTransitionError> {
        match self {
            TaskStatus::Pending => Ok(TaskStatus::Running),
            status => Err(status.illegal(TaskStatus::Running)),
        }
    }

    pub fn mark_as_completed(&self) -> Result<TaskStatus, TaskTransitionError> {
        match self {
            TaskStatus::Running => Ok(TaskStatus::Completed),
            status => Err(status.illegal(TaskStatus::Completed)),
        }
    }

    pub fn mark_as_failed(&self) -> Result<TaskStatus, TaskTransitionError> {
        match self {
            TaskStatus::Running => Ok(TaskStatus::Failed),
            status => Err(status.illegal(TaskStatus::Failed)),
        }
    }

    /// A running task goes back to `Pending` when it has another occurrence
    /// or a retry scheduled.
    pub fn mark_as_requeued(&self) -> Result<TaskStatus, TaskTransitionError> {
        match self {
            TaskStatus::Running => Ok(TaskStatus::Pending),
            status => Err(status.illegal(TaskStatus::Pending)),
        }
    }

    pub fn mark_as_cancelled(&self) -> Result<TaskStatus, TaskTransitionError> {
        match self {
            TaskStatus::Pending | TaskStatus::Running => Ok(TaskStatus::Cancelled),
            status => Err(status.illegal(TaskStatus::Cancelled)),
        }
    }

    /// Checks `self -> to` against the transition graph.
    pub fn transition_to(&self, to: TaskStatus) -> Result<TaskStatus, TaskTransitionError> {
        match to {
            TaskStatus::Pending => self.mark_as_requeued(),
            TaskStatus::Running => self.mark_as_running(),
            TaskStatus::Completed => self.mark_as_completed(),
            TaskStatus::Failed => self.mark_as_failed(),
            TaskStatus::Cancelled => self.mark_as_cancelled(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Once,
    Recurring,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Once => "once",
            TaskKind::Recurring => "recurring",
        }
    }
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(TaskKind::Once),
            "recurring" => Ok(TaskKind::Recurring),
            other => Err(format!("unsupported task type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(format!("unsupported http method: {s}")),
        }
    }
}

/// A schedulable outbound HTTP call.
///
/// All instants are UTC. `next_run_time` is the single active due date for a
/// non-terminal task; the scheduler rewrites it after every occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub user_id: i64,
    pub endpoint: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Serialized request body, sent verbatim.
    pub body: Option<String>,
    pub recurrence: Option<Recurrence>,
    /// Stop after this many executions (recurring tasks only).
    pub max_runs: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub next_run_time: DateTime<Utc>,
    pub status: TaskStatus,
    /// Transport retries consumed by the current occurrence.
    pub attempts: u32,
    pub run_count: u32,
    pub last_execution: Option<ExecutionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn builder(endpoint: impl Into<String>, start_time: DateTime<Utc>) -> TaskBuilder {
        TaskBuilder::new(endpoint.into(), start_time)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_run_time <= now
    }

    /// Whether the next finished occurrence exhausts the stop condition.
    pub fn reaches_max_runs(&self, run_count: u32) -> bool {
        self.max_runs.is_some_and(|max| run_count >= max)
    }
}

#[derive(Debug)]
pub struct TaskBuilder {
    id: TaskId,
    kind: TaskKind,
    user_id: i64,
    endpoint: String,
    method: HttpMethod,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    recurrence: Option<Recurrence>,
    max_runs: Option<u32>,
    start_time: DateTime<Utc>,
}

impl TaskBuilder {
    fn new(endpoint: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            kind: TaskKind::Once,
            user_id: 0,
            endpoint,
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            recurrence: None,
            max_runs: None,
            start_time,
        }
    }

    pub fn id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn user_id(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Makes the task recurring.
    pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
        self.kind = TaskKind::Recurring;
        self.recurrence = Some(recurrence);
        self
    }

    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// `created_at` is provisional; the store stamps the persisted value.
    pub fn build(self, now: DateTime<Utc>) -> Task {
        Task {
            id: self.id,
            kind: self.kind,
            user_id: self.user_id,
            endpoint: self.endpoint,
            method: self.method,
            headers: self.headers,
            body: self.body,
            recurrence: self.recurrence,
            max_runs: self.max_runs,
            start_time: self.start_time,
            next_run_time: self.start_time,
            status: TaskStatus::Pending,
            attempts: 0,
            run_count: 0,
            last_execution: None,
            created_at: now,
            updated_at: now,
        }
    }
}
