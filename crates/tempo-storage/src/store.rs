use std::fmt::Debug;

use chrono::{DateTime, Utc};
use tempo_core::{ExecutionLog, ExecutionRecord, Task, TaskId, TaskStatus};

use crate::error::Result;

/// Field changes applied together with a status compare-and-swap.
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionUpdate {
    pub status: TaskStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
    pub run_count: Option<u32>,
    /// Stored as `last_execution` and appended to the task log.
    pub execution: Option<ExecutionRecord>,
}

impl TransitionUpdate {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            next_run_time: None,
            attempts: None,
            run_count: None,
            execution: None,
        }
    }

    pub fn next_run_time(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_time = Some(at);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn run_count(mut self, run_count: u32) -> Self {
        self.run_count = Some(run_count);
        self
    }

    pub fn execution(mut self, record: ExecutionRecord) -> Self {
        self.execution = Some(record);
        self
    }
}

/// Paging query over one user's tasks, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub user_id: i64,
    pub status: Option<TaskStatus>,
    pub offset: u32,
    pub limit: u32,
}

/// Durable task table. The single source of truth for task state: every
/// status change goes through [`TaskStore::transition`].
pub trait TaskStore: Send + Sync + Debug {
    /// Persists a new task, stamping `created_at`/`updated_at`.
    fn insert(&self, task: &Task) -> Result<TaskId>;

    fn get(&self, id: &TaskId) -> Result<Option<Task>>;

    /// Pending tasks with `next_run_time <= now`, oldest due first.
    fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>>;

    /// Compare-and-swap on status. Returns `false` when the current status is
    /// not `expected`; nothing is written in that case.
    fn transition(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        update: TransitionUpdate,
    ) -> Result<bool>;

    /// Tasks in `status` whose last write is at or before `updated_before`.
    fn list_stale(
        &self,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>>;

    /// Deletes the task and its log if it is still in `expected`.
    fn delete(&self, id: &TaskId, expected: TaskStatus) -> Result<bool>;

    /// One page of tasks plus the total number of matches.
    fn list_for_user(&self, query: &TaskQuery) -> Result<(Vec<Task>, u64)>;

    /// Tasks of `user_id` that are not terminal yet.
    fn count_active_for_user(&self, user_id: i64) -> Result<u64>;

    /// Most recent executions first.
    fn logs(&self, id: &TaskId, limit: usize) -> Result<Vec<ExecutionLog>>;
}
