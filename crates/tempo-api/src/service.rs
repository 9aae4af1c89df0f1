use std::sync::Arc;

use tempo_core::{Clock, ExecutionLog, Task, TaskId, TaskStatus};
use tempo_proto::{CreateTaskRequest, ListTasksParams, RunningCount};
use tempo_storage::{TaskQuery, TaskStore, TransitionUpdate};
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::validate::build_task;

const CANCEL_ATTEMPTS: usize = 3;
const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_LOG_LIMIT: usize = 20;
const MAX_LOG_LIMIT: usize = 100;

/// Task operations behind the HTTP layer. Blocking: every call goes to the
/// store.
#[derive(Debug, Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn create(&self, req: CreateTaskRequest) -> Result<TaskId> {
        let task = build_task(req, self.clock.now())?;
        let id = self.store.insert(&task)?;

        info!(
            task_id = %id,
            kind = %task.kind,
            user_id = task.user_id,
            next_run_time = %task.next_run_time,
            "task created"
        );
        Ok(id)
    }

    pub fn get(&self, id: &TaskId) -> Result<Task> {
        self.store
            .get(id)?
            .ok_or_else(|| ApiError::task_not_found(id))
    }

    /// Cancels a pending task and returns its state afterwards.
    ///
    /// Terminal tasks come back unchanged. A running task also comes back
    /// unchanged: its dispatch is never interrupted.
    pub fn cancel(&self, id: &TaskId) -> Result<Task> {
        for _ in 0..CANCEL_ATTEMPTS {
            let task = self.get(id)?;

            match task.status {
                TaskStatus::Pending => {}
                TaskStatus::Running => {
                    debug!(task_id = %id, "cancel ignored, dispatch in flight");
                    return Ok(task);
                }
                _ => return Ok(task),
            }

            let cancelled = self.store.transition(
                id,
                TaskStatus::Pending,
                TransitionUpdate::to(TaskStatus::Cancelled),
            )?;
            if cancelled {
                info!(task_id = %id, "task cancelled");
                return self.get(id);
            }
            // claimed or cancelled in between, look again
        }

        Err(ApiError::Conflict(format!(
            "task {id} keeps changing state, re-fetch it before retrying"
        )))
    }

    /// Removes a task and its execution log. Running tasks cannot be deleted.
    pub fn delete(&self, id: &TaskId) -> Result<()> {
        let task = self.get(id)?;
        if task.status == TaskStatus::Running {
            return Err(ApiError::Conflict(format!(
                "task {id} is running and cannot be deleted"
            )));
        }

        if !self.store.delete(id, task.status)? {
            return Err(ApiError::Conflict(format!(
                "task {id} changed state, re-fetch it before retrying"
            )));
        }

        info!(task_id = %id, status = %task.status, "task deleted");
        Ok(())
    }

    pub fn list_user_tasks(&self, user_id: i64, params: &ListTasksParams) -> Result<(Vec<Task>, u64)> {
        let status = params
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<TaskStatus>)
            .transpose()
            .map_err(|e| ApiError::Validation(format!("status: {e}")))?;

        let page = params.page.unwrap_or(1);
        if page == 0 {
            return Err(ApiError::Validation("page starts at 1".into()));
        }
        let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&size) {
            return Err(ApiError::Validation(format!(
                "size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let offset = (page - 1)
            .checked_mul(size)
            .ok_or_else(|| ApiError::Validation("page is out of range".into()))?;

        let query = TaskQuery {
            user_id,
            status,
            offset,
            limit: size,
        };
        Ok(self.store.list_for_user(&query)?)
    }

    /// Tasks of `user_id` that have not reached a terminal state.
    pub fn running_count(&self, user_id: i64) -> Result<RunningCount> {
        let running_tasks = self.store.count_active_for_user(user_id)?;
        Ok(RunningCount {
            user_id,
            running_tasks,
            last_updated: self.clock.now(),
        })
    }

    pub fn logs(&self, id: &TaskId, limit: Option<usize>) -> Result<Vec<ExecutionLog>> {
        self.get(id)?;
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
        Ok(self.store.logs(id, limit)?)
    }
}
