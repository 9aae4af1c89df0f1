//! JSON wire types of the tempo task API. Field names are camelCase.

mod request;
mod response;

pub use request::{CreateTaskRequest, ListTasksParams, LogsParams, StopCondition};
pub use response::{
    CreateTaskResponse, ErrorBody, ExecutionErrorView, ExecutionView, Health, LogView, RunningCount,
    TaskDetail, TaskList, TaskLogs,
};
