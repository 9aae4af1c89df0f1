//! HTTP task API: create, inspect, cancel and delete tasks.

mod error;
mod routes;
mod service;
mod validate;

pub use error::{ApiError, Result};
pub use routes::{AppState, build_router};
pub use service::TaskService;
pub use validate::build_task;
