//! Polling scheduler: finds due tasks, claims them, dispatches them on a
//! bounded worker pool and records each outcome.

mod config;
mod engine;
mod error;
mod outcome;

pub use config::SchedulerConfig;
pub use engine::{Scheduler, TickReport};
pub use error::{Result, SchedulerError};
pub use outcome::plan_transition;
