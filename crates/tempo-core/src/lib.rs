//! Domain model of the tempo task timer: tasks, their lifecycle, recurrence
//! rules, retry policy and time handling.

mod backoff;
mod clock;
mod execution;
mod ids;
mod schedule;
mod task;
mod time;

pub use backoff::{BackoffStrategy, RetryPolicy, RetryPolicyBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use execution::{ExecutionLog, ExecutionOutcome, ExecutionRecord, TransportErrorKind};
pub use ids::{LogId, TaskId};
pub use schedule::{Recurrence, ScheduleError};
pub use task::{
    HttpMethod, Task, TaskBuilder, TaskKind, TaskStatus, TaskTransitionError, UnknownStatus,
};
pub use time::{TimeError, format_instant, parse_instant};
