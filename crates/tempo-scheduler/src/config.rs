use std::time::Duration;

use tempo_core::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Upper bound on tasks claimed per tick.
    pub batch_size: usize,
    /// Dispatches allowed in flight at once.
    pub workers: usize,
    /// A task left in `running` this long without a result is reaped.
    /// Must exceed the dispatcher timeout.
    pub stale_after: Duration,
    /// Ceiling for the poll delay while the store is unavailable.
    pub max_store_backoff: Duration,
    /// Terminalize `once` tasks as failed on non-2xx answers.
    pub fail_on_non_success: bool,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            workers: 32,
            stale_after: Duration::from_secs(60),
            max_store_backoff: Duration::from_secs(30),
            fail_on_non_success: false,
            retry: RetryPolicy::default(),
        }
    }
}
