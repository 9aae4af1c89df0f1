use std::time::Duration;

use chrono::{DateTime, Utc};
use tempo_core::{ExecutionRecord, Task, TaskKind, TaskStatus};
use tempo_network::{DispatchError, DispatchResponse};
use tracing::{error, warn};

use crate::config::SchedulerConfig;

/// Decides where a running task goes after a dispatch.
///
/// * retryable transport failure with retries left: back to `pending` at
///   `now + backoff`, same occurrence;
/// * `once`: `completed`, or `failed` on transport failure (and on non-2xx
///   when configured);
/// * `recurring`: `pending` at the next occurrence, `completed` once the
///   stop condition is met, `failed` when the rule yields no next run.
pub fn plan_transition(
    task: &Task,
    result: &Result<DispatchResponse, DispatchError>,
    record: ExecutionRecord,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> tempo_storage::TransitionUpdate {
    use tempo_storage::TransitionUpdate;

    let failed = match result {
        Ok(_) => false,
        Err(err @ DispatchError::Transport { .. }) => {
            if err.is_retryable() && config.retry.can_retry(task.attempts) {
                let delay = config.retry.backoff(task.attempts);
                let retry_at = after(now, delay);
                warn!(
                    task_id = %task.id,
                    attempts = task.attempts + 1,
                    delay_ms = delay.as_millis(),
                    "scheduling retry"
                );
                return TransitionUpdate::to(TaskStatus::Pending)
                    .next_run_time(retry_at)
                    .attempts(task.attempts + 1)
                    .execution(record);
            }
            true
        }
        Err(DispatchError::Application { .. }) => config.fail_on_non_success,
    };

    let run_count = task.run_count.saturating_add(1);
    let update = match task.kind {
        TaskKind::Once if failed => TransitionUpdate::to(TaskStatus::Failed),
        TaskKind::Once => TransitionUpdate::to(TaskStatus::Completed),
        TaskKind::Recurring if task.reaches_max_runs(run_count) => {
            TransitionUpdate::to(TaskStatus::Completed)
        }
        TaskKind::Recurring => match &task.recurrence {
            // anchored on start_time: a retry delay must not shift the grid
            Some(rule) => match rule.next_after(task.start_time, now) {
                Ok(next) => TransitionUpdate::to(TaskStatus::Pending).next_run_time(next),
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "recurrence has no next run");
                    TransitionUpdate::to(TaskStatus::Failed)
                }
            },
            None => {
                error!(task_id = %task.id, "recurring task without a recurrence rule");
                TransitionUpdate::to(TaskStatus::Failed)
            }
        },
    };

    update.attempts(0).run_count(run_count).execution(record)
}

pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempo_core::{ExecutionOutcome, Recurrence, RetryPolicy, TransportErrorKind};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 22, 10, 0, 0).unwrap()
    }

    fn record() -> ExecutionRecord {
        ExecutionRecord {
            executed_at: t0(),
            duration_ms: 5,
            outcome: ExecutionOutcome::Response {
                status_code: 200,
                body: String::new(),
            },
        }
    }

    fn ok() -> Result<DispatchResponse, DispatchError> {
        Ok(DispatchResponse {
            status_code: 200,
            body: String::new(),
        })
    }

    fn refused() -> Result<DispatchResponse, DispatchError> {
        Err(DispatchError::transport(
            TransportErrorKind::Connect,
            "connection refused",
        ))
    }

    fn rejected() -> Result<DispatchResponse, DispatchError> {
        Err(DispatchError::Application {
            status_code: 500,
            body: "boom".into(),
        })
    }

    fn once() -> Task {
        Task::builder("http://echo.test/ok", t0()).build(t0())
    }

    fn every_minute() -> Task {
        Task::builder("http://echo.test/ok", t0())
            .recurrence(Recurrence::every_secs(60))
            .build(t0())
    }

    #[test]
    fn once_success_completes() {
        let update = plan_transition(&once(), &ok(), record(), t0(), &SchedulerConfig::default());
        assert_eq!(update.status, TaskStatus::Completed);
        assert_eq!(update.run_count, Some(1));
        assert!(update.execution.is_some());
    }

    #[test]
    fn once_non_success_completes_unless_configured() {
        let config = SchedulerConfig::default();
        let update = plan_transition(&once(), &rejected(), record(), t0(), &config);
        assert_eq!(update.status, TaskStatus::Completed);

        let strict = SchedulerConfig {
            fail_on_non_success: true,
            ..SchedulerConfig::default()
        };
        let update = plan_transition(&once(), &rejected(), record(), t0(), &strict);
        assert_eq!(update.status, TaskStatus::Failed);
    }

    #[test]
    fn transport_failure_without_retries_fails_once_task() {
        let update =
            plan_transition(&once(), &refused(), record(), t0(), &SchedulerConfig::default());
        assert_eq!(update.status, TaskStatus::Failed);
    }

    #[test]
    fn transport_failure_with_retries_left_requeues() {
        let config = SchedulerConfig {
            retry: RetryPolicy::builder().max_retries(2).backoff_ms(500).build(),
            ..SchedulerConfig::default()
        };
        let mut task = once();

        let update = plan_transition(&task, &refused(), record(), t0(), &config);
        assert_eq!(update.status, TaskStatus::Pending);
        assert_eq!(update.attempts, Some(1));
        assert_eq!(
            update.next_run_time,
            Some(t0() + ChronoDuration::milliseconds(500))
        );
        assert_eq!(update.run_count, None);

        task.attempts = 2;
        let update = plan_transition(&task, &refused(), record(), t0(), &config);
        assert_eq!(update.status, TaskStatus::Failed);
    }

    #[test]
    fn non_retryable_transport_failure_skips_retries() {
        let config = SchedulerConfig {
            retry: RetryPolicy::builder().max_retries(5).build(),
            ..SchedulerConfig::default()
        };
        let bad_request = Err(DispatchError::transport(
            TransportErrorKind::Request,
            "invalid header",
        ));
        let update = plan_transition(&once(), &bad_request, record(), t0(), &config);
        assert_eq!(update.status, TaskStatus::Failed);
    }

    #[test]
    fn recurring_advances_to_next_occurrence() {
        let now = t0() + ChronoDuration::seconds(2);
        let update =
            plan_transition(&every_minute(), &ok(), record(), now, &SchedulerConfig::default());
        assert_eq!(update.status, TaskStatus::Pending);
        assert_eq!(
            update.next_run_time,
            Some(t0() + ChronoDuration::seconds(60))
        );
        assert_eq!(update.attempts, Some(0));
    }

    #[test]
    fn recurring_failure_still_advances() {
        let update = plan_transition(
            &every_minute(),
            &refused(),
            record(),
            t0(),
            &SchedulerConfig::default(),
        );
        assert_eq!(update.status, TaskStatus::Pending);
        assert_eq!(update.run_count, Some(1));
    }

    #[test]
    fn exhausted_retries_keep_the_interval_grid() {
        let config = SchedulerConfig {
            retry: RetryPolicy::builder().max_retries(1).backoff_ms(1_500).build(),
            ..SchedulerConfig::default()
        };
        let mut task = every_minute();
        task.attempts = 1;
        task.next_run_time = t0() + ChronoDuration::milliseconds(61_500);

        let now = t0() + ChronoDuration::milliseconds(61_600);
        let update = plan_transition(&task, &refused(), record(), now, &config);
        assert_eq!(update.status, TaskStatus::Pending);
        assert_eq!(
            update.next_run_time,
            Some(t0() + ChronoDuration::seconds(120))
        );
        assert_eq!(update.attempts, Some(0));
    }

    #[test]
    fn recurring_stops_at_max_runs() {
        let mut task = every_minute();
        task.max_runs = Some(3);
        task.run_count = 2;

        let update = plan_transition(&task, &ok(), record(), t0(), &SchedulerConfig::default());
        assert_eq!(update.status, TaskStatus::Completed);
        assert_eq!(update.run_count, Some(3));
    }

    #[test]
    fn recurring_with_invalid_rule_fails() {
        let mut task = every_minute();
        task.recurrence = Some(Recurrence::every_secs(0));

        let update = plan_transition(&task, &ok(), record(), t0(), &SchedulerConfig::default());
        assert_eq!(update.status, TaskStatus::Failed);
    }
}
