use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tempo_core::{
    BackoffStrategy, Clock, ExecutionOutcome, ExecutionRecord, Task, TaskId, TaskStatus,
    TransportErrorKind,
};
use tempo_network::{Dispatch, DispatchError, execution_outcome};
use tempo_storage::{TaskStore, TransitionUpdate};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::outcome::plan_transition;

/// What one polling pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Due tasks returned by the store.
    pub due: usize,
    /// Tasks this pass moved to `running` and handed to a worker.
    pub claimed: Vec<TaskId>,
    /// Due tasks another claimant got first.
    pub skipped: usize,
    /// Due tasks left for a later pass because no worker was free.
    pub deferred: usize,
    /// Stale `running` tasks resolved by the reaper.
    pub reaped: usize,
}

struct Shared {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<dyn Dispatch>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

/// Polls the store for due tasks, claims them and runs each dispatch on a
/// bounded worker pool.
///
/// Several schedulers may share one store: a claim is a compare-and-swap from
/// `pending` to `running`, so every due occurrence is dispatched at most once.
pub struct Scheduler {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("free_workers", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<dyn Dispatch>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        Self {
            shared: Arc::new(Shared {
                store,
                dispatcher,
                clock,
                config,
            }),
            permits: Arc::new(Semaphore::new(workers)),
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Executions spawned and not yet joined.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// One polling pass: reap stale runs, then claim and spawn due tasks up to
    /// the number of free workers and the batch size.
    ///
    /// Returns once the claimed tasks are spawned; their dispatches keep
    /// running in the background.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport {
            reaped: self.shared.reap_stale().await?,
            ..TickReport::default()
        };

        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "task execution aborted");
            }
        }

        let capacity = self
            .permits
            .available_permits()
            .min(self.shared.config.batch_size);
        if capacity == 0 {
            debug!("all workers busy, skipping poll");
            return Ok(report);
        }

        let now = self.shared.clock.now();
        let due = self
            .shared
            .blocking(move |store| store.list_due(now, capacity))
            .await?;
        report.due = due.len();

        for mut task in due {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                report.deferred += 1;
                continue;
            };

            let id = task.id.clone();
            let claimed = self
                .shared
                .blocking(move |store| {
                    store.transition(
                        &id,
                        TaskStatus::Pending,
                        TransitionUpdate::to(TaskStatus::Running),
                    )
                })
                .await?;
            if !claimed {
                debug!(task_id = %task.id, "task claimed elsewhere");
                report.skipped += 1;
                continue;
            }

            task.status = TaskStatus::Running;
            report.claimed.push(task.id.clone());

            let shared = Arc::clone(&self.shared);
            in_flight.spawn(async move {
                shared.execute(task).await;
                drop(permit);
            });
        }

        if !report.claimed.is_empty() {
            debug!(
                due = report.due,
                claimed = report.claimed.len(),
                skipped = report.skipped,
                deferred = report.deferred,
                "poll finished"
            );
        }

        Ok(report)
    }

    /// Runs the polling loop until `shutdown` fires, then waits for in-flight
    /// executions to record their results.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let config = &self.shared.config;
        let store_backoff = BackoffStrategy::Exponential {
            base: config.poll_interval,
            factor: 2,
            max_delay: config.max_store_backoff.max(config.poll_interval),
        };
        let mut failures: u32 = 0;

        info!(
            poll_interval_ms = config.poll_interval.as_millis(),
            workers = config.workers,
            batch_size = config.batch_size,
            "scheduler started"
        );

        loop {
            let delay = match self.tick().await {
                Ok(_) => {
                    failures = 0;
                    config.poll_interval
                }
                Err(e) => {
                    let delay = store_backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    error!(
                        error = %e,
                        failures,
                        retry_in_ms = delay.as_millis(),
                        "poll failed, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("scheduler stopping, draining in-flight executions");
        self.drain().await;
        info!("scheduler stopped");
    }

    /// Waits for every spawned execution to finish.
    pub async fn drain(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task execution aborted");
            }
        }
    }
}

impl Shared {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn TaskStore) -> tempo_storage::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let out = tokio::task::spawn_blocking(move || f(store.as_ref())).await??;
        Ok(out)
    }

    async fn execute(&self, task: Task) {
        let started = Instant::now();
        let executed_at = self.clock.now();

        let result = self.dispatcher.dispatch(&task).await;

        let record = ExecutionRecord {
            executed_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome: execution_outcome(&result),
        };
        let update = plan_transition(&task, &result, record, self.clock.now(), &self.config);

        self.finish(&task, update).await;
    }

    async fn finish(&self, task: &Task, update: TransitionUpdate) {
        let status = update.status;
        let status_code = update.execution.as_ref().and_then(|r| r.status_code());
        let id = task.id.clone();

        match self
            .blocking(move |store| store.transition(&id, TaskStatus::Running, update))
            .await
        {
            Ok(true) => info!(
                task_id = %task.id,
                kind = %task.kind,
                status = %status,
                status_code,
                "task execution recorded"
            ),
            Ok(false) => warn!(
                task_id = %task.id,
                "task no longer running, execution result dropped"
            ),
            // left in `running`; the reaper resolves it after `stale_after`
            Err(e) => error!(
                task_id = %task.id,
                error = %e,
                "failed to record execution result"
            ),
        }
    }

    async fn reap_stale(&self) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = ChronoDuration::from_std(self.config.stale_after)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let limit = self.config.batch_size.max(1);

        let stale = self
            .blocking(move |store| store.list_stale(TaskStatus::Running, cutoff, limit))
            .await?;

        let mut reaped = 0;
        for task in stale {
            let message = format!(
                "no result recorded within {}ms of the claim",
                self.config.stale_after.as_millis()
            );
            let result = Err(DispatchError::transport(
                TransportErrorKind::Abandoned,
                message.clone(),
            ));
            let record = ExecutionRecord {
                executed_at: task.updated_at,
                duration_ms: u64::try_from((now - task.updated_at).num_milliseconds())
                    .unwrap_or(0),
                outcome: ExecutionOutcome::TransportError {
                    kind: TransportErrorKind::Abandoned,
                    message,
                },
            };
            let update = plan_transition(&task, &result, record, now, &self.config);
            let next_status = update.status;

            let id = task.id.clone();
            let resolved = self
                .blocking(move |store| store.transition(&id, TaskStatus::Running, update))
                .await?;
            if resolved {
                warn!(
                    task_id = %task.id,
                    status = %next_status,
                    "reaped stale running task"
                );
                reaped += 1;
            }
        }

        Ok(reaped)
    }
}
