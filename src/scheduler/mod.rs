//! Task Scheduler
//!
//! Fans fact-source invocations out onto a bounded worker pool and awaits
//! their outcomes, each against its own deadline.
//!
//! # Contract
//!
//! - Submission never blocks: every descriptor is dispatched before any
//!   outcome is awaited.
//! - The pool bounds how many sources *run* at once; excess tasks queue on
//!   the pool semaphore, and that queue wait counts against their timeout
//!   (a task's deadline is wall-clock from submission).
//! - All outcomes are awaited concurrently, so the total orchestration wait
//!   is bounded by the largest configured timeout, not the sum.
//! - A timeout means "stop waiting", not cancellation: the execution
//!   substrate cannot interrupt in-flight process or filesystem work, so a
//!   timed-out task is detached and may keep consuming resources until it
//!   finishes on its own. Its contribution is discarded either way.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::inventory::{DeviceKey, PartialRecord};
use crate::sources::FactSource;

/// Default worker-pool ceiling. Sources are I/O- and process-bound, so a
/// small pool is enough to overlap their wait time.
pub const DEFAULT_POOL_SIZE: usize = 2;

// =============================================================================
// Descriptors & Outcomes
// =============================================================================

/// One unit of work: a fact source invocation with its own time budget.
pub struct TaskDescriptor {
    /// The source to invoke.
    pub source: Arc<dyn FactSource>,

    /// Optional single-device restriction passed through to the source.
    pub selector: Option<DeviceKey>,

    /// Wall-clock budget measured from submission.
    pub timeout: Duration,
}

impl TaskDescriptor {
    pub fn new(source: Arc<dyn FactSource>, timeout: Duration) -> Self {
        Self {
            source,
            selector: None,
            timeout,
        }
    }

    pub fn with_selector(mut self, selector: Option<DeviceKey>) -> Self {
        self.selector = selector;
        self
    }
}

/// What became of one submitted task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The source returned a partial record within its budget.
    Completed(PartialRecord),
    /// The source failed before producing a record; detail for the log.
    Failed(Error),
    /// The budget elapsed first; the underlying work may still be running.
    TimedOut,
}

/// Identity of a task, reported alongside its outcome.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub source: &'static str,
    pub timeout: Duration,
}

/// Handle to a submitted task, consumed by [`TaskScheduler::await_all`].
pub struct TaskHandle {
    info: TaskInfo,
    submitted_at: Instant,
    join: JoinHandle<Result<PartialRecord>>,
}

impl TaskHandle {
    pub fn info(&self) -> &TaskInfo {
        &self.info
    }
}

/// Counters for one scheduler run.
#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Bounded concurrent executor for fact-source tasks.
#[derive(Debug)]
pub struct TaskScheduler {
    permits: Arc<Semaphore>,
    stats: RwLock<SchedulerStats>,
}

impl TaskScheduler {
    /// Create a scheduler with the given worker-pool ceiling.
    ///
    /// A zero-sized pool is an orchestration-level fault: nothing could ever
    /// run, so this fails loudly instead of producing an empty report.
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::Scheduler(
                "worker pool size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            stats: RwLock::new(SchedulerStats::default()),
        })
    }

    /// Dispatch one task onto the pool. Returns immediately.
    pub fn submit(&self, descriptor: TaskDescriptor) -> TaskHandle {
        let TaskDescriptor {
            source,
            selector,
            timeout,
        } = descriptor;

        let info = TaskInfo {
            source: source.name(),
            timeout,
        };
        let permits = Arc::clone(&self.permits);

        let join = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| Error::Scheduler("worker pool closed".to_string()))?;
            source.collect(selector.as_ref()).await
        });

        self.stats.write().submitted += 1;
        debug!(source = info.source, timeout = ?info.timeout, "task submitted");

        TaskHandle {
            info,
            submitted_at: Instant::now(),
            join,
        }
    }

    /// Await every task's outcome concurrently, each against its own
    /// deadline. Outcomes come back in submission order.
    pub async fn await_all(&self, handles: Vec<TaskHandle>) -> Vec<(TaskInfo, TaskOutcome)> {
        join_all(handles.into_iter().map(|handle| self.await_one(handle))).await
    }

    async fn await_one(&self, handle: TaskHandle) -> (TaskInfo, TaskOutcome) {
        let TaskHandle {
            info,
            submitted_at,
            join,
        } = handle;

        let remaining = info.timeout.saturating_sub(submitted_at.elapsed());
        let outcome = match tokio::time::timeout(remaining, join).await {
            Err(_elapsed) => {
                // Dropping the join handle detaches the task; it is never
                // aborted mid-I/O, only ignored from here on.
                warn!(
                    source = info.source,
                    timeout = ?info.timeout,
                    "task did not return within its timeout; proceeding without it"
                );
                self.stats.write().timed_out += 1;
                TaskOutcome::TimedOut
            }
            Ok(Err(join_err)) => {
                warn!(source = info.source, error = %join_err, "task aborted");
                self.stats.write().failed += 1;
                TaskOutcome::Failed(Error::SourceFailed {
                    src: info.source,
                    reason: join_err.to_string(),
                })
            }
            Ok(Ok(Err(err))) => {
                warn!(source = info.source, error = %err, "task failed");
                self.stats.write().failed += 1;
                TaskOutcome::Failed(err)
            }
            Ok(Ok(Ok(partial))) => {
                debug!(
                    source = info.source,
                    devices = partial.len(),
                    "task completed"
                );
                self.stats.write().completed += 1;
                TaskOutcome::Completed(partial)
            }
        };

        (info, outcome)
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.read().clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    /// Source that sleeps, then reports one device attribute.
    struct SleepingSource {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl FactSource for SleepingSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
            tokio::time::sleep(self.delay).await;
            let key = DeviceKey::new(0, 0x0e, 0, 0);
            Ok(PartialRecord::from([(key, json!({"probe": self.name}))]))
        }
    }

    /// Source that always fails.
    struct FailingSource;

    #[async_trait]
    impl FactSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn collect(&self, _selector: Option<&DeviceKey>) -> Result<PartialRecord> {
            Err(Error::CommandFailed {
                command: "/usr/bin/agi -i".to_string(),
                reason: "exit status 1".to_string(),
            })
        }
    }

    fn sleeping(name: &'static str, secs: u64) -> Arc<dyn FactSource> {
        Arc::new(SleepingSource {
            name,
            delay: Duration::from_secs(secs),
        })
    }

    #[test]
    fn test_zero_sized_pool_is_fatal() {
        let err = TaskScheduler::new(0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_task_completes() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let handle = scheduler.submit(TaskDescriptor::new(
            sleeping("fast", 1),
            Duration::from_secs(5),
        ));

        let outcomes = scheduler.await_all(vec![handle]).await;
        assert_matches!(outcomes[0].1, TaskOutcome::Completed(_));
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_times_out() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let handle = scheduler.submit(TaskDescriptor::new(
            sleeping("slow", 60),
            Duration::from_secs(1),
        ));

        let outcomes = scheduler.await_all(vec![handle]).await;
        assert_matches!(outcomes[0].1, TaskOutcome::TimedOut);
        assert_eq!(scheduler.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_block_siblings() {
        let scheduler = TaskScheduler::new(4).unwrap();
        let slow = scheduler.submit(TaskDescriptor::new(
            sleeping("slow", 600),
            Duration::from_secs(2),
        ));
        let fast = scheduler.submit(TaskDescriptor::new(
            sleeping("fast", 1),
            Duration::from_secs(30),
        ));

        let started = Instant::now();
        let outcomes = scheduler.await_all(vec![slow, fast]).await;

        assert_matches!(outcomes[0].1, TaskOutcome::TimedOut);
        assert_matches!(outcomes[1].1, TaskOutcome::Completed(_));
        // Concurrent awaiting: total wait tracks the largest deadline in
        // play, not the sum of all of them.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let failing = scheduler.submit(TaskDescriptor::new(
            Arc::new(FailingSource),
            Duration::from_secs(5),
        ));
        let fast = scheduler.submit(TaskDescriptor::new(
            sleeping("fast", 1),
            Duration::from_secs(5),
        ));

        let outcomes = scheduler.await_all(vec![failing, fast]).await;

        assert_matches!(
            outcomes[0].1,
            TaskOutcome::Failed(Error::CommandFailed { .. })
        );
        assert_matches!(outcomes[1].1, TaskOutcome::Completed(_));

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_queues_and_still_completes() {
        // Pool of one: the second task waits for the first's permit, and its
        // queue wait burns its own budget, not anyone else's.
        let scheduler = TaskScheduler::new(1).unwrap();
        let first = scheduler.submit(TaskDescriptor::new(
            sleeping("first", 2),
            Duration::from_secs(10),
        ));
        let second = scheduler.submit(TaskDescriptor::new(
            sleeping("second", 2),
            Duration::from_secs(10),
        ));

        let outcomes = scheduler.await_all(vec![first, second]).await;
        assert_matches!(outcomes[0].1, TaskOutcome::Completed(_));
        assert_matches!(outcomes[1].1, TaskOutcome::Completed(_));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_wait_counts_against_timeout() {
        let scheduler = TaskScheduler::new(1).unwrap();
        // Occupies the only worker for 8 virtual seconds.
        let hog = scheduler.submit(TaskDescriptor::new(
            sleeping("hog", 8),
            Duration::from_secs(30),
        ));
        // Would finish in 1s once running, but its 3s budget started at
        // submission and the pool stays busy past it.
        let starved = scheduler.submit(TaskDescriptor::new(
            sleeping("starved", 1),
            Duration::from_secs(3),
        ));

        let outcomes = scheduler.await_all(vec![hog, starved]).await;
        assert_matches!(outcomes[0].1, TaskOutcome::Completed(_));
        assert_matches!(outcomes[1].1, TaskOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_in_submission_order() {
        let scheduler = TaskScheduler::new(4).unwrap();
        let handles = vec![
            scheduler.submit(TaskDescriptor::new(
                sleeping("third-to-finish", 3),
                Duration::from_secs(10),
            )),
            scheduler.submit(TaskDescriptor::new(
                sleeping("first-to-finish", 1),
                Duration::from_secs(10),
            )),
            scheduler.submit(TaskDescriptor::new(
                sleeping("second-to-finish", 2),
                Duration::from_secs(10),
            )),
        ];

        let outcomes = scheduler.await_all(handles).await;
        let names: Vec<&str> = outcomes.iter().map(|(info, _)| info.source).collect();
        assert_eq!(
            names,
            vec!["third-to-finish", "first-to-finish", "second-to-finish"]
        );
    }
}
