//! Run Orchestration
//!
//! Wires the pieces together for one collection run: builds the task set,
//! fans it out through the scheduler, folds the outcomes into the aggregate
//! one at a time, and projects the final report.
//!
//! ```text
//! sources ──▶ TaskScheduler ──▶ outcomes ──▶ Aggregate ──▶ Report
//! ```

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::inventory::{project, Aggregate, DeviceKey, Projection, Report};
use crate::scheduler::{TaskDescriptor, TaskOutcome, TaskScheduler, DEFAULT_POOL_SIZE};
use crate::sources;

/// Configuration for one collection run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker-pool ceiling.
    pub pool_size: usize,

    /// Budget for the standard sources.
    pub source_timeout: Duration,

    /// Budget for the slower vendor diagnostics.
    pub diag_timeout: Duration,

    /// Skip the slower diagnostics entirely.
    pub abridged: bool,

    /// Restrict collection and output to one device.
    pub selector: Option<DeviceKey>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            source_timeout: Duration::from_secs(5),
            diag_timeout: Duration::from_secs(8),
            abridged: false,
            selector: None,
        }
    }
}

/// Execute one full collection run and build the report.
///
/// Individual source failures and timeouts only thin out the result; the only
/// error this returns is an orchestration-level fault raised before any work
/// ran.
pub async fn run(config: &RunConfig) -> Result<Report> {
    let scheduler = TaskScheduler::new(config.pool_size)?;

    let mut handles = Vec::new();
    for source in sources::base_sources() {
        handles.push(scheduler.submit(
            TaskDescriptor::new(source, config.source_timeout).with_selector(config.selector),
        ));
    }
    if config.abridged {
        debug!("abridged run; slower diagnostics skipped");
    } else {
        for source in sources::extended_sources() {
            handles.push(scheduler.submit(
                TaskDescriptor::new(source, config.diag_timeout).with_selector(config.selector),
            ));
        }
    }

    // Outcomes fold strictly one at a time: the aggregate is the only shared
    // structure in the run and this loop is its single writer.
    let mut aggregate = Aggregate::new();
    for (info, outcome) in scheduler.await_all(handles).await {
        match outcome {
            TaskOutcome::Completed(partial) => {
                debug!(
                    source = info.source,
                    devices = partial.len(),
                    "folding contribution"
                );
                aggregate.fold(partial);
            }
            TaskOutcome::Failed(err) => {
                warn!(source = info.source, error = %err, "continuing without contribution");
            }
            TaskOutcome::TimedOut => {
                let err = crate::error::Error::SourceTimeout {
                    src: info.source,
                    timeout: info.timeout,
                };
                warn!(source = info.source, error = %err, "continuing without contribution");
            }
        }
    }

    let stats = scheduler.stats();
    info!(
        submitted = stats.submitted,
        completed = stats.completed,
        failed = stats.failed,
        timed_out = stats.timed_out,
        devices = aggregate.len(),
        "collection finished"
    );

    let projection = Projection::default().with_selector(config.selector);
    Ok(Report {
        devices: project(&aggregate, &projection),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.source_timeout, Duration::from_secs(5));
        assert_eq!(config.diag_timeout, Duration::from_secs(8));
        assert!(!config.abridged);
        assert!(config.selector.is_none());
    }

    #[tokio::test]
    async fn test_zero_pool_is_the_fatal_path() {
        let config = RunConfig {
            pool_size: 0,
            ..RunConfig::default()
        };
        let err = run(&config).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_run_survives_missing_utilities() {
        // On a host without the vendor stack every source fails or comes back
        // empty; the run still completes and emits a (possibly empty) report.
        let config = RunConfig {
            abridged: true,
            source_timeout: Duration::from_secs(2),
            ..RunConfig::default()
        };
        let report = run(&config).await.unwrap();
        serde_json::to_string(&report.devices).unwrap();
    }
}
