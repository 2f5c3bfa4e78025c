//! Fact Sources
//!
//! Boundary adapters that fetch raw facts about GPU devices from one external
//! source each and return them as a partial record keyed by canonical device
//! address.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Orchestration                             │
//! │                 FactSource (port, this module)                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Sources (implementations)                    │
//! │  SmbiosSlotSource │ AdapterListSource │ AgiInstanceSource        │
//! │  AgiStatusSource  │ AgiSerialSource   │ SysfsPciSource           │
//! │  DriverClientsSource │ VbiosVersionSource │ ComputeApiSource     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sources never share state and never call each other; each one scrapes its
//! utility or pseudo-filesystem, resolves the addresses it saw into canonical
//! keys, and hands back an immutable partial record. Retry policy, timeouts,
//! and merging all belong to the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::inventory::{DeviceKey, PartialRecord};

mod agi;
mod aticonfig;
mod opencl;
mod procfs;
mod smbios;
mod sysfs;

pub use agi::{AgiInstanceSource, AgiSerialSource, AgiStatusSource};
pub use aticonfig::AdapterListSource;
pub use opencl::ComputeApiSource;
pub use procfs::{DriverClientsSource, VbiosVersionSource};
pub use smbios::SmbiosSlotSource;
pub use sysfs::SysfsPciSource;

// =============================================================================
// Port
// =============================================================================

/// Port for one external fact source.
///
/// `collect` takes at most one contextual argument (an optional single-device
/// restriction) and returns the complete partial record for this source, or
/// an error. Implementations must not retry internally: a failure is final
/// for the run.
#[async_trait]
pub trait FactSource: Send + Sync {
    /// Stable name used in logs and task outcomes.
    fn name(&self) -> &'static str;

    /// Collect this source's contribution.
    async fn collect(&self, selector: Option<&DeviceKey>) -> Result<PartialRecord>;
}

// =============================================================================
// Source Sets
// =============================================================================

/// The sources every run submits.
pub fn base_sources() -> Vec<Arc<dyn FactSource>> {
    vec![
        Arc::new(SmbiosSlotSource::new()),
        Arc::new(AdapterListSource::new()),
        Arc::new(DriverClientsSource::new()),
        Arc::new(VbiosVersionSource::new()),
        Arc::new(SysfsPciSource::new()),
        Arc::new(ComputeApiSource::new()),
    ]
}

/// The slower vendor diagnostics, skipped in abridged mode.
pub fn extended_sources() -> Vec<Arc<dyn FactSource>> {
    vec![
        Arc::new(AgiInstanceSource::new()),
        Arc::new(AgiStatusSource::new()),
        Arc::new(AgiSerialSource::new()),
    ]
}

// =============================================================================
// Command Execution
// =============================================================================

/// Run an external utility and capture its stdout.
///
/// A missing binary or a non-zero exit is a source failure, not a crash; the
/// caller surfaces it as this task's outcome and the run continues.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    tracing::info!(command = %format!("{program} {}", args.join(" ")), "running");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|err| Error::CommandFailed {
            command: program.to_string(),
            reason: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            reason: format!("exit status {}", output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
