//! gpuscan - GPU Inventory and Diagnostics Collector
//!
//! Collects diagnostic and inventory facts about GPU devices from multiple
//! independent, heterogeneous sources (the firmware slot table, vendor
//! utilities, kernel pseudo-filesystems, and the compute API layer) and
//! consolidates them into one record per physical device.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           gpuscan                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Fact Sources │──▶│  Scheduler   │──▶│  Aggregate   │──▶ JSON │
//! │  │  (scrapers)  │   │ (fan-out +   │   │ (deep merge  │         │
//! │  │              │   │  timeouts)   │   │  + project)  │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each source is slow and unreliable in its own way, so the scheduler runs
//! them concurrently on a bounded pool, bounds each one's wall-clock budget
//! individually, and tolerates any subset failing. Whatever completes is
//! deep-merged under canonical PCI bus addresses and projected into a single
//! ordered document.
//!
//! # Modules
//!
//! - [`error`] - Error types
//! - [`ilo`] - BMC REST session client
//! - [`inventory`] - Device identity, partial records, merge, projection
//! - [`orchestrator`] - One collection run end to end
//! - [`scheduler`] - Bounded concurrent task execution with per-task timeouts
//! - [`sources`] - The fact-source port and its implementations

pub mod error;
pub mod ilo;
pub mod inventory;
pub mod orchestrator;
pub mod scheduler;
pub mod sources;

// Re-export commonly used types
pub use error::{Error, Result};
pub use inventory::{Aggregate, AttributeTree, DeviceKey, PartialRecord, Projection, Report};
pub use orchestrator::{run, RunConfig};
pub use scheduler::{TaskDescriptor, TaskOutcome, TaskScheduler};
pub use sources::FactSource;
