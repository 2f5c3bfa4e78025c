//! Device Inventory Model
//!
//! The data model shared by every fact source and the aggregation engine:
//! canonical device identity, partial per-source records, the deep-merged
//! aggregate, and the projection into the final document.
//!
//! # Shape
//!
//! ```text
//! source A ──▶ PartialRecord ─┐
//! source B ──▶ PartialRecord ─┼─ fold ─▶ Aggregate ─ project ─▶ Report
//! source C ──▶ PartialRecord ─┘
//! ```
//!
//! Keys are canonical PCI bus addresses; values are recursively nested
//! attribute trees. A device absent from one source's record is not an error;
//! the merge only ever widens a record.

pub mod key;
pub mod merge;
pub mod project;

#[cfg(test)]
mod proptests;

use std::collections::BTreeMap;

pub use key::DeviceKey;
pub use merge::{merge_tree, Aggregate};
pub use project::{lookup_path, project, Projection, Report};

/// A recursively nested mapping of attribute names to scalars or subtrees.
///
/// `serde_json::Value` already is the tagged scalar-or-map recursion the merge
/// needs to pattern-match on, so the model uses it directly.
pub type AttributeTree = serde_json::Value;

/// One source's contribution for one run, keyed by canonical device address.
pub type PartialRecord = BTreeMap<DeviceKey, AttributeTree>;
