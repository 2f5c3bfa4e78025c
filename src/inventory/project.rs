//! Result Projector
//!
//! Turns the merged aggregate into the final ordered document: drops entries
//! that never produced the required attribute set (platform slots with no
//! card installed), sorts the rest by a display attribute, and wraps them in
//! the stable `{"devices": [..]}` top-level shape.

use serde::Serialize;
use serde_json::Value;

use super::key::DeviceKey;
use super::merge::Aggregate;
use super::AttributeTree;
use crate::error::Result;

/// How to order, filter, and select records for the final document.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Dotted attribute path supplying the sort key; records missing it sort
    /// first via an empty-string fallback.
    pub sort_path: String,

    /// Dotted attribute path a record must carry to count as a recognized
    /// device (e.g. product information).
    pub required_path: String,

    /// Restrict output to exactly this device, bypassing the required-path
    /// rule.
    pub selector: Option<DeviceKey>,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            sort_path: "location.slot".to_string(),
            required_path: "product".to_string(),
            selector: None,
        }
    }
}

impl Projection {
    /// Restrict the projection to a single device.
    pub fn with_selector(mut self, selector: Option<DeviceKey>) -> Self {
        self.selector = selector;
        self
    }
}

/// The emitted document: an ordered list of per-device attribute trees.
#[derive(Debug, Serialize)]
pub struct Report {
    pub devices: Vec<AttributeTree>,
}

impl Report {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Project the aggregate into the final ordered record list.
///
/// Ordering is total and stable: ascending by the sort attribute
/// (string-lexicographic), ties broken by device key ascending.
pub fn project(aggregate: &Aggregate, projection: &Projection) -> Vec<AttributeTree> {
    let mut selected: Vec<(String, &DeviceKey, &AttributeTree)> = aggregate
        .records()
        .iter()
        .filter(|(key, tree)| match &projection.selector {
            Some(selector) => *key == selector,
            None => lookup_path(tree, &projection.required_path).is_some(),
        })
        .map(|(key, tree)| (sort_value(tree, &projection.sort_path), key, tree))
        .collect();

    selected.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

    selected.into_iter().map(|(_, _, tree)| tree.clone()).collect()
}

/// Walk a dotted attribute path ("location.slot") through a nested tree.
pub fn lookup_path<'a>(tree: &'a AttributeTree, path: &str) -> Option<&'a Value> {
    let mut current = tree;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn sort_value(tree: &AttributeTree, path: &str) -> String {
    match lookup_path(tree, path) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
