//! Deep-Merge Aggregator
//!
//! Folds every completed source's partial record into one cumulative mapping.
//! Nested attribute trees merge recursively so that sibling keys contributed
//! by unrelated sources coexist; only conflicting leaves are overwritten, and
//! there the later-folded source wins.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::key::DeviceKey;
use super::{AttributeTree, PartialRecord};

/// The merged per-device record accumulated across all sources for one run.
///
/// Mutated only through [`Aggregate::fold`]; the orchestrator folds outcomes
/// one at a time, so no two merges are ever in progress concurrently.
#[derive(Debug, Default)]
pub struct Aggregate {
    records: BTreeMap<DeviceKey, AttributeTree>,
}

impl Aggregate {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one partial record into the aggregate.
    ///
    /// Keys not yet present are inserted wholesale; keys already present have
    /// their attribute trees deep-merged. Returns `&mut self` for chaining.
    pub fn fold(&mut self, partial: PartialRecord) -> &mut Self {
        for (key, tree) in partial {
            match self.records.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(tree);
                }
                Entry::Occupied(mut slot) => {
                    merge_tree(slot.get_mut(), tree);
                }
            }
        }
        self
    }

    /// Number of devices seen so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up the accumulated tree for one device.
    pub fn get(&self, key: &DeviceKey) -> Option<&AttributeTree> {
        self.records.get(key)
    }

    /// All accumulated records, ordered by device key.
    pub fn records(&self) -> &BTreeMap<DeviceKey, AttributeTree> {
        &self.records
    }
}

/// Recursively merge `incoming` into `existing`.
///
/// Object-vs-object merges descend; any other combination overwrites the
/// existing value at that path (last-writer-wins at the leaf level). A
/// genuine disagreement between sources is not an error, just a debug line.
pub fn merge_tree(existing: &mut AttributeTree, incoming: AttributeTree) {
    match (existing, incoming) {
        (Value::Object(dst), Value::Object(src)) => {
            for (name, value) in src {
                match dst.get_mut(&name) {
                    Some(slot) => merge_tree(slot, value),
                    None => {
                        dst.insert(name, value);
                    }
                }
            }
        }
        (slot, incoming) => {
            if *slot != incoming {
                debug!(existing = %slot, incoming = %incoming, "leaf overwritten during merge");
            }
            *slot = incoming;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(raw: &str) -> DeviceKey {
        DeviceKey::parse(raw).unwrap()
    }

    fn partial(raw: &str, tree: AttributeTree) -> PartialRecord {
        PartialRecord::from([(key(raw), tree)])
    }

    #[test]
    fn test_new_key_inserted_wholesale() {
        let mut agg = Aggregate::new();
        agg.fold(partial("0000:09:00.0", json!({"location": {"slot": "PCI-E Slot 1"}})));

        assert_eq!(agg.len(), 1);
        assert_eq!(
            agg.get(&key("0000:09:00.0")).unwrap()["location"]["slot"],
            "PCI-E Slot 1"
        );
    }

    #[test]
    fn test_disjoint_subtrees_union() {
        let mut agg = Aggregate::new();
        agg.fold(partial("0000:09:00.0", json!({"location": {"slot": "PCI-E Slot 1"}})))
            .fold(partial("0000:09:00.0", json!({"product": {"name": "X"}})));

        let tree = agg.get(&key("0000:09:00.0")).unwrap();
        assert_eq!(tree["location"]["slot"], "PCI-E Slot 1");
        assert_eq!(tree["product"]["name"], "X");
    }

    #[test]
    fn test_sibling_leaves_preserved_under_shared_parent() {
        let mut agg = Aggregate::new();
        agg.fold(partial("0000:09:00.0", json!({"product": {"name": "X"}})))
            .fold(partial("0000:09:00.0", json!({"product": {"serialNumber": "abc123"}})));

        let product = &agg.get(&key("0000:09:00.0")).unwrap()["product"];
        assert_eq!(product["name"], "X");
        assert_eq!(product["serialNumber"], "abc123");
    }

    #[test]
    fn test_conflicting_leaf_last_writer_wins() {
        let mut agg = Aggregate::new();
        agg.fold(partial("0000:09:00.0", json!({"product": {"name": "first"}})))
            .fold(partial("0000:09:00.0", json!({"product": {"name": "second"}})));

        assert_eq!(
            agg.get(&key("0000:09:00.0")).unwrap()["product"]["name"],
            "second"
        );
    }

    #[test]
    fn test_scalar_replaced_by_subtree_and_back() {
        let mut tree = json!({"status": "ok"});
        merge_tree(&mut tree, json!({"status": {"usage": {"temp": "57.00 C"}}}));
        assert_eq!(tree["status"]["usage"]["temp"], "57.00 C");

        merge_tree(&mut tree, json!({"status": "degraded"}));
        assert_eq!(tree["status"], "degraded");
    }

    #[test]
    fn test_distinct_keys_do_not_interact() {
        let mut agg = Aggregate::new();
        agg.fold(partial("0000:09:00.0", json!({"location": {"slot": "PCI-E Slot 1"}})))
            .fold(partial("0000:0a:00.0", json!({"location": {"slot": "PCI-E Slot 2"}})));

        assert_eq!(agg.len(), 2);
        assert_eq!(
            agg.get(&key("0000:0a:00.0")).unwrap()["location"]["slot"],
            "PCI-E Slot 2"
        );
    }

    #[test]
    fn test_fold_order_irrelevant_for_disjoint_paths() {
        let p1 = partial("0000:09:00.0", json!({"location": {"slot": "PCI-E Slot 1"}}));
        let p2 = partial("0000:09:00.0", json!({"product": {"name": "X"}}));
        let p3 = partial("0000:09:00.0", json!({"hardwareId": {"vendor": "0x1002"}}));

        let mut forward = Aggregate::new();
        forward.fold(p1.clone()).fold(p2.clone()).fold(p3.clone());

        let mut shuffled = Aggregate::new();
        shuffled.fold(p2).fold(p1).fold(p3);

        assert_eq!(forward.records(), shuffled.records());
    }

    #[test]
    fn test_empty_partial_is_a_noop() {
        let mut agg = Aggregate::new();
        agg.fold(partial("0000:09:00.0", json!({"instanceId": 0})));
        agg.fold(PartialRecord::new());

        assert_eq!(agg.len(), 1);
    }
}
