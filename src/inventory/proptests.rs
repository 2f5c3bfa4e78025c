//! Property-Based Tests for the Deep-Merge Aggregator
//!
//! Systematically verifies the merge invariants from the aggregation
//! contract:
//!
//! 1. **Union**: merging records with disjoint attribute paths yields the
//!    union of both trees, unchanged.
//! 2. **Order independence**: for disjoint paths, any fold order produces an
//!    identical aggregate.
//! 3. **Last-writer-wins**: for overlapping leaf paths, the final fold's
//!    value survives, deterministically, given a fixed fold order.

#![cfg(test)]

use proptest::prelude::*;
use serde_json::{json, Value};

use super::key::DeviceKey;
use super::merge::Aggregate;
use super::PartialRecord;

// =============================================================================
// Strategies
// =============================================================================

/// Strategy for a small pool of device keys (bus varies, rest fixed).
fn device_key_strategy() -> impl Strategy<Value = DeviceKey> {
    (0u8..8).prop_map(|bus| DeviceKey::new(0, bus, 0, 0))
}

/// Strategy for scalar leaf values.
fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z]{1,12}".prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

/// A partial record whose attribute names all carry the given prefix, so two
/// records built with different prefixes never share a leaf path.
fn prefixed_partial_strategy(prefix: &'static str) -> impl Strategy<Value = PartialRecord> {
    prop::collection::btree_map(
        device_key_strategy(),
        prop::collection::btree_map("[a-z]{1,6}", leaf_strategy(), 1..4),
        1..5,
    )
    .prop_map(move |records| {
        records
            .into_iter()
            .map(|(key, attrs)| {
                let tree: Value = attrs
                    .into_iter()
                    .map(|(name, value)| (format!("{prefix}_{name}"), value))
                    .collect::<serde_json::Map<String, Value>>()
                    .into();
                let mut outer = serde_json::Map::new();
                outer.insert(prefix.to_string(), tree);
                (key, Value::Object(outer))
            })
            .collect()
    })
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: disjoint-path partials merge into the union of both trees.
    #[test]
    fn prop_disjoint_merge_is_union(
        p1 in prefixed_partial_strategy("loc"),
        p2 in prefixed_partial_strategy("prod"),
    ) {
        let mut agg = Aggregate::new();
        agg.fold(p1.clone()).fold(p2.clone());

        for (key, tree) in &p1 {
            let merged = agg.get(key).unwrap();
            prop_assert_eq!(merged.get("loc"), tree.get("loc"));
        }
        for (key, tree) in &p2 {
            let merged = agg.get(key).unwrap();
            prop_assert_eq!(merged.get("prod"), tree.get("prod"));
        }
    }

    /// Property: for disjoint paths, fold order does not change the result.
    #[test]
    fn prop_disjoint_merge_is_order_independent(
        p1 in prefixed_partial_strategy("loc"),
        p2 in prefixed_partial_strategy("prod"),
        p3 in prefixed_partial_strategy("hw"),
    ) {
        let mut forward = Aggregate::new();
        forward.fold(p1.clone()).fold(p2.clone()).fold(p3.clone());

        let mut swapped = Aggregate::new();
        swapped.fold(p2).fold(p1).fold(p3);

        prop_assert_eq!(forward.records(), swapped.records());
    }

    /// Property: on an overlapping leaf, the last-folded source wins.
    #[test]
    fn prop_overlapping_leaf_takes_last_writer(
        key in device_key_strategy(),
        first in leaf_strategy(),
        second in leaf_strategy(),
    ) {
        let mut agg = Aggregate::new();
        agg.fold(PartialRecord::from([(key, json!({"product": {"name": first}}))]))
            .fold(PartialRecord::from([(key, json!({"product": {"name": second.clone()}}))]));

        prop_assert_eq!(&agg.get(&key).unwrap()["product"]["name"], &second);
    }

    /// Property: folding never drops a device key.
    #[test]
    fn prop_fold_accumulates_all_keys(
        p1 in prefixed_partial_strategy("loc"),
        p2 in prefixed_partial_strategy("prod"),
    ) {
        let mut agg = Aggregate::new();
        agg.fold(p1.clone()).fold(p2.clone());

        for key in p1.keys().chain(p2.keys()) {
            prop_assert!(agg.get(key).is_some());
        }
    }
}
