//! Property-based tests for enumeration and fingerprinting
//!
//! - Fingerprints ignore parameter insertion order
//! - Enumeration yields exactly A × D × P × R experiments with unique keys
//! - Run with `ProptestConfig::with_cases(100)`

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use trueno_eval::adapter::Adapter;
use trueno_eval::dataset::DatasetId;
use trueno_eval::experiment::{enumerate, Algorithm};
use trueno_eval::fingerprint::fingerprint;
use trueno_eval::params::{ParameterConfig, Params};

// ============================================================================
// Strategies
// ============================================================================

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|v| json!(v)),
        any::<bool>().prop_map(|v| json!(v)),
        "[a-z]{0,8}".prop_map(|v| json!(v)),
        (-1.0e6f64..1.0e6).prop_map(|v| json!(v)),
    ]
}

fn arb_entries() -> impl Strategy<Value = Vec<(String, Value)>> {
    proptest::collection::btree_map("[a-z_]{1,6}", arb_value(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

fn noop() -> Adapter {
    Adapter::function(|_, _| Ok(Vec::new()))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: reversing insertion order keeps the fingerprint
    #[test]
    fn prop_fingerprint_ignores_insertion_order(entries in arb_entries()) {
        let forward: Params = entries.iter().cloned().collect();
        let backward: Params = entries.iter().rev().cloned().collect();
        prop_assert_eq!(fingerprint(&forward), fingerprint(&backward));

        // also through an order-preserving JSON object
        let object: Map<String, Value> = entries.iter().rev().cloned().collect();
        let reparsed: Params = object.into_iter().collect();
        prop_assert_eq!(fingerprint(&forward), fingerprint(&reparsed));
    }

    /// Property: changing one value changes the fingerprint
    #[test]
    fn prop_fingerprint_detects_value_change(entries in arb_entries(), extra in any::<i64>()) {
        let base: Params = entries.into_iter().collect();
        let mut changed = base.clone();
        changed.insert("__extra".to_string(), json!(extra));
        prop_assert_ne!(fingerprint(&base), fingerprint(&changed));
    }

    /// Property: A × D × P × R experiments, all keys distinct
    #[test]
    fn prop_enumeration_is_complete(
        algorithms in 1usize..4,
        datasets in 0usize..4,
        points in 1usize..4,
        repetitions in 0u32..4,
    ) {
        let values: Vec<Value> = (0..points).map(|p| json!(p)).collect();
        let algs: Vec<Arc<Algorithm>> = (0..algorithms)
            .map(|a| {
                Arc::new(
                    Algorithm::new(format!("alg{a}"), noop())
                        .params(ParameterConfig::grid([("p", values.clone())])),
                )
            })
            .collect();
        let ids: Vec<DatasetId> = (0..datasets)
            .map(|d| DatasetId::new("c", format!("d{d}")))
            .collect();

        let experiments = enumerate(&algs, &ids, repetitions).unwrap();
        let expected = algorithms * datasets * points * repetitions as usize;
        prop_assert_eq!(experiments.len(), expected);

        let keys: HashSet<_> = experiments.iter().map(|e| e.key()).collect();
        prop_assert_eq!(keys.len(), expected);
    }
}
