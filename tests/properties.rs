//! Round-trip/idempotence laws from spec.md §8, checked over a small
//! bounded SPARQL-shaped grammar rather than raw fuzzing — the same
//! style the pack's `gonnect-uk-hypermind-examples` `sparql`/`storage`
//! crates use `proptest` for.

use std::sync::Arc;

use proptest::prelude::*;
use qcache::hash;
use qcache::store::mem::MemoryKvStore;
use qcache::CacheEngine;
use serde_json::json;

/// A handful of distinct URIs/variables, enough to generate queries
/// that are structurally varied without an unbounded alphabet.
fn arb_term() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..4).prop_map(|n| format!("?v{n}")),
        (0u8..4).prop_map(|n| format!("<http://ex/t{n}>")),
    ]
}

fn arb_graph_suffix() -> impl Strategy<Value = u8> {
    0u8..3
}

fn build_query(graph: u8, s: &str, p: &str, o: &str) -> String {
    format!("SELECT * FROM <http://ex/g{graph}> WHERE {{ {s} {p} {o} }}")
}

proptest! {
    /// `shortId` (here: `hash::query_id`) is a pure function: the same
    /// input always yields the same output.
    #[test]
    fn short_id_is_pure(graph in arb_graph_suffix(), s in arb_term(), p in arb_term(), o in arb_term()) {
        let q = build_query(graph, &s, &p, &o);
        prop_assert_eq!(hash::query_id(&q), hash::query_id(&q));
    }

    /// `remember(Q, R)` followed by `invalidateByQuery(Q)` leaves the KV
    /// store observably identical to its state before `remember` ran.
    #[test]
    fn remember_then_invalidate_is_a_no_op(graph in arb_graph_suffix(), s in arb_term(), p in arb_term(), o in arb_term()) {
        let kv = Arc::new(MemoryKvStore::new());
        let engine = CacheEngine::new(kv.clone());
        let q = build_query(graph, &s, &p, &o);

        let before = kv.len();
        engine.remember(&q, json!(1)).unwrap();
        engine.invalidate_by_query(&q).unwrap();
        let after = kv.len();

        prop_assert_eq!(before, after);
        prop_assert_eq!(engine.get_result(&q).unwrap(), None);
    }

    /// `invalidateByQuery(Q)` applied twice is the same as applied once.
    #[test]
    fn invalidate_by_query_is_idempotent(graph in arb_graph_suffix(), s in arb_term(), p in arb_term(), o in arb_term()) {
        let kv = Arc::new(MemoryKvStore::new());
        let engine = CacheEngine::new(kv.clone());
        let q = build_query(graph, &s, &p, &o);

        engine.remember(&q, json!(1)).unwrap();
        engine.invalidate_by_query(&q).unwrap();
        let once = kv.len();

        engine.invalidate_by_query(&q).unwrap();
        let twice = kv.len();

        prop_assert_eq!(once, twice);
    }

    /// `remember(Q, R)` immediately followed by `remember(Q, R')` yields
    /// a single entry whose result is `R'`, not a merge or a duplicate.
    #[test]
    fn re_remember_yields_single_latest_entry(graph in arb_graph_suffix(), s in arb_term(), p in arb_term(), o in arb_term()) {
        let kv = Arc::new(MemoryKvStore::new());
        let engine = CacheEngine::new(kv.clone());
        let q = build_query(graph, &s, &p, &o);

        engine.remember(&q, json!(1)).unwrap();
        let after_first = kv.len();
        engine.remember(&q, json!(2)).unwrap();
        let after_second = kv.len();

        prop_assert_eq!(engine.get_result(&q).unwrap(), Some(json!(2)));
        prop_assert_eq!(after_first, after_second);
    }
}
