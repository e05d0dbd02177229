//! The query-cache engine (C4): three KV-backed indices and the
//! `remember` / `invalidateByQuery` / `invalidateByGraph` operations
//! that keep them consistent, plus the transaction-aware entry points
//! the `Store` facade (C6) drives.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{CacheError, CacheResult, EngineError};
use crate::hash;
use crate::model::{canonical_member_set, GraphEntry, PatternEntry, QueryEntry, RelatedGroup};
use crate::pattern::{self, ExtractedQuery};
use crate::store::{KVStore, Record};
use crate::transaction::{CommitOutcome, DeferredOp, TransactionManager};

/// Maintains the query/graph/pattern indices on top of a [`KVStore`] and
/// a per-instance [`TransactionManager`].
///
/// Per spec.md §5, the engine is single-threaded-cooperative: every
/// mutating operation is serialized behind `txn`'s mutex (the "single
/// mutex or equivalent actor-style queue" the spec allows), so multiple
/// callers observe outcomes equivalent to some total order of calls even
/// if the underlying `KVStore` is itself concurrent.
pub struct CacheEngine {
    kv: Arc<dyn KVStore>,
    txn: Mutex<TransactionManager>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .txn
            .lock()
            .map(|t| t.active_transaction_id())
            .unwrap_or(None);
        f.debug_struct("CacheEngine")
            .field("active_transaction_id", &active)
            .finish()
    }
}

impl CacheEngine {
    /// Build an engine over an already-constructed `KVStore`. See
    /// [`crate::config::CacheEngineConfig`] for a friendlier entry point
    /// that also picks a backend.
    pub fn new(kv: Arc<dyn KVStore>) -> Self {
        tracing::info!("initializing query cache engine");
        Self {
            kv,
            txn: Mutex::new(TransactionManager::new()),
        }
    }

    fn transaction_active(&self) -> bool {
        self.txn.lock().expect("transaction lock poisoned").is_active()
    }

    // -----------------------------------------------------------------
    // Raw KV accessors
    // -----------------------------------------------------------------

    fn get_query_entry(&self, qid: &str) -> CacheResult<Option<QueryEntry>> {
        match self.kv.get(qid)? {
            None => Ok(None),
            Some(record) => Ok(Some(decode(qid, record)?)),
        }
    }

    fn put_query_entry(&self, qid: &str, entry: &QueryEntry) -> CacheResult<()> {
        self.kv.set(qid, encode(qid, entry)?)?;
        Ok(())
    }

    fn delete_query_entry(&self, qid: &str) -> CacheResult<()> {
        self.kv.delete(qid)?;
        Ok(())
    }

    fn get_graph_entry(&self, gid: &str) -> CacheResult<Option<GraphEntry>> {
        match self.kv.get(gid)? {
            None => Ok(None),
            Some(record) => Ok(Some(decode(gid, record)?)),
        }
    }

    fn put_graph_entry(&self, gid: &str, entry: &GraphEntry) -> CacheResult<()> {
        self.kv.set(gid, encode(gid, entry)?)?;
        Ok(())
    }

    fn delete_graph_entry(&self, gid: &str) -> CacheResult<()> {
        self.kv.delete(gid)?;
        Ok(())
    }

    fn get_pattern_entry(&self, key: &str) -> CacheResult<Option<PatternEntry>> {
        match self.kv.get(key)? {
            None => Ok(None),
            Some(record) => Ok(Some(decode(key, record)?)),
        }
    }

    fn put_pattern_entry(&self, key: &str, entry: &PatternEntry) -> CacheResult<()> {
        self.kv.set(key, encode(key, entry)?)?;
        Ok(())
    }

    fn delete_pattern_entry(&self, key: &str) -> CacheResult<()> {
        self.kv.delete(key)?;
        Ok(())
    }

    fn get_related_group(&self, id: &str) -> CacheResult<Option<RelatedGroup>> {
        match self.kv.get(id)? {
            None => Ok(None),
            Some(record) => Ok(Some(decode(id, record)?)),
        }
    }

    fn put_related_group(&self, group: &RelatedGroup) -> CacheResult<()> {
        self.kv.set(&group.id, encode(&group.id, group)?)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Public engine API (spec.md §6)
    // -----------------------------------------------------------------

    /// Look up a previously memoized query's result without running or
    /// installing anything. Returns `None` on a cache miss.
    pub fn get_result(&self, query: &str) -> CacheResult<Option<Value>> {
        let qid = hash::query_id(query);
        Ok(self.get_query_entry(&qid)?.map(|e| e.result))
    }

    /// Memoize `query -> result`. Deferred to the active transaction, if
    /// any; otherwise applied immediately.
    pub fn remember(&self, query: &str, result: Value) -> CacheResult<()> {
        if self.transaction_active() {
            self.txn.lock().expect("transaction lock poisoned").defer(DeferredOp::Remember {
                query: query.to_string(),
                result,
            });
            return Ok(());
        }
        self.execute_remember(query, result)
    }

    /// Invalidate the memoized entry for `query`, if any, cascading
    /// through its `RelatedGroup` (see [`Self::execute_invalidate_by_query`]).
    /// Deferred to the active transaction, if any; otherwise applied
    /// immediately.
    pub fn invalidate_by_query(&self, query: &str) -> CacheResult<()> {
        if self.transaction_active() {
            self.txn.lock().expect("transaction lock poisoned").defer(DeferredOp::InvalidateQuery {
                query: query.to_string(),
            });
            return Ok(());
        }
        self.execute_invalidate_by_query(query, true)
    }

    /// Invalidate every query that reads from `graph_uri`, and the
    /// `GraphEntry` itself. Deferred to the active transaction, if any;
    /// otherwise applied immediately.
    pub fn invalidate_by_graph(&self, graph_uri: &str) -> CacheResult<()> {
        if self.transaction_active() {
            self.txn.lock().expect("transaction lock poisoned").defer(DeferredOp::InvalidateGraph {
                graph_uri: graph_uri.to_string(),
            });
            return Ok(());
        }
        self.execute_invalidate_by_graph(graph_uri)
    }

    pub fn begin_transaction(&self) -> u64 {
        let id = self.txn.lock().expect("transaction lock poisoned").begin();
        tracing::debug!(txn_id = id, "began transaction");
        id
    }

    pub fn active_transaction_id(&self) -> Option<u64> {
        self.txn.lock().expect("transaction lock poisoned").active_transaction_id()
    }

    pub fn running_transactions(&self) -> Vec<u64> {
        self.txn.lock().expect("transaction lock poisoned").running_transactions()
    }

    /// Commit the currently active transaction frame.
    ///
    /// An inner-frame commit only marks that frame finished (spec.md
    /// §5: nested commits don't flush). The outermost frame's commit
    /// replays every deferred op from every frame, in original call
    /// order, then links every remembered query not invalidated during
    /// the transaction into a fresh `RelatedGroup` (spec.md §4.4, §9
    /// open question 5).
    pub fn commit_transaction(&self) -> CacheResult<()> {
        let outcome = self.txn.lock().expect("transaction lock poisoned").commit()?;
        let ops = match outcome {
            CommitOutcome::Inner => {
                tracing::debug!("committed inner transaction frame (deferred to outer)");
                return Ok(());
            }
            CommitOutcome::Outer { ops } => ops,
        };

        let mut remembered_qids: Vec<String> = Vec::new();
        for op in ops {
            match op {
                DeferredOp::Remember { query, result } => {
                    let qid = hash::query_id(&query);
                    self.execute_remember(&query, result)?;
                    remembered_qids.push(qid);
                }
                DeferredOp::InvalidateQuery { query } => {
                    self.execute_invalidate_by_query(&query, true)?;
                }
                DeferredOp::InvalidateGraph { graph_uri } => {
                    self.execute_invalidate_by_graph(&graph_uri)?;
                }
            }
        }

        if !remembered_qids.is_empty() {
            let invalidated = self.txn.lock().expect("transaction lock poisoned").invalidated_snapshot();
            let full_members: BTreeSet<String> = remembered_qids.into_iter().collect();
            let group_id = hash::related_group_id(&canonical_member_set(&full_members));
            let group = RelatedGroup {
                id: group_id.clone(),
                members: full_members.clone(),
            };
            self.put_related_group(&group)?;
            for qid in &full_members {
                if invalidated.contains(qid) {
                    continue;
                }
                if let Some(mut entry) = self.get_query_entry(qid)? {
                    entry.related_group_id = Some(group_id.clone());
                    self.put_query_entry(qid, &entry)?;
                }
            }
            tracing::debug!(group_id = %group_id, members = group.members.len(), "linked related group");
        }

        self.txn.lock().expect("transaction lock poisoned").finalize_outer_commit();
        tracing::debug!("committed outermost transaction frame");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Immediate (non-deferred) operation bodies
    // -----------------------------------------------------------------

    /// `remember` per spec.md §4.3.1: overwrite-by-full-invalidation,
    /// then install a fresh QueryEntry plus its GraphEntry and
    /// PatternEntry rows.
    fn execute_remember(&self, query: &str, result: Value) -> CacheResult<()> {
        let qid = hash::query_id(query);
        if self.get_query_entry(&qid)?.is_some() {
            // "Overwriting is forbidden" — the existing entry is fully
            // invalidated first (§4.3.1 step 2; this path is otherwise
            // dead per §9, since every remember() call site already
            // checks for a cache hit before recomputing).
            self.execute_invalidate_by_query(query, true)?;
        }

        let extracted = pattern::extract(query)?;
        let from_graphs = from_graph_list(&extracted);

        let mut entry = QueryEntry {
            query: query.to_string(),
            result,
            graph_ids: BTreeSet::new(),
            triple_patterns: Default::default(),
            related_group_id: None,
        };

        for graph_uri in &from_graphs {
            let gid = hash::graph_id(graph_uri);
            let mut g = self
                .get_graph_entry(&gid)?
                .unwrap_or_else(|| GraphEntry::new(gid.clone()));
            g.query_ids.insert(qid.clone());
            entry.graph_ids.insert(gid.clone());
            self.put_graph_entry(&gid, &g)?;
        }

        for pat in &extracted.patterns {
            // A `GRAPH <uri> { ... }`-scoped pattern applies only to that
            // graph, even if it wasn't one of the query's FROM graphs;
            // an unscoped pattern applies to every FROM graph (or the
            // single synthetic "" graph if there was no FROM at all).
            // This follows §4.2's "only named-graph URIs are recorded"
            // rather than the unqualified "for each gid" cross-product a
            // literal reading of §4.3.1 step 6 alone would suggest — see
            // DESIGN.md.
            let applicable: Vec<String> = match &pat.graph {
                Some(g) => vec![g.clone()],
                None => from_graphs.clone(),
            };
            for graph_uri in &applicable {
                let gid = hash::graph_id(graph_uri);
                if !entry.graph_ids.contains(&gid) {
                    let mut g = self
                        .get_graph_entry(&gid)?
                        .unwrap_or_else(|| GraphEntry::new(gid.clone()));
                    g.query_ids.insert(qid.clone());
                    entry.graph_ids.insert(gid.clone());
                    self.put_graph_entry(&gid, &g)?;
                }
                let pattern_key = format!(
                    "{gid}_{}_{}_{}",
                    pat.s.key_fragment(),
                    pat.p.key_fragment(),
                    pat.o.key_fragment()
                );
                self.put_pattern_entry(
                    &pattern_key,
                    &PatternEntry {
                        pattern_key: pattern_key.clone(),
                        value: qid.clone(),
                    },
                )?;
                entry
                    .triple_patterns
                    .entry(gid)
                    .or_default()
                    .insert(pattern_key);
            }
        }

        self.put_query_entry(&qid, &entry)?;
        tracing::debug!(
            qid = %qid,
            graphs = entry.graph_ids.len(),
            patterns = extracted.patterns.len(),
            "remembered query"
        );
        Ok(())
    }

    /// `invalidateByQuery` per spec.md §4.3.1.
    fn execute_invalidate_by_query(&self, query: &str, check_for_related: bool) -> CacheResult<()> {
        let qid = hash::query_id(query);
        let Some(entry) = self.get_query_entry(&qid)? else {
            return Ok(());
        };

        for gid in &entry.graph_ids {
            self.drop_query_from_graph(gid, &qid)?;
        }

        for pattern_keys in entry.triple_patterns.values() {
            for pk in pattern_keys {
                self.delete_pattern_entry(pk)?;
            }
        }

        if check_for_related {
            self.cascade_related_group(&qid, entry.related_group_id.as_deref())?;
        }

        if self.transaction_active() {
            self.txn.lock().expect("transaction lock poisoned").mark_invalidated(&qid);
        }

        self.delete_query_entry(&qid)?;
        tracing::debug!(qid = %qid, "invalidated query");
        Ok(())
    }

    /// `invalidateByGraph` per spec.md §4.3.1.
    fn execute_invalidate_by_graph(&self, graph_uri: &str) -> CacheResult<()> {
        let gid = hash::graph_id(graph_uri);
        let Some(graph_entry) = self.get_graph_entry(&gid)? else {
            return Ok(());
        };

        for qid in &graph_entry.query_ids {
            let entry = self.get_query_entry(qid)?.ok_or_else(|| {
                invariant_violation(format!(
                    "GraphEntry {gid} references QueryEntry {qid}, but no such QueryEntry exists"
                ))
            })?;

            // Clean up this query's *other* graph memberships. This
            // graph's own GraphEntry is deleted wholesale below, which
            // is the cleanup spec.md §4.3.1 step 2d says not to re-do —
            // but a query referencing more than one graph would
            // otherwise leave a dangling qid in those other GraphEntry
            // rows, which violates the §8 index-consistency invariant.
            // See DESIGN.md.
            for other_gid in &entry.graph_ids {
                if other_gid != &gid {
                    self.drop_query_from_graph(other_gid, qid)?;
                }
            }

            for pattern_keys in entry.triple_patterns.values() {
                for pk in pattern_keys {
                    self.delete_pattern_entry(pk)?;
                }
            }

            self.cascade_related_group(qid, entry.related_group_id.as_deref())?;

            if self.transaction_active() {
                self.txn.lock().expect("transaction lock poisoned").mark_invalidated(qid);
            }

            self.delete_query_entry(qid)?;
        }

        self.delete_graph_entry(&gid)?;
        tracing::debug!(graph_id = %gid, "invalidated graph");
        Ok(())
    }

    fn drop_query_from_graph(&self, gid: &str, qid: &str) -> CacheResult<()> {
        let mut g = self.get_graph_entry(gid)?.ok_or_else(|| {
            invariant_violation(format!(
                "QueryEntry {qid} references GraphEntry {gid}, but no such GraphEntry exists"
            ))
        })?;
        g.query_ids.remove(qid);
        if g.query_ids.is_empty() {
            self.delete_graph_entry(gid)?;
        } else {
            self.put_graph_entry(gid, &g)?;
        }
        Ok(())
    }

    /// Cascade an invalidation through `excluding_qid`'s `RelatedGroup`,
    /// if it has one, invalidating every other member with
    /// `check_for_related = false` so the recursion terminates in a
    /// single sweep (spec.md §4.3.1 step 4).
    fn cascade_related_group(&self, excluding_qid: &str, related_group_id: Option<&str>) -> CacheResult<()> {
        let Some(group_id) = related_group_id else {
            return Ok(());
        };
        let Some(group) = self.get_related_group(group_id)? else {
            return Ok(());
        };
        for member_qid in &group.members {
            if member_qid == excluding_qid {
                continue;
            }
            if let Some(member_entry) = self.get_query_entry(member_qid)? {
                self.execute_invalidate_by_query(&member_entry.query, false)?;
            }
        }
        Ok(())
    }
}

fn from_graph_list(extracted: &ExtractedQuery) -> Vec<String> {
    if extracted.graphs.is_empty() {
        vec![String::new()]
    } else {
        extracted.graphs.clone()
    }
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> CacheResult<Record> {
    serde_json::to_value(value).map_err(|e| {
        CacheError::from(crate::error::StoreError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })
    })
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, record: Record) -> CacheResult<T> {
    serde_json::from_value(record).map_err(|e| {
        CacheError::from(crate::error::StoreError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })
    })
}

/// Raise [`EngineError::InvariantViolation`] (spec.md §7): a QueryEntry
/// or GraphEntry referenced a cross-index entry that turned out to be
/// missing. Fatal to the operation in progress — the caller gets an
/// `Err` instead of a silently patched-up index — but the engine itself
/// is not poisoned; subsequent calls proceed normally.
fn invariant_violation(message: impl Into<String>) -> CacheError {
    let message = message.into();
    tracing::warn!(%message, "cache index invariant violated");
    CacheError::from(EngineError::InvariantViolation { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemoryKvStore;
    use serde_json::json;

    fn engine() -> CacheEngine {
        CacheEngine::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn remember_then_lookup() {
        let e = engine();
        let q = "SELECT * FROM <http://g/> WHERE { ?s ?p ?o }";
        e.remember(q, json!({"rows": 1})).unwrap();
        assert_eq!(e.get_result(q).unwrap(), Some(json!({"rows": 1})));
    }

    #[test]
    fn invalidate_by_graph_removes_query_graph_and_patterns() {
        let e = engine();
        let q = "SELECT * FROM <http://g/> WHERE { ?s ?p ?o }";
        e.remember(q, json!(1)).unwrap();
        e.invalidate_by_graph("http://g/").unwrap();

        assert_eq!(e.get_result(q).unwrap(), None);
        let gid = hash::graph_id("http://g/");
        assert_eq!(e.get_graph_entry(&gid).unwrap(), None);
    }

    #[test]
    fn two_queries_sharing_a_graph_both_invalidated() {
        let e = engine();
        let q1 = "SELECT ?a FROM <http://g/> WHERE { ?a ?b ?c }";
        let q2 = "SELECT ?x FROM <http://g/> WHERE { ?x ?y ?z }";
        e.remember(q1, json!(1)).unwrap();
        e.remember(q2, json!(2)).unwrap();

        e.invalidate_by_graph("http://g/").unwrap();

        assert_eq!(e.get_result(q1).unwrap(), None);
        assert_eq!(e.get_result(q2).unwrap(), None);
    }

    #[test]
    fn pattern_specific_lookup() {
        let e = engine();
        let q = "SELECT * FROM <http://g/> WHERE { <http://a> <http://b> ?o }";
        e.remember(q, json!(1)).unwrap();

        let gid = hash::graph_id("http://g/");
        let a = hash::term_fragment("http://a");
        let b = hash::term_fragment("http://b");
        let key = format!("{gid}_{a}_{b}_*");
        let entry = e.get_pattern_entry(&key).unwrap().unwrap();
        assert_eq!(entry.value, hash::query_id(q));

        let other = format!("{gid}_{}_{b}_*", hash::term_fragment("http://x"));
        assert_eq!(e.get_pattern_entry(&other).unwrap(), None);
    }

    #[test]
    fn re_remember_replaces_without_orphans() {
        let e = engine();
        let q = "SELECT * FROM <http://g/> WHERE { <http://a> <http://b> ?o }";
        e.remember(q, json!(1)).unwrap();
        e.remember(q, json!(2)).unwrap();

        assert_eq!(e.get_result(q).unwrap(), Some(json!(2)));
        let gid = hash::graph_id("http://g/");
        let g = e.get_graph_entry(&gid).unwrap().unwrap();
        assert_eq!(g.query_ids.len(), 1);
    }

    #[test]
    fn invalidate_by_query_is_idempotent() {
        let e = engine();
        let q = "SELECT * FROM <http://g/> WHERE { ?s ?p ?o }";
        e.remember(q, json!(1)).unwrap();
        e.invalidate_by_query(q).unwrap();
        e.invalidate_by_query(q).unwrap();
        assert_eq!(e.get_result(q).unwrap(), None);
    }

    #[test]
    fn transaction_linkage_cascades() {
        let e = engine();
        let q1 = "SELECT ?a FROM <http://g1/> WHERE { ?a ?b ?c }";
        let q2 = "SELECT ?x FROM <http://g2/> WHERE { ?x ?y ?z }";

        e.begin_transaction();
        e.remember(q1, json!(1)).unwrap();
        e.remember(q2, json!(2)).unwrap();
        e.commit_transaction().unwrap();

        assert_eq!(e.get_result(q1).unwrap(), Some(json!(1)));
        assert_eq!(e.get_result(q2).unwrap(), Some(json!(2)));

        e.invalidate_by_query(q1).unwrap();
        assert_eq!(e.get_result(q1).unwrap(), None);
        assert_eq!(e.get_result(q2).unwrap(), None);
    }

    #[test]
    fn nested_transactions_defer_to_outer_commit() {
        let e = engine();
        let q1 = "SELECT ?a FROM <http://g1/> WHERE { ?a ?b ?c }";
        let q2 = "SELECT ?x FROM <http://g2/> WHERE { ?x ?y ?z }";

        e.begin_transaction();
        e.remember(q1, json!(1)).unwrap();
        e.begin_transaction();
        e.remember(q2, json!(2)).unwrap();
        e.commit_transaction().unwrap(); // closes inner frame

        assert_eq!(e.get_result(q1).unwrap(), None);
        assert_eq!(e.get_result(q2).unwrap(), None);

        e.commit_transaction().unwrap(); // closes outer frame

        assert_eq!(e.get_result(q1).unwrap(), Some(json!(1)));
        assert_eq!(e.get_result(q2).unwrap(), Some(json!(2)));

        // both linked: invalidating one takes out the other
        e.invalidate_by_query(q2).unwrap();
        assert_eq!(e.get_result(q1).unwrap(), None);
    }

    #[test]
    fn commit_without_begin_errors() {
        let e = engine();
        assert!(e.commit_transaction().is_err());
    }

    #[test]
    fn no_from_queries_share_the_synthetic_empty_graph() {
        let e = engine();
        let q1 = "SELECT * WHERE { ?s ?p ?o }";
        e.remember(q1, json!(1)).unwrap();
        let gid = hash::graph_id("");
        let g = e.get_graph_entry(&gid).unwrap().unwrap();
        assert!(g.query_ids.contains(&hash::query_id(q1)));
    }

    #[test]
    fn invariant_violation_surfaces_when_graph_entry_is_missing() {
        let kv = Arc::new(MemoryKvStore::new());
        let e = CacheEngine::new(kv.clone());
        let q = "SELECT * FROM <http://g1/> FROM <http://g2/> WHERE { ?s ?p ?o }";
        e.remember(q, json!(1)).unwrap();

        // Simulate external corruption of the GraphEntry index: the
        // QueryEntry still lists http://g1/ in its graph_ids, but the
        // backing GraphEntry is gone.
        let gid1 = hash::graph_id("http://g1/");
        kv.delete(&gid1).unwrap();

        let err = e.invalidate_by_query(q).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Engine(EngineError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn invariant_violation_surfaces_when_query_entry_is_missing() {
        let kv = Arc::new(MemoryKvStore::new());
        let e = CacheEngine::new(kv.clone());
        let q = "SELECT * FROM <http://g/> WHERE { ?s ?p ?o }";
        e.remember(q, json!(1)).unwrap();

        // Simulate external corruption of the QueryEntry index: the
        // GraphEntry still lists qid in its query_ids, but the backing
        // QueryEntry is gone.
        let qid = hash::query_id(q);
        kv.delete(&qid).unwrap();

        let err = e.invalidate_by_graph("http://g/").unwrap_err();
        assert!(matches!(
            err,
            CacheError::Engine(EngineError::InvariantViolation { .. })
        ));
    }
}
