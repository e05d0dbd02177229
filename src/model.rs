//! Persisted record types for the three cache indices (§3 Data Model).
//!
//! Every type here round-trips through a [`crate::store::KVStore`] as an
//! opaque JSON [`crate::store::Record`]. `BTreeSet`/`BTreeMap` are used
//! instead of their hash-based counterparts so that serialized records
//! (and the canonical member-set string a [`RelatedGroup`] id is hashed
//! from) are byte-stable across runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One memoized query (C4 `QueryEntry`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntry {
    /// Original SPARQL text — also the preimage of this entry's key.
    pub query: String,
    /// The opaque result payload produced by the store adapter.
    pub result: Value,
    /// Graph-hash IDs this query reads from (its `FROM` set, plus any
    /// `GRAPH <uri>` scopes its patterns introduced).
    pub graph_ids: BTreeSet<String>,
    /// `graphId -> set of patternKey` this query installed.
    pub triple_patterns: BTreeMap<String, BTreeSet<String>>,
    /// The `RelatedGroup` this query was linked into at its transaction's
    /// commit, if any.
    pub related_group_id: Option<String>,
}

/// One graph with at least one memoized query referencing it (`GraphEntry`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntry {
    pub graph_id: String,
    pub query_ids: BTreeSet<String>,
}

impl GraphEntry {
    pub fn new(graph_id: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            query_ids: BTreeSet::new(),
        }
    }
}

/// One `(graph, s, p, o)` pattern observed in some memoized query
/// (`PatternEntry`). Last writer wins on key collision — see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub pattern_key: String,
    /// The QueryEntry ID that most recently installed this pattern.
    pub value: String,
}

/// The set of queries memoized together within one committed transaction
/// (`RelatedGroup`). Never deleted — see spec.md §9 open question 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedGroup {
    pub id: String,
    pub members: BTreeSet<String>,
}

/// Canonical JSON used as the preimage for a [`RelatedGroup`]'s id: a
/// sorted JSON array of member query IDs. Two transactions that memoize
/// the same set of queries produce the same group.
pub fn canonical_member_set(members: &BTreeSet<String>) -> String {
    let sorted: Vec<&String> = members.iter().collect();
    serde_json::to_string(&sorted).expect("Vec<&String> always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_member_set_is_order_independent() {
        let a: BTreeSet<String> = ["q1".into(), "q2".into()].into_iter().collect();
        let b: BTreeSet<String> = ["q2".into(), "q1".into()].into_iter().collect();
        assert_eq!(canonical_member_set(&a), canonical_member_set(&b));
    }
}
