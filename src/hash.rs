//! Deterministic short IDs for strings (C1).
//!
//! Every query, graph URI, and canonicalized member set is turned into a
//! fixed-width key before it touches the [`crate::store::KVStore`]. The
//! digest is cryptographic (SHA-256) for collision resistance at cache
//! scale, truncated for a compact key, and namespaced so cache keys never
//! collide with keys another subsystem might write into the same backend.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const TRUNCATE_LEN: usize = 30;

/// Which kind of record a short ID is being minted for.
///
/// Each kind gets its own one-character prefix rather than a single shared
/// tag, so that a key's kind is recoverable from the key alone — useful for
/// debugging and for keeping the three indices' keyspaces visibly disjoint
/// even though nothing load-bearing depends on the prefix differing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Query,
    Graph,
    RelatedGroup,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            IdKind::Query => "q-",
            IdKind::Graph => "g-",
            IdKind::RelatedGroup => "r-",
        }
    }
}

/// Deterministic short ID for `s`: `kind`'s one-character prefix followed
/// by 30 lowercase hex characters of its SHA-256 digest.
///
/// Same input and kind always yield the same output, across processes and
/// runs — this is the load-bearing property the cache's three indices
/// depend on.
pub fn short_id(kind: IdKind, s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    let hex = hex::encode(digest);
    format!("{}{}", kind.prefix(), &hex[..TRUNCATE_LEN])
}

/// Short ID for a query, keyed on its exact query text.
pub fn query_id(query: &str) -> String {
    short_id(IdKind::Query, query)
}

/// Short ID for a graph, keyed on its URI.
pub fn graph_id(uri: &str) -> String {
    short_id(IdKind::Graph, uri)
}

/// Short ID for a related-group, keyed on its canonicalized member set.
pub fn related_group_id(canonical_members: &str) -> String {
    short_id(IdKind::RelatedGroup, canonical_members)
}

/// Unprefixed digest fragment of `s`, for building up a pattern's
/// composite `{gid}_{s}_{p}_{o}` key (spec.md §6) directly — a pattern
/// key is never itself re-hashed through [`short_id`], it's the literal
/// concatenation of a graph id and up to three of these fragments (or
/// `*` wildcards).
pub fn term_fragment(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..TRUNCATE_LEN].to_string()
}
