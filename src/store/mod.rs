//! The `KVStore` contract (C3) and its concrete backends.
//!
//! The cache engine treats the key-value layer as an external collaborator:
//! a flat mapping from opaque string key to opaque JSON-serializable
//! [`Record`]. No iteration, no TTL, no atomic multi-key operations are
//! assumed.
//!
//! Two backends ship with this crate even though `KVStore` itself is only
//! a contract in scope: [`mem::MemoryKvStore`] for tests and ephemeral
//! caches, and [`durable::RedbKvStore`] for a KV layer that must survive
//! process restarts.

pub mod durable;
pub mod mem;

use serde_json::Value;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opaque, JSON-serializable value stored under a key.
///
/// The spec describes this as "an opaque tree of {string, number, bool,
/// array, map} values" — `serde_json::Value` is exactly that tree.
pub type Record = Value;

/// External flat mapping from opaque string key to opaque [`Record`].
///
/// No ordering, iteration, or multi-key atomicity is guaranteed; callers
/// that need those properties must build them on top (the cache engine
/// does, via its own single-mutex serialization).
pub trait KVStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> StoreResult<Option<Record>>;

    /// Store `value` under `key`, overwriting any existing value.
    fn set(&self, key: &str, value: Record) -> StoreResult<()>;

    /// Remove `key`. A no-op if the key is absent.
    fn delete(&self, key: &str) -> StoreResult<()>;
}
