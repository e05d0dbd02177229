//! Engine configuration (ambient-stack addition; spec.md is silent on
//! configuration, but every real crate in this space needs a
//! construction-time choice of `KVStore` backend).
//!
//! Mirrors the teacher's `EngineConfig`: a plain struct with a `Default`
//! impl and a `build` method that turns configuration into a running
//! subsystem.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheEngine;
use crate::error::CacheResult;
use crate::store::durable::RedbKvStore;
use crate::store::mem::MemoryKvStore;
use crate::store::KVStore;

/// Which `KVStore` backend a [`CacheEngineConfig`] builds.
#[derive(Debug, Clone)]
pub enum KvBackend {
    /// `DashMap`-backed, in-process, lost on exit.
    Memory,
    /// `redb`-backed, ACID-durable at the given path.
    Redb(PathBuf),
}

/// Configuration for a [`CacheEngine`].
///
/// Key-prefix policy is not configurable: this crate always uses the
/// `q-`/`g-`/`r-` prefixes described in spec.md §6 as "a safe
/// divergence" from the single `qc-` tag (see DESIGN.md). Pattern keys
/// carry no prefix of their own — they're the composite
/// `{graphId}_{s}_{p}_{o}` string spec.md §3 describes, built directly
/// from a graph id and term-hash fragments.
#[derive(Debug, Clone)]
pub struct CacheEngineConfig {
    pub backend: KvBackend,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::Memory,
        }
    }
}

impl CacheEngineConfig {
    /// Configuration for an ephemeral, in-memory cache.
    pub fn memory() -> Self {
        Self {
            backend: KvBackend::Memory,
        }
    }

    /// Configuration for a durable cache backed by `redb` at `path`.
    pub fn redb(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: KvBackend::Redb(path.into()),
        }
    }

    /// Construct the configured `KVStore` and wrap it in a fresh
    /// [`CacheEngine`].
    pub fn build(self) -> CacheResult<CacheEngine> {
        let kv: Arc<dyn KVStore> = match self.backend {
            KvBackend::Memory => Arc::new(MemoryKvStore::new()),
            KvBackend::Redb(path) => Arc::new(RedbKvStore::open(&path)?),
        };
        Ok(CacheEngine::new(kv))
    }
}
