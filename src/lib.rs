//! # qcache
//!
//! A SPARQL query cache that sits between an application and a
//! SPARQL-capable RDF store. It memoizes query results keyed on query
//! text and invalidates them selectively — by exact query, by graph, or
//! (via its pattern index) by the triple patterns a write could have
//! matched — with enough precision that a single updated triple only
//! invalidates queries whose patterns could have matched it.
//!
//! ## Architecture
//!
//! - **Hasher** (`hash`): deterministic short IDs for query text, graph
//!   URIs, and pattern/related-group preimages.
//! - **Pattern extraction** (`pattern`): the subset of SPARQL needed to
//!   pull `FROM` graphs and `WHERE`/`DATA` triple patterns out of a
//!   query string, with per-position `{uri, var, literal, bnode}`
//!   typing.
//! - **Data model** (`model`): the `QueryEntry`/`GraphEntry`/
//!   `PatternEntry`/`RelatedGroup` records the cache's three indices are
//!   built from.
//! - **KV store** (`store`): the `KVStore` contract plus an in-memory
//!   and a `redb`-backed implementation.
//! - **Cache engine** (`cache`): the three indices and the
//!   `remember`/`invalidateByQuery`/`invalidateByGraph` operations.
//! - **Transactions** (`transaction`): nestable, deferred batches of
//!   engine operations that link their memoized queries on commit.
//! - **Store facade** (`facade`): the outermost public surface wrapping
//!   a generic RDF store adapter with cache-aware reads and
//!   invalidate-on-write.
//! - **Configuration** (`config`): picks and builds a `KVStore` backend.
//!
//! ## Library usage
//!
//! ```
//! use qcache::config::CacheEngineConfig;
//! use serde_json::json;
//!
//! let engine = CacheEngineConfig::memory().build().unwrap();
//! let query = "SELECT * FROM <http://example.org/g> WHERE { ?s ?p ?o }";
//! engine.remember(query, json!({"rows": []})).unwrap();
//! assert!(engine.get_result(query).unwrap().is_some());
//!
//! engine.invalidate_by_graph("http://example.org/g").unwrap();
//! assert!(engine.get_result(query).unwrap().is_none());
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod hash;
pub mod model;
pub mod pattern;
pub mod store;
pub mod transaction;

pub use cache::CacheEngine;
pub use config::CacheEngineConfig;
pub use error::{CacheError, CacheResult};
pub use facade::{FacadeError, Statement, StatementPattern, Store, StoreAdapter, WriteOptions};
