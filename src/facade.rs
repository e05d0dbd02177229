//! The `Store` facade (C6): the outermost public surface, wrapping a
//! generic RDF store adapter and routing reads through the cache engine.
//!
//! RDF data-model classes are explicitly out of scope (spec.md §1); the
//! [`Statement`]/[`StatementPattern`] types here are the minimal named
//! shape the `StoreAdapter` contract (spec.md §6) needs and nothing
//! more — opaque term strings, no parsing, no node/IRI distinctions.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::cache::CacheEngine;
use crate::error::CacheError;
use crate::pattern::{self, QueryKind};
use crate::store::Record;

/// An RDF triple, written or matched as an update target. Terms are
/// opaque strings (URI, literal, or blank-node text) — no typing beyond
/// what the adapter itself imposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// A triple pattern used to select statements for deletion. `None` in
/// any position means "match anything there".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatementPattern {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
}

/// Write options forwarded to the adapter unchanged; the cache has no
/// opinion on them, but the contract needs a slot for them per spec.md
/// §6 (`addStatements(iter, graph?, opts?)`).
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Hint that lets an adapter skip its own existence check before an
    /// insert; purely a pass-through, the cache ignores it.
    pub skip_duplicate_check: bool,
}

/// External RDF store collaborator (spec.md §6 `StoreAdapter`).
///
/// Out of scope per spec.md §1 ("RDF store adapters ... are out of
/// scope") — this crate only defines the interface a `Store` facade
/// needs to drive one. Adapter errors propagate unchanged, wrapped in
/// [`FacadeError::Adapter`].
pub trait StoreAdapter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn query(&self, sparql: &str) -> Result<Record, Self::Error>;

    fn add_statements(
        &self,
        statements: &[Statement],
        graph: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<(), Self::Error>;

    fn delete_matching_statements(
        &self,
        pattern: &StatementPattern,
        graph: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<(), Self::Error>;
}

/// Errors surfaced by the [`Store`] facade: either the cache engine
/// itself, or the wrapped adapter's own error, propagated unchanged.
#[derive(Debug, Error, Diagnostic)]
pub enum FacadeError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error("store adapter error: {0}")]
    #[diagnostic(code(qcache::facade::adapter))]
    Adapter(#[source] E),
}

/// Wraps a [`StoreAdapter`] with cache-aware reads and invalidate-on-write.
///
/// Grounded on spec.md §4.5: reads consult the [`CacheEngine`] first and
/// memoize on miss; writes invalidate by every graph the write touches
/// and then forward unchanged to the adapter.
pub struct Store<A: StoreAdapter> {
    engine: Arc<CacheEngine>,
    adapter: A,
}

impl<A: StoreAdapter> Store<A> {
    pub fn new(engine: Arc<CacheEngine>, adapter: A) -> Self {
        Self { engine, adapter }
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    /// Run `sparql` through the cache. Read queries hit the engine
    /// first, falling back to the adapter and memoizing on miss.
    /// Update queries always forward to the adapter, then invalidate
    /// every graph the update names (its `FROM`/`FROM NAMED` set, plus
    /// any `GRAPH <uri>` scopes its patterns carried).
    pub fn query(&self, sparql: &str) -> Result<Record, FacadeError<A::Error>> {
        let extracted = pattern::extract(sparql).map_err(CacheError::from)?;

        if pattern::is_read(extracted.kind) {
            if let Some(cached) = self.engine.get_result(sparql).map_err(FacadeError::Cache)? {
                return Ok(cached);
            }
            let result = self.adapter.query(sparql).map_err(FacadeError::Adapter)?;
            self.engine
                .remember(sparql, result.clone())
                .map_err(FacadeError::Cache)?;
            return Ok(result);
        }

        debug_assert_eq!(extracted.kind, QueryKind::Update);
        let result = self.adapter.query(sparql).map_err(FacadeError::Adapter)?;
        for graph in touched_graphs(&extracted) {
            self.engine
                .invalidate_by_graph(&graph)
                .map_err(FacadeError::Cache)?;
        }
        Ok(result)
    }

    /// Invalidate `graph` (or the synthetic default graph if `None`),
    /// then forward the write to the adapter.
    pub fn add_statements(
        &self,
        statements: &[Statement],
        graph: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<(), FacadeError<A::Error>> {
        self.engine
            .invalidate_by_graph(graph.unwrap_or_default())
            .map_err(FacadeError::Cache)?;
        self.adapter
            .add_statements(statements, graph, opts)
            .map_err(FacadeError::Adapter)
    }

    /// Invalidate `graph` (or the synthetic default graph if `None`),
    /// then forward the deletion to the adapter.
    pub fn delete_matching_statements(
        &self,
        pattern: &StatementPattern,
        graph: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<(), FacadeError<A::Error>> {
        self.engine
            .invalidate_by_graph(graph.unwrap_or_default())
            .map_err(FacadeError::Cache)?;
        self.adapter
            .delete_matching_statements(pattern, graph, opts)
            .map_err(FacadeError::Adapter)
    }
}

fn touched_graphs(extracted: &pattern::ExtractedQuery) -> Vec<String> {
    let mut graphs = extracted.graphs.clone();
    for pat in &extracted.patterns {
        if let Some(g) = &pat.graph {
            if !graphs.contains(g) {
                graphs.push(g.clone());
            }
        }
    }
    if graphs.is_empty() {
        graphs.push(String::new());
    }
    graphs
}
