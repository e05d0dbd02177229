//! Rich diagnostic error types for the SPARQL query cache.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes, help text, and source chains so callers
//! know exactly what went wrong and how to recover.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the cache engine.
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transaction(#[from] TransactionError),
}

/// Result type used throughout the crate.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

// ---------------------------------------------------------------------------
// Pattern extraction errors
// ---------------------------------------------------------------------------

/// Errors raised while extracting `FROM` graphs and `WHERE` triple patterns
/// from a SPARQL query string.
#[derive(Debug, Error, Diagnostic)]
pub enum PatternError {
    #[error("could not parse query: {reason}")]
    #[diagnostic(
        code(qcache::pattern::malformed_query),
        help(
            "The query does not match the subset of SPARQL this cache understands \
             (PREFIX declarations, FROM/FROM NAMED, and a WHERE block of triple \
             patterns). Check for unbalanced braces or an unsupported clause."
        )
    )]
    MalformedQuery { reason: String },

    #[error("unterminated string or IRI literal in query")]
    #[diagnostic(
        code(qcache::pattern::unterminated_literal),
        help("Every `<...>` IRI and quoted literal must be closed before the query ends.")
    )]
    UnterminatedLiteral,

    #[error("unbalanced braces in WHERE clause")]
    #[diagnostic(
        code(qcache::pattern::unbalanced_braces),
        help("Every `{{` in the query body must have a matching `}}`.")
    )]
    UnbalancedBraces,
}

// ---------------------------------------------------------------------------
// KV store errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`crate::store::KVStore`] backend.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("backend I/O error: {source}")]
    #[diagnostic(
        code(qcache::store::io),
        help("Check that the data directory exists, has correct permissions, and the disk is not full.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb backend error: {message}")]
    #[diagnostic(
        code(qcache::store::redb),
        help("The embedded redb database reported an internal error; the on-disk file may need repair.")
    )]
    Redb { message: String },

    #[error("value at key {key:?} could not be (de)serialized: {message}")]
    #[diagnostic(
        code(qcache::store::serialization),
        help("Every value written through KVStore must round-trip through the opaque Record JSON tree.")
    )]
    Serialization { key: String, message: String },
}

// ---------------------------------------------------------------------------
// Cache engine errors
// ---------------------------------------------------------------------------

/// Errors raised by [`crate::cache::CacheEngine`] operations.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invariant violated: {message}")]
    #[diagnostic(
        code(qcache::engine::invariant_violation),
        help(
            "An internal consistency check failed (e.g. a QueryEntry referenced a \
             GraphEntry or PatternEntry that was missing). This indicates index \
             corruption; the operation was aborted but the engine can continue."
        )
    )]
    InvariantViolation { message: String },
}

// ---------------------------------------------------------------------------
// Transaction errors
// ---------------------------------------------------------------------------

/// Errors raised by [`crate::transaction::TransactionManager`].
#[derive(Debug, Error, Diagnostic)]
pub enum TransactionError {
    #[error("commitTransaction called with no active transaction")]
    #[diagnostic(
        code(qcache::transaction::no_active_transaction),
        help("Call beginTransaction() before commitTransaction(), or check activeTransactionId() first.")
    )]
    NoActiveTransaction,
}
