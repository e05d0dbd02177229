//! Nestable, deferred transactions (C5).
//!
//! A [`TransactionManager`] holds a stack of [`TransactionFrame`]s. While
//! any frame is active, [`CacheEngine`](crate::cache::CacheEngine)
//! operations are captured as [`DeferredOp`]s instead of touching the
//! indices. Nested commits mark their frame finished but do not flush —
//! only the outermost frame's commit replays every deferred op (from
//! every frame, in the order it was originally called) against the
//! indices and forms the resulting [`crate::model::RelatedGroup`].
//!
//! This "inner commits don't flush" reading follows spec.md §5
//! ("Nested transactions are permitted; inner commits do *not* flush to
//! the indices — they remain deferred until the outermost commit") and
//! concrete scenario 5 in §8, which together supersede a literal reading
//! of §4.4 step 1 as running on every commit. See DESIGN.md.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::TransactionError;

/// A captured engine call, replayed verbatim when its transaction's
/// outermost frame commits.
///
/// The language-neutral spec describes this as a `{function, parameter}`
/// bag (spec.md §9 re-architecture point); this sum type is the typed
/// Rust equivalent the REDESIGN FLAGS section asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredOp {
    Remember { query: String, result: Value },
    InvalidateQuery { query: String },
    InvalidateGraph { graph_uri: String },
}

/// Lifecycle of one transaction frame: `active -> finished`. No rollback
/// primitive exists yet — spec.md §9 open question 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Active,
    Finished,
}

/// One entry in the nested transaction stack. In-memory only; never
/// persisted through the `KVStore`.
#[derive(Debug, Clone)]
pub struct TransactionFrame {
    pub id: u64,
    pub state: FrameState,
    /// Ops deferred while this frame was the active one, each tagged
    /// with its global sequence number so the outermost commit can
    /// replay every frame's ops in true call order.
    pub placed_ops: Vec<(u64, DeferredOp)>,
}

/// Outcome of committing the currently active frame.
pub enum CommitOutcome {
    /// An inner frame finished; nothing was flushed to the indices.
    Inner,
    /// The outermost frame finished: every deferred op across the whole
    /// stack, in original call order, is ready to replay.
    Outer { ops: Vec<DeferredOp> },
}

/// Per-engine-instance transaction state: the frame stack, which frame
/// (if any) is active, and the set of query IDs invalidated during the
/// transaction's lifetime (so the outermost commit knows not to re-link
/// them into the new `RelatedGroup`).
#[derive(Debug, Default)]
pub struct TransactionManager {
    frames: Vec<TransactionFrame>,
    active_id: Option<u64>,
    next_seq: u64,
    invalidated_during_txn: HashSet<String>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new frame; it becomes the active one. IDs are dense and
    /// monotonic, assigned in push order (`id == stack.size` at push
    /// time), so frame `0` is always the outermost.
    pub fn begin(&mut self) -> u64 {
        let id = self.frames.len() as u64;
        self.frames.push(TransactionFrame {
            id,
            state: FrameState::Active,
            placed_ops: Vec::new(),
        });
        self.active_id = Some(id);
        id
    }

    /// Whether any transaction frame is currently active.
    pub fn is_active(&self) -> bool {
        self.active_id.is_some()
    }

    pub fn active_transaction_id(&self) -> Option<u64> {
        self.active_id
    }

    /// IDs of every frame still in state `active` (nested transactions
    /// that have begun but not yet committed).
    pub fn running_transactions(&self) -> Vec<u64> {
        self.frames
            .iter()
            .filter(|f| f.state == FrameState::Active)
            .map(|f| f.id)
            .collect()
    }

    /// Append `op` to the currently active frame. A no-op if no
    /// transaction is active — callers must check [`Self::is_active`]
    /// first, since deferral is only meaningful inside a transaction.
    pub fn defer(&mut self, op: DeferredOp) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(active_id) = self.active_id {
            if let Some(frame) = self.frames.iter_mut().find(|f| f.id == active_id) {
                frame.placed_ops.push((seq, op));
            }
        }
    }

    /// Record that `qid` was invalidated while a transaction was active.
    pub fn mark_invalidated(&mut self, qid: &str) {
        self.invalidated_during_txn.insert(qid.to_string());
    }

    pub fn was_invalidated(&self, qid: &str) -> bool {
        self.invalidated_during_txn.contains(qid)
    }

    /// Commit the active frame. Returns [`TransactionError::NoActiveTransaction`]
    /// if no frame is active.
    ///
    /// Does *not* tear down transaction state for an outermost commit —
    /// callers must replay the returned ops (during which the engine
    /// still observes [`Self::is_active`] as `true`, so cascaded
    /// invalidations keep populating `invalidated_during_txn`) and then
    /// call [`Self::finalize_outer_commit`] once `RelatedGroup`
    /// bookkeeping is done.
    pub fn commit(&mut self) -> Result<CommitOutcome, TransactionError> {
        let active_id = self.active_id.ok_or(TransactionError::NoActiveTransaction)?;
        {
            let frame = self
                .frames
                .iter_mut()
                .find(|f| f.id == active_id)
                .expect("active_id always names a frame on the stack");
            frame.state = FrameState::Finished;
        }

        if active_id == 0 {
            let mut ops: Vec<(u64, DeferredOp)> = self
                .frames
                .iter()
                .flat_map(|f| f.placed_ops.iter().cloned())
                .collect();
            ops.sort_by_key(|(seq, _)| *seq);
            Ok(CommitOutcome::Outer {
                ops: ops.into_iter().map(|(_, op)| op).collect(),
            })
        } else {
            // "advance activeId to the highest-numbered frame still active"
            self.active_id = self
                .frames
                .iter()
                .filter(|f| f.state == FrameState::Active)
                .map(|f| f.id)
                .max();
            Ok(CommitOutcome::Inner)
        }
    }

    /// Tear down the whole stack after an outermost commit's ops have
    /// been replayed and its `RelatedGroup` persisted.
    pub fn finalize_outer_commit(&mut self) {
        self.frames.clear();
        self.active_id = None;
        self.next_seq = 0;
        self.invalidated_during_txn.clear();
    }

    /// Snapshot of the qids invalidated since the outermost frame began —
    /// used by the outer commit to decide which remembered queries still
    /// get linked into the new `RelatedGroup`.
    pub fn invalidated_snapshot(&self) -> HashSet<String> {
        self.invalidated_during_txn.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn begin_assigns_dense_ids() {
        let mut txn = TransactionManager::new();
        assert_eq!(txn.begin(), 0);
        assert_eq!(txn.begin(), 1);
        assert_eq!(txn.running_transactions(), vec![0, 1]);
    }

    #[test]
    fn commit_with_no_active_transaction_errors() {
        let mut txn = TransactionManager::new();
        assert!(matches!(
            txn.commit(),
            Err(TransactionError::NoActiveTransaction)
        ));
    }

    #[test]
    fn inner_commit_does_not_flush() {
        let mut txn = TransactionManager::new();
        txn.begin();
        txn.defer(DeferredOp::Remember {
            query: "Q1".into(),
            result: json!(1),
        });
        txn.begin();
        txn.defer(DeferredOp::Remember {
            query: "Q2".into(),
            result: json!(2),
        });
        let outcome = txn.commit().unwrap();
        assert!(matches!(outcome, CommitOutcome::Inner));
        assert_eq!(txn.active_transaction_id(), Some(0));
    }

    #[test]
    fn outermost_commit_flattens_ops_in_call_order() {
        let mut txn = TransactionManager::new();
        txn.begin();
        txn.defer(DeferredOp::Remember {
            query: "Q1".into(),
            result: json!(1),
        });
        txn.begin();
        txn.defer(DeferredOp::Remember {
            query: "Q2".into(),
            result: json!(2),
        });
        txn.commit().unwrap(); // closes inner frame
        txn.defer(DeferredOp::InvalidateQuery {
            query: "Q1".into(),
        });
        let outcome = txn.commit().unwrap(); // closes outer frame
        let CommitOutcome::Outer { ops } = outcome else {
            panic!("expected outer commit");
        };
        assert_eq!(
            ops,
            vec![
                DeferredOp::Remember {
                    query: "Q1".into(),
                    result: json!(1)
                },
                DeferredOp::Remember {
                    query: "Q2".into(),
                    result: json!(2)
                },
                DeferredOp::InvalidateQuery {
                    query: "Q1".into()
                },
            ]
        );
    }

    #[test]
    fn finalize_clears_everything() {
        let mut txn = TransactionManager::new();
        txn.begin();
        txn.mark_invalidated("q1");
        txn.commit().unwrap();
        txn.finalize_outer_commit();
        assert!(!txn.is_active());
        assert!(!txn.was_invalidated("q1"));
        assert_eq!(txn.begin(), 0);
    }
}
