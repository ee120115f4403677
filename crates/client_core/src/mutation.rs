use thiserror::Error;

use crate::snapshot::Snapshot;

/// Lifecycle of one optimistic mutation:
/// `idle -> applied-locally -> {confirmed | rolled-back} -> idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    AppliedLocally,
    Confirmed,
    RolledBack,
}

/// The single in-flight change a controller may carry. Holding the
/// pre-mutation snapshot here ties its lifetime to the mutation: dropped
/// on commit, consumed on rollback. The occupied slot doubles as the busy
/// latch, so there is never a second snapshot to choose from.
#[derive(Debug)]
pub struct PendingMutation<Id, S, T: Clone> {
    pub item_id: Id,
    pub previous: S,
    pub desired: S,
    pub status: MutationStatus,
    pub snapshot: Snapshot<T>,
}

/// How a `move` call resolved. Only `Completed` reached the remote store
/// and stuck; everything else left the collection as the caller saw it
/// (for `RolledBack`, after restoring the snapshot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Remote write acknowledged; local state confirmed.
    Completed,
    /// Remote write failed; local state restored from the snapshot.
    RolledBack,
    /// Destination equals current state; nothing to do.
    NoOp,
    /// Another mutation is in flight; the gesture was dropped.
    Busy,
    /// The controller was detached while the write was in flight; the
    /// result was discarded.
    Detached,
}

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("no item with id {0} in the collection")]
    UnknownItem(i64),
    #[error("destination index {index} out of bounds for {len} items")]
    InvalidDestination { index: usize, len: usize },
    #[error("position keys exhausted even after renormalization")]
    KeySpaceExhausted,
}
