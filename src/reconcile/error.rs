//! Errors surfaced to the external scheduler.
//!
//! Any `Err` returned from an entry point means "requeue with backoff".
//! Terminal conditions are never errors: they are recorded on the Snapshot
//! and reported as [`OperationResult::Stop`](super::OperationResult::Stop) or
//! `Continue`.

use thiserror::Error;

use crate::effects::EffectError;
use crate::ledger::LedgerError;
use crate::store::retry::ConflictAware;
use crate::store::{StoreError, StoreErrorKind};

/// Errors from a reconciliation entry point.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The invocation was cancelled.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// A read or write against the backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The ledger blob could not be decoded or encoded.
    #[error("test status ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// A payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Several independent sub-operations failed.
    #[error("{} operations failed: {}", .0.len(), join_messages(.0))]
    Batch(Vec<ReconcileError>),
}

fn join_messages(errors: &[ReconcileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<EffectError> for ReconcileError {
    fn from(e: EffectError) -> Self {
        match e {
            EffectError::Cancelled => ReconcileError::Cancelled,
            EffectError::Store(e) => ReconcileError::Store(e),
        }
    }
}

impl ReconcileError {
    /// Folds the errors of a batch into one, or `None` if there were none.
    ///
    /// A single error is returned as-is rather than wrapped.
    pub fn join(mut errors: Vec<ReconcileError>) -> Option<ReconcileError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ReconcileError::Batch(errors)),
        }
    }

    /// The store error kind, if this is a single store error.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            ReconcileError::Store(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Whether a later invocation may succeed where this one failed.
    ///
    /// A batch is retriable if any of its members is.
    pub fn is_retriable(&self) -> bool {
        match self {
            ReconcileError::Cancelled => true,
            ReconcileError::Store(e) => e.kind.is_retriable(),
            ReconcileError::Ledger(_) | ReconcileError::Encode(_) => false,
            ReconcileError::Batch(errors) => errors.iter().any(ReconcileError::is_retriable),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ReconcileError::Cancelled => true,
            ReconcileError::Batch(errors) => errors.iter().any(ReconcileError::is_cancelled),
            _ => false,
        }
    }
}

impl ConflictAware for ReconcileError {
    fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is(StoreErrorKind::Conflict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_unwraps_single_errors() {
        assert!(ReconcileError::join(vec![]).is_none());

        let single = ReconcileError::join(vec![StoreError::transient("down").into()]).unwrap();
        assert_eq!(single.store_kind(), Some(StoreErrorKind::Transient));

        let batch = ReconcileError::join(vec![
            StoreError::transient("a").into(),
            ReconcileError::Cancelled,
        ])
        .unwrap();
        assert!(matches!(batch, ReconcileError::Batch(ref v) if v.len() == 2));
        assert!(batch.is_cancelled());
        assert!(batch.to_string().starts_with("2 operations failed"));
    }

    #[test]
    fn retriability_follows_the_store_kind() {
        let conflict: ReconcileError = StoreError::conflict("modified").into();
        let forbidden: ReconcileError = StoreError::forbidden("no").into();
        assert!(conflict.is_retriable());
        assert!(!forbidden.is_retriable());
        assert!(ReconcileError::Batch(vec![forbidden, conflict]).is_retriable());
        assert!(!ReconcileError::Batch(vec![StoreError::invalid("bad").into()]).is_retriable());
    }

    #[test]
    fn effect_errors_convert_by_variant() {
        let cancelled: ReconcileError = EffectError::Cancelled.into();
        assert!(cancelled.is_cancelled());

        let store: ReconcileError = EffectError::Store(StoreError::forbidden("no")).into();
        assert_eq!(store.store_kind(), Some(StoreErrorKind::Forbidden));
    }
}
