//! What an entry point tells the scheduler.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use super::ReconcileError;
use crate::types::Snapshot;

/// The result of one reconciliation concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Move on to the next concern.
    Continue,

    /// This concern is finished for the invocation; do not requeue.
    Stop,

    /// Invoke again after the delay, without counting as a failure.
    RequeueAfter(Duration),
}

impl OperationResult {
    pub fn is_continue(&self) -> bool {
        matches!(self, OperationResult::Continue)
    }
}

/// Returns `err` for requeue while `snapshot` is younger than `threshold`,
/// and gives up with `Stop` once it is older.
///
/// This bounds retries of a transiently failing Snapshot by its age instead
/// of by an attempt counter, which would not survive restarts.
pub fn requeue_if_younger_than(
    snapshot: &Snapshot,
    threshold: Duration,
    err: ReconcileError,
) -> Result<OperationResult, ReconcileError> {
    let age = Utc::now()
        .signed_duration_since(snapshot.created_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if age < threshold {
        return Err(err);
    }
    info!(
        snapshot = %snapshot.name,
        age_secs = age.as_secs(),
        error = %err,
        "Snapshot is older than the retry threshold, giving up"
    );
    Ok(OperationResult::Stop)
}

/// True if `snapshot` was created less than `bound` ago.
pub fn is_younger_than(snapshot: &Snapshot, bound: Duration) -> bool {
    Utc::now()
        .signed_duration_since(snapshot.created_at)
        .to_std()
        .map(|age| age < bound)
        .unwrap_or(true)
}
