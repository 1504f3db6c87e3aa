//! Immediate retries for conditional updates.
//!
//! Conflicts are normally handed back to the scheduler, which re-runs the
//! whole invocation. The candidate record is the exception: it is a shared
//! per-component record that many snapshot reconciliations write, so a
//! conflict there is expected and retried a few times in place, re-reading
//! the record before every attempt.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::{StoreError, StoreErrorKind};

/// Errors that can report an optimistic-concurrency collision.
pub trait ConflictAware {
    fn is_conflict(&self) -> bool;
}

impl ConflictAware for StoreError {
    fn is_conflict(&self) -> bool {
        self.is(StoreErrorKind::Conflict)
    }
}

/// Configuration for conflict retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetry {
    /// Total attempts, including the first.
    pub attempts: u32,

    /// Pause between attempts.
    pub delay: Duration,
}

impl ConflictRetry {
    /// Three attempts, 10ms apart.
    pub const DEFAULT: Self = Self {
        attempts: 3,
        delay: Duration::from_millis(10),
    };

    pub fn new(attempts: u32, delay: Duration) -> Self {
        ConflictRetry {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs `operation` until it succeeds, fails with a non-conflict error, or
/// runs out of attempts. The last error is returned on exhaustion.
pub async fn retry_on_conflict<T, E, F, Fut>(config: ConflictRetry, mut operation: F) -> Result<T, E>
where
    E: ConflictAware,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < config.attempts => {
                debug!(attempt, "Conflict on conditional update, retrying");
                tokio::time::sleep(config.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, StoreError> = retry_on_conflict(ConflictRetry::DEFAULT, || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StoreError::conflict("modified"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), StoreError> =
            retry_on_conflict(ConflictRetry::new(2, Duration::ZERO), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::conflict("modified"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), StoreError> = retry_on_conflict(ConflictRetry::DEFAULT, || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::transient("down"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, StoreErrorKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(ConflictRetry::new(0, Duration::ZERO).attempts, 1);
    }
}
