//! Effect execution with cancellation and timeouts.
//!
//! Every store call made by the control loop goes through an
//! [`EffectExecutor`], which bounds it with a timeout and races it against a
//! cancellation token. Cancellation is cooperative: an effect that already
//! reached the store is allowed to finish, and the next call reports
//! `Cancelled`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::cluster::{ClusterEffect, ClusterResponse};
use super::interpreter::ClusterInterpreter;
use crate::store::{StoreError, StoreErrorKind};

/// Errors from effect execution.
#[derive(Debug, Error)]
pub enum EffectError {
    /// The invocation was cancelled before the effect started.
    #[error("operation cancelled")]
    Cancelled,

    /// The store rejected or failed the effect.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EffectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EffectError::Cancelled)
    }

    /// The store error kind, if this is a store error.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            EffectError::Store(e) => Some(e.kind),
            EffectError::Cancelled => None,
        }
    }
}

/// Executes effects and queries with a timeout and cancellation support.
pub struct EffectExecutor<I> {
    interpreter: I,
    cancel: CancellationToken,
    timeout: Duration,
}

impl<I> EffectExecutor<I>
where
    I: ClusterInterpreter,
{
    pub fn new(interpreter: I, cancel: CancellationToken, timeout: Duration) -> Self {
        EffectExecutor {
            interpreter,
            cancel,
            timeout,
        }
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Executes an effect.
    ///
    /// Returns `Cancelled` if the token fired before the effect started, and a
    /// `Transient` store error if the interpreter did not answer in time.
    #[instrument(skip(self, effect), fields(effect = effect.name()))]
    pub async fn execute(&self, effect: ClusterEffect) -> Result<ClusterResponse, EffectError> {
        if self.cancel.is_cancelled() {
            debug!("Cancellation detected before effect execution");
            return Err(EffectError::Cancelled);
        }
        trace!(?effect, "Executing cluster effect");
        self.bounded(self.interpreter.interpret(effect)).await
    }

    /// Runs a read against the data-access layer under the same bounds.
    pub async fn query<T, F>(&self, query: F) -> Result<T, EffectError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(EffectError::Cancelled);
        }
        self.bounded(query).await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, EffectError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(EffectError::Store),
            Err(_) => Err(EffectError::Store(StoreError::transient(format!(
                "store call timed out after {:?}",
                self.timeout
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryCluster;

    fn executor(cancel: CancellationToken) -> EffectExecutor<InMemoryCluster> {
        EffectExecutor::new(InMemoryCluster::new(), cancel, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn cancelled_token_blocks_new_effects() {
        let cancel = CancellationToken::new();
        let executor = executor(cancel.clone());
        cancel.cancel();

        let result = executor
            .execute(ClusterEffect::MarkReleaseAutomated {
                release: "rel".to_string(),
            })
            .await;

        assert!(matches!(result, Err(EffectError::Cancelled)));
        assert!(executor.interpreter().applied().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_queries_time_out_as_transient() {
        let executor = executor(CancellationToken::new());
        let result: Result<(), _> = executor
            .query(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().store_kind(), Some(StoreErrorKind::Transient));
    }
}
