//! Shared handles for one reconciliation.

use std::future::Future;

use tracing::debug;

use super::ReconcileError;
use crate::config::ControllerConfig;
use crate::effects::{ClusterEffect, ClusterInterpreter, ClusterResponse, EffectExecutor, SnapshotPatch};
use crate::ledger::TestStatusLedger;
use crate::store::{ResourceLoader, StoreError};
use crate::types::Snapshot;

/// Everything a concern needs to talk to the outside world.
pub struct Context<'a, L, I> {
    pub loader: &'a L,
    pub executor: &'a EffectExecutor<I>,
    pub config: &'a ControllerConfig,
}

impl<L, I> Clone for Context<'_, L, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L, I> Copy for Context<'_, L, I> {}

impl<'a, L, I> Context<'a, L, I>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    pub fn new(loader: &'a L, executor: &'a EffectExecutor<I>, config: &'a ControllerConfig) -> Self {
        Context {
            loader,
            executor,
            config,
        }
    }

    /// Runs a loader query under the executor's timeout and cancellation.
    pub async fn query<T, F>(&self, query: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(self.executor.query(query).await?)
    }

    pub async fn execute(&self, effect: ClusterEffect) -> Result<ClusterResponse, ReconcileError> {
        Ok(self.executor.execute(effect).await?)
    }

    /// Patches `snapshot` in the store and mirrors the patch on the local copy.
    ///
    /// The write is conditional on the copy's resource version, so a stale
    /// copy fails with `Conflict` instead of overwriting newer state.
    pub async fn patch_snapshot(
        &self,
        snapshot: &mut Snapshot,
        patch: SnapshotPatch,
    ) -> Result<(), ReconcileError> {
        let response = self
            .execute(ClusterEffect::PatchSnapshot {
                snapshot: snapshot.name.clone(),
                expected_version: Some(snapshot.resource_version),
                patch: patch.clone(),
            })
            .await?;
        patch.apply(snapshot);
        if let ClusterResponse::Updated { resource_version } = response {
            snapshot.resource_version = resource_version;
        }
        Ok(())
    }

    /// Writes the ledger back to `snapshot` if it changed since the last write.
    pub async fn persist_ledger(
        &self,
        snapshot: &mut Snapshot,
        ledger: &mut TestStatusLedger,
    ) -> Result<(), ReconcileError> {
        if !ledger.is_dirty() {
            return Ok(());
        }
        let blob = ledger.encode()?;
        self.patch_snapshot(snapshot, SnapshotPatch::WriteLedger { blob })
            .await?;
        ledger.mark_clean();
        debug!(snapshot = %snapshot.name, entries = ledger.len(), "Persisted test status ledger");
        Ok(())
    }
}
