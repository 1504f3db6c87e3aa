//! Per-Snapshot entry points.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::{Context, OperationResult, ReconcileError};
use crate::config::ControllerConfig;
use crate::effects::{ClusterInterpreter, EffectExecutor, SnapshotPatch};
use crate::jobs::{ensure_job_exists, rerun};
use crate::ledger::TestStatusLedger;
use crate::store::{ResourceLoader, StoreErrorKind};
use crate::supersession::cancel_superseded;
use crate::types::labels::{RERUN_ALL, RERUN_LABEL};
use crate::types::{
    IntegrationTestScenario, MarkerKind, ScenarioName, Snapshot, TestOutcome, TestingStatus,
    applicable_scenarios,
};
use crate::{group, promote, release};

/// Testing message when nothing gates the Snapshot.
pub const NO_REQUIRED_SCENARIOS_MESSAGE: &str =
    "No required IntegrationTestScenarios found, skipped testing";

/// Drives one Snapshot through every reconciliation concern.
///
/// The adapter owns a working copy of the Snapshot. Every write goes to the
/// store first and is mirrored on the copy, so later concerns in the same
/// invocation see the effects of earlier ones.
pub struct SnapshotAdapter<'a, L, I> {
    snapshot: Snapshot,
    ctx: Context<'a, L, I>,
}

impl<'a, L, I> SnapshotAdapter<'a, L, I>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    pub fn new(
        snapshot: Snapshot,
        loader: &'a L,
        executor: &'a EffectExecutor<I>,
        config: &'a ControllerConfig,
    ) -> Self {
        SnapshotAdapter {
            snapshot,
            ctx: Context::new(loader, executor, config),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    /// Runs every concern in order, stopping at the first that does not
    /// return `Continue`.
    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn reconcile_snapshot(&mut self) -> Result<OperationResult, ReconcileError> {
        let result = self.ensure_rerun_jobs_exist().await?;
        if !result.is_continue() {
            return Ok(result);
        }
        let result = self.ensure_integration_jobs_exist().await?;
        if !result.is_continue() {
            return Ok(result);
        }
        let result = self.ensure_group_snapshot_exists().await?;
        if !result.is_continue() {
            return Ok(result);
        }
        let result = self.ensure_override_snapshot_valid().await?;
        if !result.is_continue() {
            return Ok(result);
        }
        let result = self.ensure_candidate_images_updated().await?;
        if !result.is_continue() {
            return Ok(result);
        }
        self.ensure_all_releases_exist().await
    }

    /// Handles a pending re-run request label.
    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn ensure_rerun_jobs_exist(&mut self) -> Result<OperationResult, ReconcileError> {
        let Some(request) = self.snapshot.rerun_request().map(str::to_string) else {
            return Ok(OperationResult::Continue);
        };
        let ctx = self.ctx;

        let scenarios = if request == RERUN_ALL {
            self.applicable_scenarios().await?
        } else {
            let name = ScenarioName::from(request.as_str());
            match ctx
                .query(ctx.loader.scenario(&self.snapshot.application, &name))
                .await
            {
                Ok(scenario) => vec![scenario],
                Err(e) if e.store_kind() == Some(StoreErrorKind::NotFound) => {
                    warn!(scenario = %name, "Re-run requested for a scenario that does not exist");
                    let key = RERUN_LABEL.to_string();
                    ctx.patch_snapshot(&mut self.snapshot, SnapshotPatch::RemoveLabel { key })
                        .await?;
                    return Ok(OperationResult::Continue);
                }
                Err(e) => return Err(e),
            }
        };

        let mut ledger = TestStatusLedger::from_snapshot(&self.snapshot)?;
        ledger.initialize(scenarios.iter().map(|s| &s.name));
        let result = rerun(ctx, &mut self.snapshot, &mut ledger, &scenarios).await;
        let persisted = ctx.persist_ledger(&mut self.snapshot, &mut ledger).await;
        self.supersede_older().await;
        let summary = settle(result, persisted)?;
        info!(created = summary.created, skipped = summary.skipped, "Processed re-run request");
        Ok(OperationResult::Continue)
    }

    /// Makes sure a job was submitted for every applicable scenario.
    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn ensure_integration_jobs_exist(&mut self) -> Result<OperationResult, ReconcileError> {
        if self.snapshot.status.testing.has_finished() {
            debug!("Testing already finished");
            return Ok(OperationResult::Continue);
        }
        if self.snapshot.is_marked(MarkerKind::Canceled) || self.snapshot.is_marked(MarkerKind::Invalid) {
            debug!("Snapshot is canceled or invalid, not creating jobs");
            return Ok(OperationResult::Continue);
        }
        let ctx = self.ctx;

        let scenarios = self.applicable_scenarios().await?;
        let mut ledger = TestStatusLedger::from_snapshot(&self.snapshot)?;
        ledger.initialize(scenarios.iter().map(|s| &s.name));
        ctx.persist_ledger(&mut self.snapshot, &mut ledger).await?;

        let mut created = 0;
        let mut errors = Vec::new();
        for scenario in &scenarios {
            match ensure_job_exists(ctx, &mut self.snapshot, &mut ledger, scenario).await {
                Ok(submission) if submission.is_created() => created += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(scenario = %scenario.name, error = %e, "Failed to create job for scenario");
                    errors.push(e);
                }
            }
        }
        debug!(created, total = scenarios.len(), "Ensured integration jobs");
        if let Err(e) = ctx.persist_ledger(&mut self.snapshot, &mut ledger).await {
            errors.push(e);
        }
        // Runs on every pass, not only when jobs were created, so an
        // interrupted supersession is picked up again.
        self.supersede_older().await;
        if let Some(e) = ReconcileError::join(errors) {
            return Err(e);
        }

        let any_required = scenarios.iter().any(IntegrationTestScenario::is_required);
        if !any_required && self.snapshot.status.testing.outcome != TestOutcome::Passed {
            let testing = TestingStatus {
                outcome: TestOutcome::Passed,
                message: NO_REQUIRED_SCENARIOS_MESSAGE.to_string(),
                first_started_at: self.snapshot.status.testing.first_started_at,
                finished_at: Some(Utc::now()),
            };
            ctx.patch_snapshot(&mut self.snapshot, SnapshotPatch::SetTesting { testing })
                .await?;
            info!("No required scenarios, marked snapshot as passed");
        }
        Ok(OperationResult::Continue)
    }

    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn ensure_group_snapshot_exists(&mut self) -> Result<OperationResult, ReconcileError> {
        group::ensure_group_snapshot(self.ctx, &mut self.snapshot).await
    }

    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn ensure_override_snapshot_valid(&mut self) -> Result<OperationResult, ReconcileError> {
        promote::ensure_override_valid(self.ctx, &mut self.snapshot).await
    }

    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn ensure_candidate_images_updated(&mut self) -> Result<OperationResult, ReconcileError> {
        promote::ensure_candidates_updated(self.ctx, &mut self.snapshot).await
    }

    #[instrument(skip(self), fields(snapshot = %self.snapshot.name))]
    pub async fn ensure_all_releases_exist(&mut self) -> Result<OperationResult, ReconcileError> {
        release::ensure_all_releases_exist(self.ctx, &mut self.snapshot).await
    }

    async fn applicable_scenarios(&self) -> Result<Vec<IntegrationTestScenario>, ReconcileError> {
        let all = self
            .ctx
            .query(
                self.ctx
                    .loader
                    .scenarios_for_application(&self.snapshot.application),
            )
            .await?;
        Ok(applicable_scenarios(all, &self.snapshot))
    }

    /// Cancels older Snapshots of the same change stream. Failures are logged
    /// and never fail the invocation; the next pass retries.
    async fn supersede_older(&self) {
        if self.snapshot.is_push() {
            return;
        }
        match cancel_superseded(self.ctx, &self.snapshot).await {
            Ok(canceled) if !canceled.is_empty() => {
                info!(count = canceled.len(), "Canceled superseded snapshots");
            }
            Ok(_) => {}
            Err(e) => warn!(
                error = %e,
                retriable = e.is_retriable(),
                "Failed to cancel superseded snapshots"
            ),
        }
    }
}

/// Combines an operation's result with the result of persisting its ledger.
fn settle<T>(
    result: Result<T, ReconcileError>,
    persisted: Result<(), ReconcileError>,
) -> Result<T, ReconcileError> {
    match (result, persisted) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
        (Err(a), Err(b)) => Err(ReconcileError::Batch(vec![a, b])),
    }
}
