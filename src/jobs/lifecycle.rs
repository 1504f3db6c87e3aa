//! Exactly-once job submission and re-runs.
//!
//! The ledger, not the job backend, decides whether a job exists for a
//! scenario: job objects can be pruned at any time, and a pruned job must not
//! be recreated unless a re-run was explicitly requested.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::builder::build_job_spec;
use crate::effects::{ClusterEffect, ClusterInterpreter, SnapshotPatch};
use crate::ledger::{TestStatus, TestStatusLedger};
use crate::reconcile::{Context, ReconcileError};
use crate::store::{ResourceLoader, StoreError, StoreErrorKind};
use crate::types::labels::RERUN_LABEL;
use crate::types::{IntegrationTestScenario, JobName, Snapshot, TestOutcome, TestingStatus};

/// What [`ensure_job_exists`] did for a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSubmission {
    /// The ledger already references a job; nothing was submitted.
    AlreadySubmitted(JobName),

    /// A new job was created.
    Created(JobName),

    /// The backend rejected the descriptor. The scenario is marked `Invalid`.
    Rejected(String),
}

impl JobSubmission {
    pub fn is_created(&self) -> bool {
        matches!(self, JobSubmission::Created(_))
    }
}

/// Submits a job for `scenario` unless the ledger says one was already
/// submitted.
///
/// The ledger is updated in memory only; the caller persists it.
///
/// # Errors
///
/// Any submission failure other than a validation rejection is returned so
/// the invocation is requeued.
pub async fn ensure_job_exists<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
    ledger: &mut TestStatusLedger,
    scenario: &IntegrationTestScenario,
) -> Result<JobSubmission, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    if let Some(job) = ledger.job_name(&scenario.name) {
        debug!(scenario = %scenario.name, job = %job, "Job already submitted for scenario");
        return Ok(JobSubmission::AlreadySubmitted(job.clone()));
    }

    let spec = build_job_spec(scenario, snapshot, ctx.config.default_job_timeout);
    let created = match ctx
        .execute(ClusterEffect::CreateJob {
            spec: Box::new(spec),
        })
        .await
    {
        Ok(response) => response,
        Err(e) if e.store_kind() == Some(StoreErrorKind::Invalid) => {
            let message = format!("Creation of job failed: {}", e);
            warn!(scenario = %scenario.name, error = %e, "Job backend rejected the descriptor");
            ledger.transition(&scenario.name, TestStatus::Invalid, message.clone());
            return Ok(JobSubmission::Rejected(message));
        }
        Err(e) => return Err(e),
    };
    let job = created
        .created_name()
        .map(JobName::from)
        .ok_or_else(|| StoreError::transient("job backend did not report the created name"))?;

    ledger.transition(&scenario.name, TestStatus::InProgress, "Job is running");
    ledger.set_job_name(&scenario.name, job.clone())?;
    info!(snapshot = %snapshot.name, scenario = %scenario.name, job = %job, "Created integration test job");
    info!(
        target: "integration_train::metrics",
        application = %snapshot.application,
        "integration_job_created"
    );

    if snapshot.status.testing.first_started_at.is_none() {
        let testing = TestingStatus {
            outcome: TestOutcome::InProgress,
            message: "Integration tests are in progress".to_string(),
            first_started_at: Some(Utc::now()),
            finished_at: None,
        };
        ctx.patch_snapshot(snapshot, SnapshotPatch::SetTesting { testing })
            .await?;
    }

    Ok(JobSubmission::Created(job))
}

/// Counts from a re-run request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RerunSummary {
    pub created: usize,
    pub skipped: usize,
}

/// Re-runs the named scenarios.
///
/// Scenarios that are still `Pending` or `InProgress` are skipped. The rest
/// are reset and resubmitted. Afterwards the re-run label is removed and,
/// unless everything was skipped, the aggregate testing condition is reset.
///
/// Failures of individual scenarios do not stop the others. They are joined
/// with any failure to update the Snapshot and returned together.
pub async fn rerun<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
    ledger: &mut TestStatusLedger,
    scenarios: &[IntegrationTestScenario],
) -> Result<RerunSummary, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let mut summary = RerunSummary::default();
    let mut errors = Vec::new();

    for scenario in scenarios {
        let status = ledger.get(&scenario.name).map(|e| e.status);
        if matches!(status, Some(TestStatus::Pending | TestStatus::InProgress)) {
            info!(scenario = %scenario.name, ?status, "Scenario is not finished, skipping re-run");
            summary.skipped += 1;
            continue;
        }
        ledger.reset(&scenario.name);
        match ensure_job_exists(ctx, snapshot, ledger, scenario).await {
            Ok(submission) if submission.is_created() => summary.created += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(scenario = %scenario.name, error = %e, "Failed to re-run scenario");
                errors.push(e);
            }
        }
    }

    if snapshot.labels.contains_key(RERUN_LABEL) {
        let key = RERUN_LABEL.to_string();
        if let Err(e) = ctx
            .patch_snapshot(snapshot, SnapshotPatch::RemoveLabel { key })
            .await
        {
            warn!(error = %e, "Failed to clear re-run request");
            errors.push(e);
        }
    }

    if summary.skipped < scenarios.len() {
        let testing = TestingStatus {
            outcome: TestOutcome::InProgress,
            message: "Integration tests are being re-run".to_string(),
            first_started_at: snapshot.status.testing.first_started_at,
            finished_at: None,
        };
        if let Err(e) = ctx
            .patch_snapshot(snapshot, SnapshotPatch::SetTesting { testing })
            .await
        {
            errors.push(e);
        }
    }

    match ReconcileError::join(errors) {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
