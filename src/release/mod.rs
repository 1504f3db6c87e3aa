//! Release Trigger.
//!
//! Once a Snapshot meets the promotion criteria, one release is created per
//! auto-release target. The auto-released marker is set afterwards and never
//! cleared, so adding or renaming targets later does not release the same
//! Snapshot again.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::effects::{ClusterEffect, ClusterInterpreter, SnapshotPatch};
use crate::reconcile::{Context, OperationResult, ReconcileError, requeue_if_younger_than};
use crate::store::{ResourceLoader, StoreError};
use crate::types::{Marker, MarkerKind, ReleaseSpec, ReleaseTarget, Snapshot, TestOutcome};

/// Auto-released reason when releases were created.
pub const AUTO_RELEASED_MESSAGE: &str = "The Snapshot was auto-released";

/// Auto-released reason when the application has no auto-release targets.
pub const NO_TARGETS_MESSAGE: &str =
    "Skipping auto-release of the Snapshot because no release targets have auto-release enabled";

/// Reasons `snapshot` may not be promoted. Empty means it may.
pub fn promotion_blockers(snapshot: &Snapshot) -> Vec<&'static str> {
    let mut blockers = Vec::new();
    if snapshot.status.testing.outcome != TestOutcome::Passed {
        blockers.push("the Snapshot hasn't passed all required integration tests");
    }
    if snapshot.is_marked(MarkerKind::Invalid) {
        blockers.push("the Snapshot is invalid");
    }
    if snapshot.is_marked(MarkerKind::Canceled) {
        blockers.push("the Snapshot was canceled");
    }
    if !snapshot.is_push() && !snapshot.is_override() {
        blockers.push("the Snapshot was not created by a push event or as an override");
    }
    blockers
}

pub fn can_be_promoted(snapshot: &Snapshot) -> bool {
    promotion_blockers(snapshot).is_empty()
}

/// Creates the releases `snapshot` is due, exactly once per target.
pub async fn ensure_all_releases_exist<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
) -> Result<OperationResult, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let blockers = promotion_blockers(snapshot);
    if !blockers.is_empty() {
        debug!(snapshot = %snapshot.name, reasons = %blockers.join(", "), "Snapshot won't be released");
        return Ok(OperationResult::Continue);
    }
    if snapshot.is_marked(MarkerKind::AutoReleased) {
        debug!(snapshot = %snapshot.name, "Snapshot was already auto-released");
        return Ok(OperationResult::Continue);
    }

    let targets = match ctx
        .query(ctx.loader.auto_release_targets(&snapshot.application))
        .await
    {
        Ok(targets) => targets,
        Err(e) => return record_failure(ctx, snapshot, "Failed to get all release targets", e).await,
    };

    let message = if targets.is_empty() {
        NO_TARGETS_MESSAGE
    } else {
        if let Err(e) = create_missing_releases(ctx, snapshot, &targets).await {
            return record_failure(ctx, snapshot, "Failed to create new releases", e).await;
        }
        AUTO_RELEASED_MESSAGE
    };

    if snapshot.status.integration_error.is_some() {
        ctx.patch_snapshot(snapshot, SnapshotPatch::SetIntegrationError { message: None })
            .await?;
    }
    ctx.patch_snapshot(
        snapshot,
        SnapshotPatch::SetMarker {
            kind: MarkerKind::AutoReleased,
            marker: Marker::new(message),
        },
    )
    .await?;
    info!(snapshot = %snapshot.name, reason = message, "Marked snapshot auto-released");
    Ok(OperationResult::Continue)
}

async fn create_missing_releases<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &Snapshot,
    targets: &[ReleaseTarget],
) -> Result<(), ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let existing = ctx
        .query(ctx.loader.releases_for_snapshot(&snapshot.name))
        .await?;
    let mut latency_recorded = false;

    for target in targets {
        if let Some(release) = existing.iter().find(|r| r.target == target.name) {
            info!(snapshot = %snapshot.name, target = %target.name, release = %release.name, "Found existing release");
            continue;
        }
        let spec = ReleaseSpec {
            generate_name: format!("{}-", snapshot.name),
            snapshot: snapshot.name.clone(),
            target: target.name.clone(),
        };
        let created = ctx.execute(ClusterEffect::CreateRelease { spec }).await?;
        let release = created
            .created_name()
            .map(str::to_string)
            .ok_or_else(|| StoreError::transient("release backend did not report the created name"))?;
        info!(snapshot = %snapshot.name, target = %target.name, release = %release, "Created release");

        ctx.execute(ClusterEffect::MarkReleaseAutomated {
            release: release.clone(),
        })
        .await?;
        debug!(release = %release, "Marked release automated");

        if !latency_recorded {
            latency_recorded = true;
            if let Some(finished) = snapshot.status.testing.finished_at {
                let latency = Utc::now().signed_duration_since(finished);
                info!(
                    target: "integration_train::metrics",
                    latency_ms = latency.num_milliseconds(),
                    "release_latency"
                );
            }
        }
    }
    Ok(())
}

/// Records `err` on the Snapshot and requeues while the Snapshot is young.
async fn record_failure<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
    context: &str,
    err: ReconcileError,
) -> Result<OperationResult, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    warn!(snapshot = %snapshot.name, error = %err, "{}", context);
    let patch = SnapshotPatch::SetIntegrationError {
        message: Some(format!("{}: {}", context, err)),
    };
    let err = match ctx.patch_snapshot(snapshot, patch).await {
        Ok(()) => err,
        Err(patch_err) => ReconcileError::Batch(vec![err, patch_err]),
    };
    requeue_if_younger_than(snapshot, ctx.config.retry_timeout, err)
}
