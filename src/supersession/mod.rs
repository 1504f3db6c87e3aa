//! Supersession Coordinator.
//!
//! Snapshots of one change stream (the same pull request for component
//! snapshots, the same change group for group snapshots) are ordered by
//! creation time. Everything but the newest is marked canceled and its
//! unfinished test jobs are asked to stop gracefully.
//!
//! No lock is taken. Two invocations racing on the same stream both converge
//! on the same newest Snapshot, and every step is a no-op the second time.
//! An interrupted pass is finished by the next one.

use tracing::{debug, info};

use crate::effects::{ClusterEffect, ClusterInterpreter, SnapshotPatch};
use crate::reconcile::{Context, ReconcileError};
use crate::store::{ResourceLoader, StoreErrorKind};
use crate::types::labels::{JOB_FINALIZER, SUPERSEDED_ANNOTATION};
use crate::types::{
    CancelRequest, Marker, MarkerKind, Snapshot, SnapshotKind, SnapshotName,
};

/// Splits `peers` into the newest Snapshot and the ones it supersedes.
///
/// Ties on creation time are broken by name so every invocation picks the
/// same survivor. Returns `None` for an empty peer set.
pub fn partition_superseded(mut peers: Vec<Snapshot>) -> Option<(Snapshot, Vec<Snapshot>)> {
    peers.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    let newest = peers.pop()?;
    Some((newest, peers))
}

async fn peers_of<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &Snapshot,
) -> Result<Vec<Snapshot>, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    match &snapshot.kind {
        SnapshotKind::Component { component, .. } => match &snapshot.pull_request {
            Some(pr) => {
                ctx.query(ctx.loader.snapshots_for_pull_request(
                    &snapshot.application,
                    component,
                    pr.number,
                ))
                .await
            }
            None => Ok(Vec::new()),
        },
        SnapshotKind::Group { change_group } => {
            let peers = ctx
                .query(
                    ctx.loader
                        .snapshots_for_change_group(&snapshot.application, &change_group.hash),
                )
                .await?;
            Ok(peers
                .into_iter()
                .filter(|s| matches!(s.kind, SnapshotKind::Group { .. }))
                .collect())
        }
        SnapshotKind::Override => Ok(Vec::new()),
    }
}

/// Cancels every Snapshot superseded by the newest member of `snapshot`'s
/// change stream. Returns the names of the Snapshots canceled by this call.
pub async fn cancel_superseded<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &Snapshot,
) -> Result<Vec<SnapshotName>, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let peers = peers_of(ctx, snapshot).await?;
    let Some((newest, superseded)) = partition_superseded(peers) else {
        return Ok(Vec::new());
    };

    let mut canceled = Vec::new();
    for mut older in superseded {
        if older.is_marked(MarkerKind::Canceled) {
            debug!(snapshot = %older.name, "Snapshot already marked canceled");
            continue;
        }
        // Jobs go first: the marker is what makes the next call skip this
        // Snapshot, so it is only written once every job has been asked to stop.
        cancel_jobs(ctx, &older, &newest.name).await?;
        let marker = Marker::new(format!("Snapshot superseded by {}", newest.name));
        ctx.patch_snapshot(
            &mut older,
            SnapshotPatch::SetMarker {
                kind: MarkerKind::Canceled,
                marker,
            },
        )
        .await?;
        info!(snapshot = %older.name, newest = %newest.name, "Canceled superseded snapshot");
        canceled.push(older.name);
    }
    Ok(canceled)
}

/// Gracefully cancels the unfinished integration jobs of `snapshot`.
async fn cancel_jobs<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &Snapshot,
    superseded_by: &SnapshotName,
) -> Result<(), ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let jobs = ctx
        .query(ctx.loader.integration_jobs_for_snapshot(&snapshot.name))
        .await?;

    for job in jobs.into_iter().filter(|j| !j.phase.is_finished()) {
        let result = async {
            if job.finalizers.iter().any(|f| f == JOB_FINALIZER) {
                ctx.execute(ClusterEffect::RemoveJobFinalizer {
                    job: job.name.clone(),
                    finalizer: JOB_FINALIZER.to_string(),
                })
                .await?;
            }
            if job.cancel.is_none() {
                ctx.execute(ClusterEffect::CancelJob {
                    job: job.name.clone(),
                    request: CancelRequest::CancelledRunFinally,
                    annotation: (
                        SUPERSEDED_ANNOTATION.to_string(),
                        superseded_by.to_string(),
                    ),
                })
                .await?;
            }
            Ok::<_, ReconcileError>(())
        }
        .await;

        match result {
            Ok(()) => debug!(job = %job.name, "Requested graceful cancellation"),
            // Pruned between list and patch.
            Err(e) if e.store_kind() == Some(StoreErrorKind::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
