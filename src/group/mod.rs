//! Group Aggregator.
//!
//! Component Snapshots built from one multi-component change share a
//! change-group key. Once every latest build of the group has settled, the
//! aggregator combines them (plus the last known good artifacts of untouched
//! components) into a single group Snapshot that is tested as a whole.
//!
//! - [`readiness`]: decides whether the group's builds have settled
//! - [`aggregate`]: resolves the artifact set and builds the group Snapshot
//!
//! Every outcome other than "created" or "still waiting" is recorded on the
//! Snapshot as a diagnostic note and marks it group-processed, so the
//! decision is not revisited. A later build of the group produces a new
//! component Snapshot that makes its own attempt.

pub mod aggregate;
pub mod readiness;

use tracing::{debug, info, warn};

pub use aggregate::{
    ComponentSnapshotInfo, GroupPlan, MIN_CONSTITUENTS, build_group_snapshot,
    group_snapshot_name, plan_group,
};
pub use readiness::{Readiness, assess, latest_per_component};

use crate::effects::{ClusterEffect, ClusterInterpreter, SnapshotPatch};
use crate::reconcile::{Context, OperationResult, ReconcileError, is_younger_than};
use crate::store::{ResourceLoader, StoreErrorKind};
use crate::types::labels::GROUP_CREATION_ANNOTATION;
use crate::types::{Marker, MarkerKind, Snapshot, SnapshotKind};

fn note_patches(message: &str) -> [SnapshotPatch; 2] {
    [
        SnapshotPatch::SetAnnotation {
            key: GROUP_CREATION_ANNOTATION.to_string(),
            value: message.to_string(),
        },
        SnapshotPatch::SetMarker {
            kind: MarkerKind::GroupProcessed,
            marker: Marker::new(message),
        },
    ]
}

/// Records a terminal aggregation outcome on `snapshot`.
async fn record_note<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
    message: String,
) -> Result<(), ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    info!(snapshot = %snapshot.name, note = %message, "Recorded group snapshot note");
    for patch in note_patches(&message) {
        ctx.patch_snapshot(snapshot, patch).await?;
    }
    Ok(())
}

/// Tells every constituent Snapshot what became of its group.
///
/// Constituents that have been deleted in the meantime are skipped.
async fn notify_constituents<L, I>(
    ctx: Context<'_, L, I>,
    reconciling: &mut Snapshot,
    constituents: &[ComponentSnapshotInfo],
    message: &str,
) -> Result<(), ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    for info in constituents {
        if info.snapshot == reconciling.name {
            for patch in note_patches(message) {
                ctx.patch_snapshot(reconciling, patch).await?;
            }
            continue;
        }
        for patch in note_patches(message) {
            let effect = ClusterEffect::PatchSnapshot {
                snapshot: info.snapshot.clone(),
                expected_version: None,
                patch,
            };
            match ctx.execute(effect).await {
                Ok(_) => {}
                Err(e) if e.store_kind() == Some(StoreErrorKind::NotFound) => {
                    debug!(snapshot = %info.snapshot, "Constituent snapshot is gone, not notifying");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Creates the group Snapshot for `snapshot`'s change group once it is ready.
pub async fn ensure_group_snapshot<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
) -> Result<OperationResult, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    if snapshot.is_push() || !matches!(snapshot.kind, SnapshotKind::Component { .. }) {
        return Ok(OperationResult::Continue);
    }
    if snapshot.is_marked(MarkerKind::GroupProcessed) {
        debug!(snapshot = %snapshot.name, "Change group already processed for snapshot");
        return Ok(OperationResult::Continue);
    }
    let Some(change_group) = snapshot
        .kind
        .change_group()
        .filter(|g| g.is_complete())
        .cloned()
    else {
        let message = format!("Failed to get change group key from snapshot {}", snapshot.name);
        record_note(ctx, snapshot, message).await?;
        return Ok(OperationResult::Continue);
    };

    let jobs = ctx
        .query(
            ctx.loader
                .build_jobs_for_change_group(&snapshot.application, &change_group.hash),
        )
        .await?;
    let blocked = match assess(jobs, snapshot) {
        Readiness::Ready => None,
        Readiness::Running(job) => Some(format!(
            "The build job {} of change group {} is still running, won't create group snapshot",
            job, change_group.name
        )),
        Readiness::Failed(job) => Some(format!(
            "The build job {} of change group {} failed, won't create group snapshot",
            job, change_group.name
        )),
        Readiness::AwaitingSnapshot(job) => {
            if is_younger_than(snapshot, ctx.config.group_wait) {
                debug!(job = %job, "Build succeeded but its component snapshot does not exist yet");
                return Ok(OperationResult::RequeueAfter(ctx.config.group_recheck));
            }
            Some(format!(
                "Gave up waiting for the component snapshot of build job {} in change group {}",
                job, change_group.name
            ))
        }
    };
    if let Some(message) = blocked {
        record_note(ctx, snapshot, message).await?;
        return Ok(OperationResult::Continue);
    }

    let plan = plan_group(ctx, &snapshot.application, &change_group).await?;
    if !plan.is_viable() {
        let message = format!(
            "The number {} of component snapshots belonging to change group {} is less than {}, skipping group snapshot creation",
            plan.constituents.len(),
            change_group.name,
            MIN_CONSTITUENTS
        );
        record_note(ctx, snapshot, message).await?;
        return Ok(OperationResult::Continue);
    }

    let group = build_group_snapshot(&snapshot.application, &change_group, &plan)?;
    let group_name = group.name.clone();
    match ctx
        .execute(ClusterEffect::CreateSnapshot {
            snapshot: Box::new(group),
        })
        .await
    {
        Ok(_) => info!(snapshot = %group_name, change_group = %change_group.name, "Created group snapshot"),
        Err(e) if e.store_kind() == Some(StoreErrorKind::AlreadyExists) => {
            debug!(snapshot = %group_name, "Group snapshot already exists");
        }
        Err(e) if e.store_kind() == Some(StoreErrorKind::Forbidden) => {
            warn!(snapshot = %group_name, error = %e, "Not allowed to create group snapshot");
            let message = format!(
                "Failed to create group snapshot for change group {} due to error {}",
                change_group.name, e
            );
            notify_constituents(ctx, snapshot, &plan.constituents, &message).await?;
            return Ok(OperationResult::Stop);
        }
        Err(e) => return Err(e),
    }

    let message = format!(
        "Group snapshot {} is created for change group {}",
        group_name, change_group.name
    );
    notify_constituents(ctx, snapshot, &plan.constituents, &message).await?;
    Ok(OperationResult::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::test_utils::{TestHarness, build_job, component, group_member, open_pr, with_build_snapshot};
    use crate::types::JobPhase;

    /// A group of `components` with one open-PR snapshot and one settled
    /// build each. Returns the snapshot of the first component.
    fn settled_group(h: &TestHarness, components: &[&str]) -> Snapshot {
        let members: Vec<Snapshot> = components
            .iter()
            .map(|c| group_member(&format!("{}-snap", c), c, "hash", 1))
            .collect();
        h.cluster.update(|s| {
            for (c, member) in components.iter().zip(&members) {
                s.components.push(component(c, None));
                s.open_pull_requests.push(open_pr(member));
                s.jobs.push(with_build_snapshot(
                    build_job(&format!("{}-build", c), c, "hash", 1, JobPhase::Succeeded),
                    member.name.as_str(),
                ));
            }
            s.snapshots.extend(members.iter().cloned());
        });
        members[0].clone()
    }

    #[tokio::test]
    async fn single_open_pull_request_produces_no_group() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api"]);

        let result = ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();

        assert_eq!(result, OperationResult::Continue);
        assert_eq!(h.cluster.applied_count("create_snapshot"), 0);
        assert!(snapshot.annotations[GROUP_CREATION_ANNOTATION].contains("less than 2"));
        assert!(snapshot.is_marked(MarkerKind::GroupProcessed));
    }

    #[tokio::test]
    async fn two_open_pull_requests_produce_one_group() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api", "web"]);

        ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();

        let state = h.cluster.state();
        let groups: Vec<&Snapshot> = state
            .snapshots
            .iter()
            .filter(|s| matches!(s.kind, SnapshotKind::Group { .. }))
            .collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].owner.as_deref(), Some("app"));
        assert_eq!(groups[0].components.len(), 2);
        assert!(h.cluster.snapshot("web-snap").unwrap().is_marked(MarkerKind::GroupProcessed));
        assert!(snapshot.is_marked(MarkerKind::GroupProcessed));
    }

    #[tokio::test]
    async fn retried_creation_treats_existing_group_as_success() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api", "web"]);
        let plan = plan_group(h.ctx(), "app", snapshot.kind.change_group().unwrap())
            .await
            .unwrap();
        let existing = build_group_snapshot("app", snapshot.kind.change_group().unwrap(), &plan).unwrap();
        h.cluster.update(|s| s.snapshots.push(existing));

        let result = ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();

        assert_eq!(result, OperationResult::Continue);
        assert!(snapshot.is_marked(MarkerKind::GroupProcessed));
    }

    #[tokio::test]
    async fn running_build_blocks_aggregation() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api", "web"]);
        h.cluster.update(|s| {
            s.jobs.push(build_job("web-build-2", "web", "hash", 2, JobPhase::Running));
        });

        ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();

        assert_eq!(h.cluster.applied_count("create_snapshot"), 0);
        assert!(snapshot.annotations[GROUP_CREATION_ANNOTATION].contains("still running"));
    }

    #[tokio::test]
    async fn missing_component_snapshot_requeues_while_young() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api", "web"]);
        h.cluster.update(|s| {
            s.jobs.push(build_job("web-build-2", "web", "hash", 2, JobPhase::Succeeded));
        });
        snapshot.created_at = chrono::Utc::now();

        let result = ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();
        assert_eq!(result, OperationResult::RequeueAfter(h.config.group_recheck));
        assert!(!snapshot.is_marked(MarkerKind::GroupProcessed));

        snapshot.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
        let result = ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();
        assert_eq!(result, OperationResult::Continue);
        assert!(snapshot.annotations[GROUP_CREATION_ANNOTATION].starts_with("Gave up waiting"));
    }

    #[tokio::test]
    async fn forbidden_creation_notifies_constituents_and_stops() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api", "web"]);
        h.cluster
            .fail_effect("create_snapshot", None, StoreError::forbidden("quota"), 1);

        let result = ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();

        assert_eq!(result, OperationResult::Stop);
        let web = h.cluster.snapshot("web-snap").unwrap();
        assert!(web.annotations[GROUP_CREATION_ANNOTATION].starts_with("Failed to create group snapshot"));
    }

    #[tokio::test]
    async fn push_snapshots_are_not_aggregated() {
        let h = TestHarness::new();
        let mut snapshot = settled_group(&h, &["api", "web"]);
        snapshot.trigger = crate::types::TriggerEvent::Push;

        let result = ensure_group_snapshot(h.ctx(), &mut snapshot).await.unwrap();

        assert_eq!(result, OperationResult::Continue);
        assert!(h.cluster.applied().is_empty());
    }
}
