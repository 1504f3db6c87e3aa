//! Candidate Promoter and override validation.
//!
//! Each component keeps a last-known-good record (`last_promoted_image`,
//! `last_built_commit`) that aggregation falls back on. Push-built component
//! Snapshots and override Snapshots feed it. The record is shared by every
//! Snapshot of the component, so it is updated with a conditional write and a
//! few immediate retries on conflict.

use tracing::{debug, info, warn};

use crate::effects::{ClusterEffect, ClusterInterpreter, SnapshotPatch};
use crate::reconcile::{Context, OperationResult, ReconcileError};
use crate::store::{ResourceLoader, StoreErrorKind, retry_on_conflict};
use crate::types::{
    ComponentName, LastKnownGood, Marker, MarkerKind, Snapshot, SnapshotComponent, SnapshotKind,
};

/// Marker reason once a Snapshot's components were promoted.
pub const PROMOTED_MESSAGE: &str =
    "The Snapshot's component(s) was/were added to the global candidate list";

/// What happened to one component's candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    Updated,
    Unchanged,
    /// The component no longer exists.
    Missing,
}

/// Promotes `entry` into its component's candidate record.
///
/// The record is re-read before every attempt. Nothing is written when the
/// recorded image already matches.
pub async fn promote_component<L, I>(
    ctx: Context<'_, L, I>,
    application: &str,
    entry: &SnapshotComponent,
) -> Result<Promotion, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let result = retry_on_conflict(ctx.config.promotion_retry, move || async move {
        let component = ctx
            .query(ctx.loader.component(application, &entry.name))
            .await?;
        if component.status.last_promoted_image.as_ref() == Some(&entry.container_image) {
            return Ok(Promotion::Unchanged);
        }
        let mut candidate = LastKnownGood {
            last_promoted_image: Some(entry.container_image.clone()),
            ..component.status.clone()
        };
        if let Some(revision) = entry
            .source
            .as_ref()
            .map(|s| s.revision.clone())
            .filter(|r| !r.is_empty())
        {
            candidate.last_built_commit = Some(revision);
        }
        ctx.execute(ClusterEffect::UpdateCandidate {
            component: component.name.clone(),
            expected_version: component.resource_version,
            candidate,
        })
        .await?;
        Ok::<_, ReconcileError>(Promotion::Updated)
    })
    .await;

    match result {
        Ok(Promotion::Updated) => {
            info!(component = %entry.name, image = %entry.container_image.as_str(), "Updated last promoted image");
            Ok(Promotion::Updated)
        }
        Err(e) if e.store_kind() == Some(StoreErrorKind::NotFound) => {
            warn!(component = %entry.name, "Component not found, not promoting");
            Ok(Promotion::Missing)
        }
        other => other,
    }
}

/// Feeds a push-built component Snapshot or an override Snapshot into the
/// candidate records, once.
pub async fn ensure_candidates_updated<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
) -> Result<OperationResult, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    if !snapshot.is_component_push() && !snapshot.is_override() {
        debug!(snapshot = %snapshot.name, "Neither a push component snapshot nor an override, not promoting");
        return Ok(OperationResult::Continue);
    }
    if snapshot.is_marked(MarkerKind::AddedToCandidates) {
        debug!(snapshot = %snapshot.name, "Snapshot was already promoted");
        return Ok(OperationResult::Continue);
    }

    match &snapshot.kind {
        SnapshotKind::Component { component, .. } => {
            match snapshot.find_component(component) {
                Some(entry) => {
                    promote_component(ctx, &snapshot.application, entry).await?;
                }
                None => warn!(snapshot = %snapshot.name, component = %component, "Snapshot does not list its own component"),
            }
        }
        SnapshotKind::Override => {
            for entry in &snapshot.components {
                if let Err(reason) = promotable_override_entry(entry) {
                    warn!(snapshot = %snapshot.name, component = %entry.name, reason = %reason, "Skipping override component");
                    continue;
                }
                promote_component(ctx, &snapshot.application, entry).await?;
            }
        }
        SnapshotKind::Group { .. } => return Ok(OperationResult::Continue),
    }

    ctx.patch_snapshot(
        snapshot,
        SnapshotPatch::SetMarker {
            kind: MarkerKind::AddedToCandidates,
            marker: Marker::new(PROMOTED_MESSAGE),
        },
    )
    .await?;
    Ok(OperationResult::Continue)
}

fn promotable_override_entry(entry: &SnapshotComponent) -> Result<(), String> {
    entry
        .container_image
        .validate_digest()
        .map_err(|e| e.to_string())?;
    if !entry.has_git_source() {
        return Err(format!("component {} has no git url/revision defined", entry.name));
    }
    Ok(())
}

/// Marks an override Snapshot invalid if any of its components is unusable.
///
/// Every component must exist in the application, pin a digest and carry a
/// git source. All problems are joined into the invalid marker's reason.
pub async fn ensure_override_valid<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &mut Snapshot,
) -> Result<OperationResult, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    if !snapshot.is_override() || snapshot.is_marked(MarkerKind::Invalid) {
        return Ok(OperationResult::Continue);
    }

    let mut problems = Vec::new();
    for entry in &snapshot.components {
        if let Some(problem) = missing_component(ctx, snapshot, &entry.name).await? {
            problems.push(problem);
        }
        if let Err(e) = entry.container_image.validate_digest() {
            problems.push(e.to_string());
        }
        if !entry.has_git_source() {
            problems.push(format!("component {} has no git url/revision defined", entry.name));
        }
    }

    if !problems.is_empty() {
        let reason = problems.join("; ");
        warn!(snapshot = %snapshot.name, reason = %reason, "Marking override snapshot invalid");
        ctx.patch_snapshot(
            snapshot,
            SnapshotPatch::SetMarker {
                kind: MarkerKind::Invalid,
                marker: Marker::new(reason),
            },
        )
        .await?;
    }
    Ok(OperationResult::Continue)
}

async fn missing_component<L, I>(
    ctx: Context<'_, L, I>,
    snapshot: &Snapshot,
    name: &ComponentName,
) -> Result<Option<String>, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    match ctx.query(ctx.loader.component(&snapshot.application, name)).await {
        Ok(_) => Ok(None),
        Err(e) if e.store_kind() == Some(StoreErrorKind::NotFound) => Ok(Some(format!(
            "component {} defined in snapshot {} doesn't exist under application {}",
            name, snapshot.name, snapshot.application
        ))),
        Err(e) => Err(e),
    }
}
