//! Assembling the combined artifact set of a change group.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::effects::ClusterInterpreter;
use crate::reconcile::{Context, ReconcileError};
use crate::store::ResourceLoader;
use crate::types::labels::{
    APPLICATION_LABEL, GROUP_COMPONENTS_ANNOTATION, GROUP_HASH_LABEL, GROUP_NAME_ANNOTATION,
    SNAPSHOT_TYPE_LABEL,
};
use crate::types::{
    ChangeGroupKey, Component, ComponentName, JobName, PrNumber, Snapshot, SnapshotComponent,
    SnapshotKind, SnapshotName, SnapshotStatus, TriggerEvent,
};

/// A group Snapshot needs at least this many components from open pull
/// requests to be worth creating.
pub const MIN_CONSTITUENTS: usize = 2;

/// Provenance of one component taken from an open pull request.
///
/// Never persisted on its own; a list of these is attached to the group
/// Snapshot and used to notify the constituents of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSnapshotInfo {
    pub component: ComponentName,
    pub snapshot: SnapshotName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_job: Option<JobName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PrNumber>,
}

/// The resolved contents of a prospective group Snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPlan {
    /// One entry per component, sorted by component name.
    pub components: Vec<SnapshotComponent>,

    /// The components that came from open pull requests.
    pub constituents: Vec<ComponentSnapshotInfo>,
}

impl GroupPlan {
    pub fn is_viable(&self) -> bool {
        self.constituents.len() >= MIN_CONSTITUENTS
    }
}

/// Resolves one artifact per application component.
///
/// A component's newest group member with a still-open pull request wins.
/// Otherwise its last promoted image is used, provided it pins a digest and
/// its source can be resolved. Components with neither are left out.
pub async fn plan_group<L, I>(
    ctx: Context<'_, L, I>,
    application: &str,
    change_group: &ChangeGroupKey,
) -> Result<GroupPlan, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    let members = ctx
        .query(
            ctx.loader
                .snapshots_for_change_group(application, &change_group.hash),
        )
        .await?;
    let mut by_component: BTreeMap<ComponentName, Vec<Snapshot>> = BTreeMap::new();
    for member in members {
        if let Some(component) = member.component().cloned() {
            by_component.entry(component).or_default().push(member);
        }
    }

    let mut components = ctx.query(ctx.loader.components(application)).await?;
    components.sort_by(|a, b| a.name.cmp(&b.name));

    let mut plan = GroupPlan::default();
    for component in components {
        let candidates = by_component.remove(&component.name).unwrap_or_default();
        if let Some((entry, info)) = newest_open_member(ctx, &component.name, candidates).await? {
            debug!(component = %component.name, snapshot = %info.snapshot, "Using component from open pull request");
            plan.components.push(entry);
            plan.constituents.push(info);
            continue;
        }
        match last_known_good(&component) {
            Some(entry) => {
                debug!(component = %component.name, "Using last promoted image");
                plan.components.push(entry);
            }
            None => {
                debug!(component = %component.name, "Component has no usable artifact, leaving it out");
            }
        }
    }
    Ok(plan)
}

async fn newest_open_member<L, I>(
    ctx: Context<'_, L, I>,
    component: &ComponentName,
    mut candidates: Vec<Snapshot>,
) -> Result<Option<(SnapshotComponent, ComponentSnapshotInfo)>, ReconcileError>
where
    L: ResourceLoader,
    I: ClusterInterpreter,
{
    candidates.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
    for candidate in candidates {
        let Some(pr) = &candidate.pull_request else {
            continue;
        };
        if !ctx.query(ctx.loader.is_pull_request_open(pr)).await? {
            continue;
        }
        let Some(entry) = candidate.find_component(component).cloned() else {
            continue;
        };
        let info = ComponentSnapshotInfo {
            component: component.clone(),
            snapshot: candidate.name.clone(),
            build_job: candidate.build_job.clone(),
            repo_url: Some(pr.repo_url.clone()),
            pull_request: Some(pr.number),
        };
        return Ok(Some((entry, info)));
    }
    Ok(None)
}

fn last_known_good(component: &Component) -> Option<SnapshotComponent> {
    let image = component.status.last_promoted_image.clone()?;
    if let Err(e) = image.validate_digest() {
        debug!(component = %component.name, error = %e, "Last promoted image is not pinned");
        return None;
    }
    let source = component.candidate_source()?;
    Some(SnapshotComponent {
        name: component.name.clone(),
        container_image: image,
        source: Some(source),
    })
}

/// Deterministic name for the group Snapshot built from `constituents`.
///
/// A retried aggregation over the same constituents collides with the first
/// attempt instead of creating a duplicate.
pub fn group_snapshot_name(application: &str, constituents: &[ComponentSnapshotInfo]) -> String {
    let mut names: Vec<&str> = constituents.iter().map(|c| c.snapshot.as_str()).collect();
    names.sort_unstable();
    let digest = Sha256::digest(names.join("\n").as_bytes());
    let hex = hex::encode(digest);
    format!("{}-group-{}", application, &hex[..12])
}

/// Builds the group Snapshot for a viable plan.
pub fn build_group_snapshot(
    application: &str,
    change_group: &ChangeGroupKey,
    plan: &GroupPlan,
) -> Result<Snapshot, serde_json::Error> {
    let labels = BTreeMap::from([
        (SNAPSHOT_TYPE_LABEL.to_string(), "group".to_string()),
        (APPLICATION_LABEL.to_string(), application.to_string()),
        (GROUP_HASH_LABEL.to_string(), change_group.hash.clone()),
    ]);
    let annotations = BTreeMap::from([
        (GROUP_NAME_ANNOTATION.to_string(), change_group.name.clone()),
        (
            GROUP_COMPONENTS_ANNOTATION.to_string(),
            serde_json::to_string(&plan.constituents)?,
        ),
    ]);
    let name = group_snapshot_name(application, &plan.constituents);
    info!(snapshot = %name, constituents = plan.constituents.len(), "Prepared group snapshot");
    Ok(Snapshot {
        name: name.into(),
        application: application.to_string(),
        owner: Some(application.to_string()),
        created_at: Utc::now(),
        resource_version: 0,
        kind: SnapshotKind::Group {
            change_group: change_group.clone(),
        },
        trigger: TriggerEvent::PullRequest,
        components: plan.components.clone(),
        pull_request: None,
        build_job: None,
        labels,
        annotations,
        status: SnapshotStatus::default(),
    })
}
