//! The Snapshot resource and its lifecycle metadata.
//!
//! A Snapshot's component list never changes after creation. Everything this
//! crate writes lives in [`SnapshotStatus`] or in annotations/labels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ComponentName, ImageRef, JobName, PrNumber, SnapshotName};
use super::labels::{RERUN_LABEL, TEST_STATUS_ANNOTATION};

/// Git coordinates of a component build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitSource {
    pub url: String,
    #[serde(default)]
    pub revision: String,
}

impl GitSource {
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        GitSource {
            url: url.into(),
            revision: revision.into(),
        }
    }

    /// Returns true if both the repository URL and revision are set.
    pub fn is_resolvable(&self) -> bool {
        !self.url.is_empty() && !self.revision.is_empty()
    }
}

/// One `(component, image, source)` triple of a Snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotComponent {
    pub name: ComponentName,
    pub container_image: ImageRef,
    #[serde(default)]
    pub source: Option<GitSource>,
}

impl SnapshotComponent {
    pub fn has_git_source(&self) -> bool {
        self.source.as_ref().is_some_and(GitSource::is_resolvable)
    }
}

/// Correlates snapshots built from one multi-component change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeGroupKey {
    pub name: String,
    pub hash: String,
}

impl ChangeGroupKey {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        ChangeGroupKey {
            name: name.into(),
            hash: hash.into(),
        }
    }

    /// Both parts must be non-empty for the key to be usable.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.hash.is_empty()
    }
}

/// What kind of Snapshot this is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Built for a single component.
    Component {
        component: ComponentName,
        #[serde(default)]
        change_group: Option<ChangeGroupKey>,
    },

    /// Aggregated from several component snapshots of one change group.
    Group { change_group: ChangeGroupKey },

    /// Created by hand to force a specific set of images.
    Override,
}

impl SnapshotKind {
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotKind::Component { .. } => "component",
            SnapshotKind::Group { .. } => "group",
            SnapshotKind::Override => "override",
        }
    }

    pub fn change_group(&self) -> Option<&ChangeGroupKey> {
        match self {
            SnapshotKind::Component { change_group, .. } => change_group.as_ref(),
            SnapshotKind::Group { change_group } => Some(change_group),
            SnapshotKind::Override => None,
        }
    }
}

/// The event that caused the Snapshot to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Push,
    PullRequest,
    Manual,
}

/// Pull-request metadata recorded by the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// The repository the PR targets.
    pub repo_url: String,
    /// The repository the PR's commits come from (differs for forks).
    pub source_repo_url: String,
    pub number: PrNumber,
    pub target_branch: String,
    /// Head commit under test.
    pub sha: String,
}

/// A one-shot lifecycle marker: present once set, never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl Marker {
    pub fn new(reason: impl Into<String>) -> Self {
        Marker {
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// The markers that replace a transactional outbox.
///
/// Each one is checked before the matching side effect and set after it, so
/// a crashed invocation repeats at most the side effects that are themselves
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMarkers {
    #[serde(default)]
    pub auto_released: Option<Marker>,
    #[serde(default)]
    pub added_to_candidates: Option<Marker>,
    #[serde(default)]
    pub group_processed: Option<Marker>,
    #[serde(default)]
    pub canceled: Option<Marker>,
    #[serde(default)]
    pub invalid: Option<Marker>,
}

/// Which marker a patch sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    AutoReleased,
    AddedToCandidates,
    GroupProcessed,
    Canceled,
    Invalid,
}

impl SnapshotMarkers {
    pub fn get(&self, kind: MarkerKind) -> Option<&Marker> {
        match kind {
            MarkerKind::AutoReleased => self.auto_released.as_ref(),
            MarkerKind::AddedToCandidates => self.added_to_candidates.as_ref(),
            MarkerKind::GroupProcessed => self.group_processed.as_ref(),
            MarkerKind::Canceled => self.canceled.as_ref(),
            MarkerKind::Invalid => self.invalid.as_ref(),
        }
    }

    /// Sets the marker unless it is already present. Returns true if it was set.
    pub fn set(&mut self, kind: MarkerKind, marker: Marker) -> bool {
        let slot = match kind {
            MarkerKind::AutoReleased => &mut self.auto_released,
            MarkerKind::AddedToCandidates => &mut self.added_to_candidates,
            MarkerKind::GroupProcessed => &mut self.group_processed,
            MarkerKind::Canceled => &mut self.canceled,
            MarkerKind::Invalid => &mut self.invalid,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(marker);
        true
    }
}

/// Aggregate outcome of testing a Snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    #[default]
    NotStarted,
    InProgress,
    Passed,
    Failed,
    Error,
}

/// The Snapshot's overall pass/fail condition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestingStatus {
    pub outcome: TestOutcome,
    #[serde(default)]
    pub message: String,
    /// Set by the first job start and never moved afterwards.
    #[serde(default)]
    pub first_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TestingStatus {
    pub fn has_finished(&self) -> bool {
        matches!(
            self.outcome,
            TestOutcome::Passed | TestOutcome::Failed | TestOutcome::Error
        )
    }
}

/// Mutable status written by the reconciliation core.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotStatus {
    #[serde(default)]
    pub testing: TestingStatus,
    #[serde(default)]
    pub markers: SnapshotMarkers,
    /// Last processing error that could not be recorded anywhere more
    /// specific. Cleared once the failing step succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_error: Option<String>,
}

/// An immutable bundle of component artifacts under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: SnapshotName,
    pub application: String,
    /// Owning application, set on snapshots created by aggregation so they
    /// are garbage collected with it.
    #[serde(default)]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last observed version, used for conditional writes.
    #[serde(default)]
    pub resource_version: u64,
    pub kind: SnapshotKind,
    pub trigger: TriggerEvent,
    pub components: Vec<SnapshotComponent>,
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
    /// The build job that produced this snapshot, for component snapshots.
    #[serde(default)]
    pub build_job: Option<JobName>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub status: SnapshotStatus,
}

impl Snapshot {
    pub fn is_push(&self) -> bool {
        self.trigger == TriggerEvent::Push
    }

    /// A component snapshot produced by a push to the default branch.
    pub fn is_component_push(&self) -> bool {
        self.is_push() && matches!(self.kind, SnapshotKind::Component { .. })
    }

    pub fn is_override(&self) -> bool {
        matches!(self.kind, SnapshotKind::Override)
    }

    pub fn component(&self) -> Option<&ComponentName> {
        match &self.kind {
            SnapshotKind::Component { component, .. } => Some(component),
            _ => None,
        }
    }

    pub fn find_component(&self, name: &ComponentName) -> Option<&SnapshotComponent> {
        self.components.iter().find(|c| &c.name == name)
    }

    pub fn is_marked(&self, kind: MarkerKind) -> bool {
        self.status.markers.get(kind).is_some()
    }

    /// The raw ledger blob, if one has been written.
    pub fn ledger_blob(&self) -> Option<&str> {
        self.annotations
            .get(TEST_STATUS_ANNOTATION)
            .map(String::as_str)
    }

    /// The pending re-run request, if any.
    pub fn rerun_request(&self) -> Option<&str> {
        self.labels
            .get(RERUN_LABEL)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
