//! Mutations against the backing store, described as data.
//!
//! The core never calls the store directly to change anything; it builds a
//! [`ClusterEffect`] and hands it to an interpreter. This keeps every write
//! visible in logs and lets tests assert exactly which writes happened.

use serde::{Deserialize, Serialize};

use crate::types::{
    CancelRequest, ComponentName, JobName, JobSpec, LastKnownGood, Marker, MarkerKind,
    ReleaseSpec, Snapshot, SnapshotName, TestingStatus,
};
use crate::types::labels::TEST_STATUS_ANNOTATION;

/// A change to one Snapshot's metadata or status.
///
/// Patches only touch the field they name, so patches from concurrent
/// reconciliations of different concerns do not clobber each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SnapshotPatch {
    /// Replace the ledger blob annotation.
    WriteLedger { blob: String },

    /// Set a single annotation.
    SetAnnotation { key: String, value: String },

    /// Remove a label if present.
    RemoveLabel { key: String },

    /// Set a lifecycle marker. A marker that is already present is kept.
    SetMarker { kind: MarkerKind, marker: Marker },

    /// Replace the aggregate testing condition.
    SetTesting { testing: TestingStatus },

    /// Record or clear a processing error.
    SetIntegrationError { message: Option<String> },
}

impl SnapshotPatch {
    /// Applies the patch to an in-memory copy.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        match self {
            SnapshotPatch::WriteLedger { blob } => {
                snapshot
                    .annotations
                    .insert(TEST_STATUS_ANNOTATION.to_string(), blob.clone());
            }
            SnapshotPatch::SetAnnotation { key, value } => {
                snapshot.annotations.insert(key.clone(), value.clone());
            }
            SnapshotPatch::RemoveLabel { key } => {
                snapshot.labels.remove(key);
            }
            SnapshotPatch::SetMarker { kind, marker } => {
                snapshot.status.markers.set(*kind, marker.clone());
            }
            SnapshotPatch::SetTesting { testing } => {
                snapshot.status.testing = testing.clone();
            }
            SnapshotPatch::SetIntegrationError { message } => {
                snapshot.status.integration_error = message.clone();
            }
        }
    }
}

/// A mutation issued against the backing store or job backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect_type", rename_all = "snake_case")]
pub enum ClusterEffect {
    // ─── Jobs ─────────────────────────────────────────────────────────────────
    /// Submit a new job descriptor. Responds with the generated name.
    CreateJob { spec: Box<JobSpec> },

    /// Drop a finalizer from a job so it can be garbage collected.
    RemoveJobFinalizer { job: JobName, finalizer: String },

    /// Ask the runner to stop the job gracefully and tag why.
    CancelJob {
        job: JobName,
        request: CancelRequest,
        annotation: (String, String),
    },

    // ─── Snapshots ────────────────────────────────────────────────────────────
    /// Create a Snapshot. Responds with its name.
    CreateSnapshot { snapshot: Box<Snapshot> },

    /// Patch a Snapshot's metadata or status.
    ///
    /// With an `expected_version`, fails with `Conflict` if the Snapshot was
    /// modified since that version was read. Without one the patch is merged
    /// unconditionally, which is only used for field-scoped notes on
    /// Snapshots the caller never read.
    PatchSnapshot {
        snapshot: SnapshotName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_version: Option<u64>,
        patch: SnapshotPatch,
    },

    // ─── Components ───────────────────────────────────────────────────────────
    /// Conditionally replace a component's candidate record.
    ///
    /// Fails with `Conflict` if the component's version is no longer
    /// `expected_version`.
    UpdateCandidate {
        component: ComponentName,
        expected_version: u64,
        candidate: LastKnownGood,
    },

    // ─── Releases ─────────────────────────────────────────────────────────────
    /// Create a release record. Responds with its name.
    CreateRelease { spec: ReleaseSpec },

    /// Mark a release as created by automation.
    MarkReleaseAutomated { release: String },
}

impl ClusterEffect {
    /// Returns the name of this effect for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterEffect::CreateJob { .. } => "create_job",
            ClusterEffect::RemoveJobFinalizer { .. } => "remove_job_finalizer",
            ClusterEffect::CancelJob { .. } => "cancel_job",
            ClusterEffect::CreateSnapshot { .. } => "create_snapshot",
            ClusterEffect::PatchSnapshot { .. } => "patch_snapshot",
            ClusterEffect::UpdateCandidate { .. } => "update_candidate",
            ClusterEffect::CreateRelease { .. } => "create_release",
            ClusterEffect::MarkReleaseAutomated { .. } => "mark_release_automated",
        }
    }
}

/// The store's answer to an effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterResponse {
    /// A create succeeded; carries the object's name.
    Created { name: String },

    /// A patch was applied; carries the new resource version.
    Updated { resource_version: u64 },
}

impl ClusterResponse {
    /// The created object's name, if this was a create.
    pub fn created_name(&self) -> Option<&str> {
        match self {
            ClusterResponse::Created { name } => Some(name),
            ClusterResponse::Updated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::component_snapshot;

    #[test]
    fn set_marker_patch_keeps_first_reason() {
        let mut snapshot = component_snapshot("snap", "api", 1);
        SnapshotPatch::SetMarker {
            kind: MarkerKind::Canceled,
            marker: Marker::new("superseded"),
        }
        .apply(&mut snapshot);
        SnapshotPatch::SetMarker {
            kind: MarkerKind::Canceled,
            marker: Marker::new("again"),
        }
        .apply(&mut snapshot);
        assert_eq!(
            snapshot.status.markers.canceled.as_ref().map(|m| m.reason.as_str()),
            Some("superseded")
        );
    }

    #[test]
    fn write_ledger_patch_sets_annotation() {
        let mut snapshot = component_snapshot("snap", "api", 1);
        SnapshotPatch::WriteLedger {
            blob: "{}".to_string(),
        }
        .apply(&mut snapshot);
        assert_eq!(snapshot.ledger_blob(), Some("{}"));
    }

    #[test]
    fn effects_serialize_with_type_tag() {
        let effect = ClusterEffect::MarkReleaseAutomated {
            release: "rel-1".to_string(),
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["effect_type"], "mark_release_automated");
        assert_eq!(effect.name(), "mark_release_automated");
    }
}
