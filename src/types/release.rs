//! Release targets and release records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SnapshotName;

/// A downstream release destination for an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTarget {
    pub name: String,
    pub application: String,
    /// Only targets with auto-release enabled are used by the trigger.
    #[serde(default)]
    pub auto_release: bool,
}

/// A release to be created for `(snapshot, target)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub generate_name: String,
    pub snapshot: SnapshotName,
    pub target: String,
}

/// A release record as observed in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub snapshot: SnapshotName,
    pub target: String,
    pub created_at: DateTime<Utc>,
    /// Set when the release was created by this system rather than a user.
    #[serde(default)]
    pub automated: bool,
}
