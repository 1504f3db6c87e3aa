//! Application components and their last-known-good record.

use serde::{Deserialize, Serialize};

use super::ids::{ComponentName, ImageRef};
use super::snapshot::GitSource;

/// The candidate record maintained by the promoter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastKnownGood {
    #[serde(default)]
    pub last_promoted_image: Option<ImageRef>,
    #[serde(default)]
    pub last_built_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: ComponentName,
    pub application: String,
    /// Last observed version, used for conditional writes.
    #[serde(default)]
    pub resource_version: u64,
    /// Repository the component is built from.
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub status: LastKnownGood,
}

impl Component {
    /// The git source of the last promoted build, if it can be resolved.
    pub fn candidate_source(&self) -> Option<GitSource> {
        let url = self.source_url.as_deref().filter(|u| !u.is_empty())?;
        let revision = self
            .status
            .last_built_commit
            .as_deref()
            .filter(|r| !r.is_empty())?;
        Some(GitSource::new(url, revision))
    }
}
