//! Newtype wrappers for resource identifiers.
//!
//! Snapshots, scenarios, jobs and components are all addressed by plain
//! strings in the backing store. Wrapping them keeps a scenario name from being
//! passed where a job name is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

name_type!(
    /// Name of a Snapshot resource.
    SnapshotName
);

name_type!(
    /// Name of an integration test scenario.
    ScenarioName
);

name_type!(
    /// Name of a job descriptor (integration test or build).
    JobName
);

name_type!(
    /// Name of an application component.
    ComponentName
);

/// A pull request (or merge request) number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// Error returned when a container image reference does not pin a digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("image {image} has no valid sha256 digest")]
pub struct InvalidDigest {
    pub image: String,
}

/// A container image reference, e.g. `quay.io/org/app@sha256:<64 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn new(s: impl Into<String>) -> Self {
        ImageRef(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks that the reference pins a content digest.
    ///
    /// Tag-only references are rejected: promotion and aggregation must only
    /// ever point at immutable content.
    pub fn validate_digest(&self) -> Result<(), InvalidDigest> {
        let invalid = || InvalidDigest {
            image: self.0.clone(),
        };
        let (repo, digest) = self.0.rsplit_once('@').ok_or_else(invalid)?;
        if repo.is_empty() {
            return Err(invalid());
        }
        let hex = digest.strip_prefix("sha256:").ok_or_else(invalid)?;
        if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(())
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(s: &str) -> Self {
        ImageRef(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod image_ref {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn digest_pinned_refs_validate(digest in "[0-9a-f]{64}") {
                let image = ImageRef::new(format!("quay.io/org/app@sha256:{digest}"));
                prop_assert!(image.validate_digest().is_ok());
            }
        }

        #[test]
        fn tag_only_ref_is_rejected() {
            let image = ImageRef::new("quay.io/org/app:latest");
            assert_eq!(
                image.validate_digest(),
                Err(InvalidDigest {
                    image: "quay.io/org/app:latest".to_string()
                })
            );
        }

        #[test]
        fn short_digest_is_rejected() {
            let image = ImageRef::new("quay.io/org/app@sha256:abc123");
            assert!(image.validate_digest().is_err());
        }

        #[test]
        fn non_sha256_algorithm_is_rejected() {
            let image = ImageRef::new(format!("quay.io/org/app@sha512:{}", "a".repeat(64)));
            assert!(image.validate_digest().is_err());
        }

        #[test]
        fn missing_repository_is_rejected() {
            let image = ImageRef::new(format!("@sha256:{}", "a".repeat(64)));
            assert!(image.validate_digest().is_err());
        }
    }

    #[test]
    fn names_display_verbatim() {
        assert_eq!(SnapshotName::from("snap-1").to_string(), "snap-1");
        assert_eq!(PrNumber(42).to_string(), "#42");
    }
}
