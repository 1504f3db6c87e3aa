//! Job Lifecycle Manager.
//!
//! - [`builder`]: turns a scenario and a Snapshot into a job descriptor
//! - [`lifecycle`]: submits descriptors exactly once per scenario and handles
//!   re-run requests

pub mod builder;
pub mod lifecycle;

pub use builder::{build_job_spec, url_to_git_url};
pub use lifecycle::{JobSubmission, RerunSummary, ensure_job_exists, rerun};
