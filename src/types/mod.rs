//! Core domain types for the reconciliation core.
//!
//! These mirror the declarative resources the controller reads and writes:
//! snapshots, scenarios, components, jobs and releases.

pub mod component;
pub mod ids;
pub mod job;
pub mod labels;
pub mod release;
pub mod scenario;
pub mod snapshot;

pub use component::{Component, LastKnownGood};
pub use ids::{ComponentName, ImageRef, InvalidDigest, JobName, PrNumber, ScenarioName, SnapshotName};
pub use job::{CancelRequest, Job, JobPhase, JobSpec, Timeouts};
pub use release::{Release, ReleaseSpec, ReleaseTarget};
pub use scenario::{IntegrationTestScenario, Param, ResolverRef, applicable_scenarios};
pub use snapshot::{
    ChangeGroupKey, GitSource, Marker, MarkerKind, PullRequestRef, Snapshot, SnapshotComponent,
    SnapshotKind, SnapshotMarkers, SnapshotStatus, TestOutcome, TestingStatus, TriggerEvent,
};
