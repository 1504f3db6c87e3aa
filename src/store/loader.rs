//! Read access to the backing store.
//!
//! The data-access layer is an external collaborator. This trait is the whole
//! of what the reconciliation core needs from it: label/owner queries that
//! return the current state of related resources.

use std::future::Future;

use super::StoreError;
use crate::types::{
    Component, ComponentName, IntegrationTestScenario, Job, PrNumber, PullRequestRef, Release,
    ReleaseTarget, ScenarioName, Snapshot, SnapshotName,
};

/// Queries against the backing store.
///
/// Lists return an empty `Vec` when nothing matches. Single-object lookups
/// return a `NotFound` error when the object does not exist.
pub trait ResourceLoader {
    /// All integration test scenarios of an application, applicable or not.
    fn scenarios_for_application(
        &self,
        application: &str,
    ) -> impl Future<Output = Result<Vec<IntegrationTestScenario>, StoreError>> + Send;

    /// A single scenario by name.
    fn scenario(
        &self,
        application: &str,
        name: &ScenarioName,
    ) -> impl Future<Output = Result<IntegrationTestScenario, StoreError>> + Send;

    /// Integration test jobs owned by a snapshot.
    fn integration_jobs_for_snapshot(
        &self,
        snapshot: &SnapshotName,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Build jobs labelled with a change-group hash.
    fn build_jobs_for_change_group(
        &self,
        application: &str,
        group_hash: &str,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Component snapshots of one component for one pull request.
    fn snapshots_for_pull_request(
        &self,
        application: &str,
        component: &ComponentName,
        pr: PrNumber,
    ) -> impl Future<Output = Result<Vec<Snapshot>, StoreError>> + Send;

    /// All snapshots (component and group) carrying a change-group hash.
    fn snapshots_for_change_group(
        &self,
        application: &str,
        group_hash: &str,
    ) -> impl Future<Output = Result<Vec<Snapshot>, StoreError>> + Send;

    /// All components of an application.
    fn components(
        &self,
        application: &str,
    ) -> impl Future<Output = Result<Vec<Component>, StoreError>> + Send;

    /// A single component by name.
    fn component(
        &self,
        application: &str,
        name: &ComponentName,
    ) -> impl Future<Output = Result<Component, StoreError>> + Send;

    /// Release targets of an application with auto-release enabled.
    fn auto_release_targets(
        &self,
        application: &str,
    ) -> impl Future<Output = Result<Vec<ReleaseTarget>, StoreError>> + Send;

    /// Releases that reference a snapshot.
    fn releases_for_snapshot(
        &self,
        snapshot: &SnapshotName,
    ) -> impl Future<Output = Result<Vec<Release>, StoreError>> + Send;

    /// Asks the git provider whether a pull request is still open.
    fn is_pull_request_open(
        &self,
        pr: &PullRequestRef,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
