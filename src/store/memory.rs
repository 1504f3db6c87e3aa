//! An in-memory cluster.
//!
//! Implements both [`ResourceLoader`] and [`ClusterInterpreter`] over a
//! [`ClusterState`] held behind a mutex. It backs the test suite and the
//! dry-run binary, and records every applied effect so callers can assert on
//! the exact writes an invocation made.
//!
//! Failures can be injected per effect (and optionally per target) to
//! exercise the error paths of the control loop.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{ResourceLoader, StoreError};
use crate::effects::{ClusterEffect, ClusterInterpreter, ClusterResponse};
use crate::types::labels::{
    APPLICATION_LABEL, COMPONENT_LABEL, GROUP_HASH_LABEL, SCENARIO_LABEL, SNAPSHOT_LABEL,
    TEST_TYPE_LABEL,
};
use crate::types::{
    Component, ComponentName, IntegrationTestScenario, Job, JobName, PrNumber, PullRequestRef,
    Release, ReleaseTarget, ScenarioName, Snapshot, SnapshotName,
};

/// A pull request known to be open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPullRequest {
    pub repo_url: String,
    pub number: PrNumber,
}

/// Everything the in-memory cluster stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub scenarios: Vec<IntegrationTestScenario>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub release_targets: Vec<ReleaseTarget>,
    #[serde(default)]
    pub releases: Vec<Release>,
    #[serde(default)]
    pub open_pull_requests: Vec<OpenPullRequest>,
}

impl ClusterState {
    /// Loads a state fixture from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StoreError::not_found(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::invalid(format!("malformed cluster fixture: {}", e)))
    }

    fn snapshot_mut(&mut self, name: &SnapshotName) -> Result<&mut Snapshot, StoreError> {
        self.snapshots
            .iter_mut()
            .find(|s| &s.name == name)
            .ok_or_else(|| StoreError::not_found(format!("snapshot {} not found", name)))
    }

    fn job_mut(&mut self, name: &JobName) -> Result<&mut Job, StoreError> {
        self.jobs
            .iter_mut()
            .find(|j| &j.name == name)
            .ok_or_else(|| StoreError::not_found(format!("job {} not found", name)))
    }
}

#[derive(Debug)]
struct InjectedFailure {
    effect: &'static str,
    target: Option<String>,
    error: StoreError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Inner {
    state: ClusterState,
    applied: Vec<ClusterEffect>,
    next_suffix: u64,
    effect_failures: Vec<InjectedFailure>,
    query_failures: Vec<(&'static str, StoreError)>,
}

/// A shareable in-memory cluster. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ClusterState) -> Self {
        InMemoryCluster {
            inner: Arc::new(Mutex::new(Inner {
                state,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutates the stored state directly, bypassing the effect log.
    pub fn update<R>(&self, f: impl FnOnce(&mut ClusterState) -> R) -> R {
        f(&mut self.lock().state)
    }

    /// A copy of the current state.
    pub fn state(&self) -> ClusterState {
        self.lock().state.clone()
    }

    pub fn snapshot(&self, name: &str) -> Option<Snapshot> {
        self.lock()
            .state
            .snapshots
            .iter()
            .find(|s| s.name.as_str() == name)
            .cloned()
    }

    pub fn component(&self, name: &str) -> Option<Component> {
        self.lock()
            .state
            .components
            .iter()
            .find(|c| c.name.as_str() == name)
            .cloned()
    }

    /// Every effect applied so far, in order.
    pub fn applied(&self) -> Vec<ClusterEffect> {
        self.lock().applied.clone()
    }

    /// Number of applied effects with the given name.
    pub fn applied_count(&self, effect: &str) -> usize {
        self.lock()
            .applied
            .iter()
            .filter(|e| e.name() == effect)
            .count()
    }

    pub fn clear_applied(&self) {
        self.lock().applied.clear();
    }

    /// Makes the next `times` effects named `effect` fail with `error`.
    ///
    /// With a `target`, only effects aimed at that object fail (scenario for
    /// job creation, snapshot, component, release target or release name).
    pub fn fail_effect(&self, effect: &'static str, target: Option<&str>, error: StoreError, times: u32) {
        self.lock().effect_failures.push(InjectedFailure {
            effect,
            target: target.map(str::to_string),
            error,
            remaining: times,
        });
    }

    /// Makes every call to the named loader query fail with `error`.
    pub fn fail_query(&self, query: &'static str, error: StoreError) {
        self.lock().query_failures.push((query, error));
    }

    fn check_query(&self, query: &'static str) -> Result<(), StoreError> {
        match self.lock().query_failures.iter().find(|(q, _)| *q == query) {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn read<T>(&self, query: &'static str, f: impl FnOnce(&ClusterState) -> T) -> Result<T, StoreError> {
        self.check_query(query)?;
        Ok(f(&self.lock().state))
    }
}

fn effect_target(effect: &ClusterEffect) -> Option<String> {
    match effect {
        ClusterEffect::CreateJob { spec } => spec.labels.get(SCENARIO_LABEL).cloned(),
        ClusterEffect::RemoveJobFinalizer { job, .. } | ClusterEffect::CancelJob { job, .. } => {
            Some(job.to_string())
        }
        ClusterEffect::CreateSnapshot { snapshot } => Some(snapshot.name.to_string()),
        ClusterEffect::PatchSnapshot { snapshot, .. } => Some(snapshot.to_string()),
        ClusterEffect::UpdateCandidate { component, .. } => Some(component.to_string()),
        ClusterEffect::CreateRelease { spec } => Some(spec.target.clone()),
        ClusterEffect::MarkReleaseAutomated { release } => Some(release.clone()),
    }
}

impl Inner {
    fn take_failure(&mut self, effect: &ClusterEffect) -> Option<StoreError> {
        let target = effect_target(effect);
        let failure = self.effect_failures.iter_mut().find(|f| {
            f.remaining > 0
                && f.effect == effect.name()
                && (f.target.is_none() || f.target == target)
        })?;
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn generate_name(&mut self, prefix: &str) -> String {
        self.next_suffix += 1;
        format!("{}{:05}", prefix, self.next_suffix)
    }

    fn apply(&mut self, effect: &ClusterEffect) -> Result<ClusterResponse, StoreError> {
        match effect {
            ClusterEffect::CreateJob { spec } => {
                let name = self.generate_name(&spec.generate_name);
                self.state.jobs.push(Job {
                    name: name.as_str().into(),
                    created_at: Utc::now(),
                    component: spec
                        .labels
                        .get(COMPONENT_LABEL)
                        .map(|c| ComponentName::from(c.as_str())),
                    phase: Default::default(),
                    cancel: None,
                    labels: spec.labels.clone(),
                    annotations: spec.annotations.clone(),
                    finalizers: spec.finalizers.clone(),
                });
                Ok(ClusterResponse::Created { name })
            }
            ClusterEffect::RemoveJobFinalizer { job, finalizer } => {
                let job = self.state.job_mut(job)?;
                job.finalizers.retain(|f| f != finalizer);
                Ok(ClusterResponse::Updated { resource_version: 0 })
            }
            ClusterEffect::CancelJob {
                job,
                request,
                annotation,
            } => {
                let job = self.state.job_mut(job)?;
                job.cancel = Some(*request);
                job.annotations
                    .insert(annotation.0.clone(), annotation.1.clone());
                Ok(ClusterResponse::Updated { resource_version: 0 })
            }
            ClusterEffect::CreateSnapshot { snapshot } => {
                if self.state.snapshots.iter().any(|s| s.name == snapshot.name) {
                    return Err(StoreError::already_exists(format!(
                        "snapshot {} already exists",
                        snapshot.name
                    )));
                }
                let mut created = (**snapshot).clone();
                created.resource_version = 1;
                let name = created.name.to_string();
                self.state.snapshots.push(created);
                Ok(ClusterResponse::Created { name })
            }
            ClusterEffect::PatchSnapshot {
                snapshot: name,
                expected_version,
                patch,
            } => {
                let snapshot = self.state.snapshot_mut(name)?;
                if let Some(expected) = expected_version {
                    if snapshot.resource_version != *expected {
                        return Err(StoreError::conflict(format!(
                            "snapshot {} was modified (version {} != {})",
                            name, snapshot.resource_version, expected
                        )));
                    }
                }
                patch.apply(snapshot);
                snapshot.resource_version += 1;
                Ok(ClusterResponse::Updated {
                    resource_version: snapshot.resource_version,
                })
            }
            ClusterEffect::UpdateCandidate {
                component,
                expected_version,
                candidate,
            } => {
                let record = self
                    .state
                    .components
                    .iter_mut()
                    .find(|c| &c.name == component)
                    .ok_or_else(|| {
                        StoreError::not_found(format!("component {} not found", component))
                    })?;
                if record.resource_version != *expected_version {
                    return Err(StoreError::conflict(format!(
                        "component {} was modified (version {} != {})",
                        component, record.resource_version, expected_version
                    )));
                }
                record.status = candidate.clone();
                record.resource_version += 1;
                Ok(ClusterResponse::Updated {
                    resource_version: record.resource_version,
                })
            }
            ClusterEffect::CreateRelease { spec } => {
                let name = self.generate_name(&spec.generate_name);
                self.state.releases.push(Release {
                    name: name.clone(),
                    snapshot: spec.snapshot.clone(),
                    target: spec.target.clone(),
                    created_at: Utc::now(),
                    automated: false,
                });
                Ok(ClusterResponse::Created { name })
            }
            ClusterEffect::MarkReleaseAutomated { release } => {
                let record = self
                    .state
                    .releases
                    .iter_mut()
                    .find(|r| &r.name == release)
                    .ok_or_else(|| StoreError::not_found(format!("release {} not found", release)))?;
                record.automated = true;
                Ok(ClusterResponse::Updated { resource_version: 0 })
            }
        }
    }
}

impl ClusterInterpreter for InMemoryCluster {
    async fn interpret(&self, effect: ClusterEffect) -> Result<ClusterResponse, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.take_failure(&effect) {
            return Err(error);
        }
        let response = inner.apply(&effect)?;
        inner.applied.push(effect);
        Ok(response)
    }
}

fn has_label(labels: &std::collections::BTreeMap<String, String>, key: &str, value: &str) -> bool {
    labels.get(key).is_some_and(|v| v == value)
}

impl ResourceLoader for InMemoryCluster {
    async fn scenarios_for_application(
        &self,
        application: &str,
    ) -> Result<Vec<IntegrationTestScenario>, StoreError> {
        self.read("scenarios_for_application", |s| {
            s.scenarios
                .iter()
                .filter(|sc| sc.application == application)
                .cloned()
                .collect()
        })
    }

    async fn scenario(
        &self,
        application: &str,
        name: &ScenarioName,
    ) -> Result<IntegrationTestScenario, StoreError> {
        self.read("scenario", |s| {
            s.scenarios
                .iter()
                .find(|sc| sc.application == application && &sc.name == name)
                .cloned()
        })?
        .ok_or_else(|| StoreError::not_found(format!("scenario {} not found", name)))
    }

    async fn integration_jobs_for_snapshot(&self, snapshot: &SnapshotName) -> Result<Vec<Job>, StoreError> {
        self.read("integration_jobs_for_snapshot", |s| {
            s.jobs
                .iter()
                .filter(|j| {
                    has_label(&j.labels, SNAPSHOT_LABEL, snapshot.as_str())
                        && has_label(&j.labels, TEST_TYPE_LABEL, "integration")
                })
                .cloned()
                .collect()
        })
    }

    async fn build_jobs_for_change_group(
        &self,
        application: &str,
        group_hash: &str,
    ) -> Result<Vec<Job>, StoreError> {
        self.read("build_jobs_for_change_group", |s| {
            s.jobs
                .iter()
                .filter(|j| {
                    has_label(&j.labels, GROUP_HASH_LABEL, group_hash)
                        && has_label(&j.labels, APPLICATION_LABEL, application)
                        && !j.labels.contains_key(TEST_TYPE_LABEL)
                })
                .cloned()
                .collect()
        })
    }

    async fn snapshots_for_pull_request(
        &self,
        application: &str,
        component: &ComponentName,
        pr: PrNumber,
    ) -> Result<Vec<Snapshot>, StoreError> {
        self.read("snapshots_for_pull_request", |s| {
            s.snapshots
                .iter()
                .filter(|snap| {
                    snap.application == application
                        && snap.component() == Some(component)
                        && snap.pull_request.as_ref().is_some_and(|p| p.number == pr)
                })
                .cloned()
                .collect()
        })
    }

    async fn snapshots_for_change_group(
        &self,
        application: &str,
        group_hash: &str,
    ) -> Result<Vec<Snapshot>, StoreError> {
        self.read("snapshots_for_change_group", |s| {
            s.snapshots
                .iter()
                .filter(|snap| {
                    snap.application == application
                        && snap.kind.change_group().is_some_and(|g| g.hash == group_hash)
                })
                .cloned()
                .collect()
        })
    }

    async fn components(&self, application: &str) -> Result<Vec<Component>, StoreError> {
        self.read("components", |s| {
            s.components
                .iter()
                .filter(|c| c.application == application)
                .cloned()
                .collect()
        })
    }

    async fn component(&self, application: &str, name: &ComponentName) -> Result<Component, StoreError> {
        self.read("component", |s| {
            s.components
                .iter()
                .find(|c| c.application == application && &c.name == name)
                .cloned()
        })?
        .ok_or_else(|| StoreError::not_found(format!("component {} not found", name)))
    }

    async fn auto_release_targets(&self, application: &str) -> Result<Vec<ReleaseTarget>, StoreError> {
        self.read("auto_release_targets", |s| {
            s.release_targets
                .iter()
                .filter(|t| t.application == application && t.auto_release)
                .cloned()
                .collect()
        })
    }

    async fn releases_for_snapshot(&self, snapshot: &SnapshotName) -> Result<Vec<Release>, StoreError> {
        self.read("releases_for_snapshot", |s| {
            s.releases
                .iter()
                .filter(|r| &r.snapshot == snapshot)
                .cloned()
                .collect()
        })
    }

    async fn is_pull_request_open(&self, pr: &PullRequestRef) -> Result<bool, StoreError> {
        self.read("is_pull_request_open", |s| {
            s.open_pull_requests
                .iter()
                .any(|open| open.repo_url == pr.repo_url && open.number == pr.number)
        })
    }
}

/// Names of every snapshot kind present, for quick fixture summaries.
pub fn snapshot_kinds(state: &ClusterState) -> BTreeSet<&'static str> {
    state
        .snapshots
        .iter()
        .map(|s| s.kind.name())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SnapshotPatch;
    use crate::test_utils::{component, component_snapshot};
    use crate::types::{LastKnownGood, Marker, MarkerKind};

    #[tokio::test]
    async fn injected_failure_is_consumed() {
        let cluster = InMemoryCluster::new();
        cluster.update(|s| s.snapshots.push(component_snapshot("snap", "api", 1)));
        cluster.fail_effect("patch_snapshot", Some("snap"), StoreError::transient("down"), 1);

        let patch = || ClusterEffect::PatchSnapshot {
            snapshot: "snap".into(),
            expected_version: None,
            patch: SnapshotPatch::SetMarker {
                kind: MarkerKind::Canceled,
                marker: Marker::new("test"),
            },
        };
        assert!(cluster.interpret(patch()).await.is_err());
        assert!(cluster.interpret(patch()).await.is_ok());
        assert_eq!(cluster.applied_count("patch_snapshot"), 1);
    }

    #[tokio::test]
    async fn candidate_update_checks_version() {
        let cluster = InMemoryCluster::new();
        cluster.update(|s| s.components.push(component("api", None)));

        let update = |version| ClusterEffect::UpdateCandidate {
            component: "api".into(),
            expected_version: version,
            candidate: LastKnownGood::default(),
        };
        let err = cluster.interpret(update(7)).await.unwrap_err();
        assert_eq!(err.kind, crate::store::StoreErrorKind::Conflict);
        assert!(cluster.interpret(update(1)).await.is_ok());
        assert_eq!(cluster.component("api").unwrap().resource_version, 2);
    }

    #[tokio::test]
    async fn snapshot_patch_with_stale_version_conflicts() {
        let cluster = InMemoryCluster::new();
        cluster.update(|s| s.snapshots.push(component_snapshot("snap", "api", 1)));

        let patch = |version| ClusterEffect::PatchSnapshot {
            snapshot: "snap".into(),
            expected_version: Some(version),
            patch: SnapshotPatch::WriteLedger {
                blob: "{}".to_string(),
            },
        };
        assert_eq!(
            cluster.interpret(patch(1)).await.unwrap(),
            ClusterResponse::Updated { resource_version: 2 }
        );
        let err = cluster.interpret(patch(1)).await.unwrap_err();
        assert_eq!(err.kind, crate::store::StoreErrorKind::Conflict);
        assert_eq!(cluster.snapshot("snap").unwrap().resource_version, 2);
        assert_eq!(cluster.applied_count("patch_snapshot"), 1);
    }

    #[tokio::test]
    async fn creating_a_duplicate_snapshot_reports_already_exists() {
        let cluster = InMemoryCluster::new();
        let snapshot = component_snapshot("snap", "api", 1);
        let create = || ClusterEffect::CreateSnapshot {
            snapshot: Box::new(snapshot.clone()),
        };
        cluster.interpret(create()).await.unwrap();
        let err = cluster.interpret(create()).await.unwrap_err();
        assert_eq!(err.kind, crate::store::StoreErrorKind::AlreadyExists);
    }

    #[test]
    fn fixture_loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        let state = ClusterState {
            snapshots: vec![component_snapshot("snap", "api", 1)],
            ..ClusterState::default()
        };
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let loaded = ClusterState::from_json_file(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(snapshot_kinds(&loaded), BTreeSet::from(["component"]));
    }
}
