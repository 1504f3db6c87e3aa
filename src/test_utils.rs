//! Shared fixtures for unit tests.
//!
//! Every fixture belongs to the application `"app"`. Creation times are
//! `base + n` seconds, where the base is one hour in the past, so fixtures
//! order by `n` and are old enough to be past any grace period unless a test
//! overrides `created_at`.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::effects::EffectExecutor;
use crate::reconcile::{Context, SnapshotAdapter};
use crate::store::memory::{InMemoryCluster, OpenPullRequest};
use crate::types::labels::{
    APPLICATION_LABEL, BUILD_SNAPSHOT_ANNOTATION, COMPONENT_LABEL, GROUP_HASH_LABEL,
    JOB_FINALIZER, SNAPSHOT_LABEL, TEST_TYPE_LABEL,
};
use crate::types::{
    ChangeGroupKey, Component, ComponentName, GitSource, ImageRef, IntegrationTestScenario, Job,
    JobPhase, LastKnownGood, Param, PrNumber, PullRequestRef, ReleaseTarget, ResolverRef,
    Snapshot, SnapshotComponent, SnapshotKind, SnapshotStatus, TestOutcome, TriggerEvent,
};

pub const APP: &str = "app";

static BASE_TIME: LazyLock<DateTime<Utc>> =
    LazyLock::new(|| Utc::now() - chrono::Duration::hours(1));

pub fn at(n: u32) -> DateTime<Utc> {
    *BASE_TIME + chrono::Duration::seconds(i64::from(n))
}

/// A digest-pinned image that differs per `(component, n)`.
pub fn image(component: &str, n: u32) -> ImageRef {
    let digest = hex::encode(Sha256::digest(format!("{component}-{n}").as_bytes()));
    ImageRef::new(format!("quay.io/org/{component}@sha256:{digest}"))
}

pub fn repo_url(component: &str) -> String {
    format!("https://git.example.com/org/{component}")
}

fn snapshot_component(component: &str, n: u32) -> SnapshotComponent {
    SnapshotComponent {
        name: ComponentName::from(component),
        container_image: image(component, n),
        source: Some(GitSource::new(repo_url(component), format!("commit-{component}-{n}"))),
    }
}

fn snapshot(name: &str, kind: SnapshotKind, trigger: TriggerEvent, components: Vec<SnapshotComponent>, n: u32) -> Snapshot {
    Snapshot {
        name: name.into(),
        application: APP.to_string(),
        owner: None,
        created_at: at(n),
        resource_version: 1,
        kind,
        trigger,
        components,
        pull_request: None,
        build_job: None,
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
        status: SnapshotStatus::default(),
    }
}

/// A push snapshot of a single component.
pub fn component_snapshot(name: &str, component: &str, n: u32) -> Snapshot {
    snapshot(
        name,
        SnapshotKind::Component {
            component: component.into(),
            change_group: None,
        },
        TriggerEvent::Push,
        vec![snapshot_component(component, n)],
        n,
    )
}

/// A pull-request snapshot of a single component, opened from a fork
/// against `main`.
pub fn pr_snapshot(name: &str, component: &str, pr: u64, n: u32) -> Snapshot {
    let mut s = component_snapshot(name, component, n);
    s.trigger = TriggerEvent::PullRequest;
    s.pull_request = Some(PullRequestRef {
        repo_url: repo_url(component),
        source_repo_url: format!("https://git.example.com/fork/{component}"),
        number: PrNumber(pr),
        target_branch: "main".to_string(),
        sha: format!("head-{name}"),
    });
    s
}

/// A pull-request snapshot belonging to change group `"feature"`.
///
/// The pull request number is `100 + n`, on the component's own repository.
pub fn group_member(name: &str, component: &str, hash: &str, n: u32) -> Snapshot {
    let mut s = pr_snapshot(name, component, 100 + u64::from(n), n);
    s.kind = SnapshotKind::Component {
        component: component.into(),
        change_group: Some(ChangeGroupKey::new("feature", hash)),
    };
    s.labels.insert(GROUP_HASH_LABEL.to_string(), hash.to_string());
    s
}

pub fn group_snapshot(name: &str, hash: &str, n: u32) -> Snapshot {
    let mut s = snapshot(
        name,
        SnapshotKind::Group {
            change_group: ChangeGroupKey::new("feature", hash),
        },
        TriggerEvent::PullRequest,
        vec![snapshot_component("api", n), snapshot_component("web", n)],
        n,
    );
    s.owner = Some(APP.to_string());
    s.labels.insert(GROUP_HASH_LABEL.to_string(), hash.to_string());
    s
}

pub fn override_snapshot(name: &str, components: &[&str]) -> Snapshot {
    snapshot(
        name,
        SnapshotKind::Override,
        TriggerEvent::Manual,
        components.iter().map(|c| snapshot_component(c, 1)).collect(),
        1,
    )
}

/// A required scenario with no contexts, resolved from a bundle.
pub fn scenario(name: &str) -> IntegrationTestScenario {
    IntegrationTestScenario {
        name: name.into(),
        application: APP.to_string(),
        resolver_ref: ResolverRef {
            resolver: "bundles".to_string(),
            params: vec![Param::new("name", name)],
        },
        params: vec![],
        contexts: vec![],
        optional: false,
        timeouts: None,
    }
}

pub fn component(name: &str, last_promoted_image: Option<String>) -> Component {
    Component {
        name: name.into(),
        application: APP.to_string(),
        resource_version: 1,
        source_url: Some(repo_url(name)),
        status: LastKnownGood {
            last_promoted_image: last_promoted_image.map(ImageRef::new),
            last_built_commit: Some(format!("commit-{name}-0")),
        },
    }
}

/// An integration job created for `snapshot`.
pub fn integration_job(name: &str, snapshot: &Snapshot, phase: JobPhase) -> Job {
    let labels = BTreeMap::from([
        (SNAPSHOT_LABEL.to_string(), snapshot.name.to_string()),
        (APPLICATION_LABEL.to_string(), snapshot.application.clone()),
        (TEST_TYPE_LABEL.to_string(), "integration".to_string()),
    ]);
    Job {
        name: name.into(),
        created_at: snapshot.created_at,
        component: snapshot.component().cloned(),
        phase,
        cancel: None,
        labels,
        annotations: BTreeMap::new(),
        finalizers: vec![JOB_FINALIZER.to_string()],
    }
}

/// A build job for `component` in change group `hash`.
pub fn build_job(name: &str, component: &str, hash: &str, n: u32, phase: JobPhase) -> Job {
    let labels = BTreeMap::from([
        (GROUP_HASH_LABEL.to_string(), hash.to_string()),
        (APPLICATION_LABEL.to_string(), APP.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
    ]);
    Job {
        name: name.into(),
        created_at: at(n),
        component: Some(component.into()),
        phase,
        cancel: None,
        labels,
        annotations: BTreeMap::new(),
        finalizers: vec![],
    }
}

/// Records that `job` produced `snapshot`.
pub fn with_build_snapshot(mut job: Job, snapshot: &str) -> Job {
    job.annotations
        .insert(BUILD_SNAPSHOT_ANNOTATION.to_string(), snapshot.to_string());
    job
}

pub fn open_pr(snapshot: &Snapshot) -> OpenPullRequest {
    let pr = snapshot
        .pull_request
        .as_ref()
        .expect("fixture has a pull request");
    OpenPullRequest {
        repo_url: pr.repo_url.clone(),
        number: pr.number,
    }
}

pub fn passed(mut snapshot: Snapshot) -> Snapshot {
    snapshot.status.testing.outcome = TestOutcome::Passed;
    snapshot.status.testing.first_started_at = Some(snapshot.created_at);
    snapshot.status.testing.finished_at = Some(Utc::now());
    snapshot
}

pub fn release_target(name: &str) -> ReleaseTarget {
    ReleaseTarget {
        name: name.to_string(),
        application: APP.to_string(),
        auto_release: true,
    }
}

/// An in-memory cluster wired to an executor and default configuration.
pub struct TestHarness {
    pub cluster: InMemoryCluster,
    pub executor: EffectExecutor<InMemoryCluster>,
    pub config: ControllerConfig,
    pub cancel: CancellationToken,
}

impl TestHarness {
    pub fn new() -> Self {
        let cluster = InMemoryCluster::new();
        let cancel = CancellationToken::new();
        let config = ControllerConfig::default();
        let executor = EffectExecutor::new(cluster.clone(), cancel.clone(), Duration::from_secs(5));
        TestHarness {
            cluster,
            executor,
            config,
            cancel,
        }
    }

    pub fn ctx(&self) -> Context<'_, InMemoryCluster, InMemoryCluster> {
        Context::new(&self.cluster, &self.executor, &self.config)
    }

    pub fn adapter(&self, snapshot: Snapshot) -> SnapshotAdapter<'_, InMemoryCluster, InMemoryCluster> {
        SnapshotAdapter::new(snapshot, &self.cluster, &self.executor, &self.config)
    }
}
