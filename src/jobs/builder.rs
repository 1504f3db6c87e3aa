//! Job descriptor construction.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::labels::{
    APPLICATION_LABEL, COMPONENT_LABEL, JOB_FINALIZER, PULL_REQUEST_ANNOTATION_PREFIX,
    SCENARIO_LABEL, SNAPSHOT_LABEL, TEST_TYPE_LABEL,
};
use crate::types::scenario::{GIT_RESOLVER, RESOLVER_PARAM_REVISION, RESOLVER_PARAM_URL};
use crate::types::{IntegrationTestScenario, JobSpec, Param, ResolverRef, Snapshot, Timeouts};

/// Job parameter carrying the Snapshot under test.
pub const SNAPSHOT_PARAM: &str = "SNAPSHOT";

/// Value of [`TEST_TYPE_LABEL`] on integration test jobs.
pub const INTEGRATION_TEST_TYPE: &str = "integration";

/// Normalises a repository URL to end in `.git`.
pub fn url_to_git_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(".git") {
        trimmed.to_string()
    } else {
        format!("{}.git", trimmed)
    }
}

/// Pins a git-resolved pipeline definition to the commit under test.
///
/// Applies only to non-push Snapshots whose scenario points at the pull
/// request's target repository and branch. The resolver is redirected to the
/// source repository at the head commit. Returns true if it was rewritten.
pub fn rewrite_git_resolver(resolver: &mut ResolverRef, snapshot: &Snapshot) -> bool {
    if snapshot.is_push() || resolver.resolver != GIT_RESOLVER {
        return false;
    }
    let Some(pr) = &snapshot.pull_request else {
        return false;
    };
    let (Some(url), Some(revision)) = (
        resolver.param(RESOLVER_PARAM_URL),
        resolver.param(RESOLVER_PARAM_REVISION),
    ) else {
        return false;
    };
    if revision != pr.target_branch || url_to_git_url(url) != url_to_git_url(&pr.repo_url) {
        return false;
    }
    resolver.set_param(RESOLVER_PARAM_URL, url_to_git_url(&pr.source_repo_url));
    resolver.set_param(RESOLVER_PARAM_REVISION, pr.sha.clone());
    true
}

/// Builds the job descriptor for running `scenario` against `snapshot`.
pub fn build_job_spec(
    scenario: &IntegrationTestScenario,
    snapshot: &Snapshot,
    default_timeout: Duration,
) -> JobSpec {
    let mut pipeline_ref = scenario.resolver_ref.clone();
    rewrite_git_resolver(&mut pipeline_ref, snapshot);

    let mut params = scenario.params.clone();
    params.retain(|p| p.name != SNAPSHOT_PARAM);
    params.push(Param::new(SNAPSHOT_PARAM, snapshot.name.as_str()));

    let mut labels: BTreeMap<String, String> = inherited(&snapshot.labels);
    labels.insert(SNAPSHOT_LABEL.to_string(), snapshot.name.to_string());
    labels.insert(APPLICATION_LABEL.to_string(), snapshot.application.clone());
    labels.insert(SCENARIO_LABEL.to_string(), scenario.name.to_string());
    labels.insert(TEST_TYPE_LABEL.to_string(), INTEGRATION_TEST_TYPE.to_string());
    if let Some(component) = snapshot.component() {
        labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    }

    let timeouts = scenario.timeouts.unwrap_or(Timeouts {
        pipeline_secs: default_timeout.as_secs(),
        tasks_secs: None,
        finally_secs: None,
    });

    JobSpec {
        generate_name: format!("{}-", scenario.name),
        owner: snapshot.name.clone(),
        pipeline_ref,
        params,
        labels,
        annotations: inherited(&snapshot.annotations),
        finalizers: vec![JOB_FINALIZER.to_string()],
        timeouts,
    }
}

/// Pull-request metadata copied from the Snapshot onto its jobs.
fn inherited(source: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    source
        .iter()
        .filter(|(k, _)| k.starts_with(PULL_REQUEST_ANNOTATION_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{component_snapshot, pr_snapshot, scenario};
    use crate::types::TriggerEvent;

    fn git_scenario(url: &str, revision: &str) -> IntegrationTestScenario {
        let mut s = scenario("e2e");
        s.resolver_ref = ResolverRef {
            resolver: GIT_RESOLVER.to_string(),
            params: vec![
                Param::new(RESOLVER_PARAM_URL, url),
                Param::new(RESOLVER_PARAM_REVISION, revision),
                Param::new("pathInRepo", "pipelines/e2e.yaml"),
            ],
        };
        s
    }

    #[test]
    fn git_url_normalisation() {
        assert_eq!(url_to_git_url("https://host/org/repo"), "https://host/org/repo.git");
        assert_eq!(url_to_git_url("https://host/org/repo.git"), "https://host/org/repo.git");
        assert_eq!(url_to_git_url("https://host/org/repo/"), "https://host/org/repo.git");
    }

    #[test]
    fn resolver_is_pinned_to_pull_request_head() {
        let snapshot = pr_snapshot("snap", "api", 7, 1);
        let pr = snapshot.pull_request.clone().unwrap();
        let s = git_scenario(&pr.repo_url, &pr.target_branch);

        let spec = build_job_spec(&s, &snapshot, Duration::from_secs(60));
        assert_eq!(
            spec.pipeline_ref.param(RESOLVER_PARAM_URL),
            Some(url_to_git_url(&pr.source_repo_url).as_str())
        );
        assert_eq!(spec.pipeline_ref.param(RESOLVER_PARAM_REVISION), Some(pr.sha.as_str()));
        assert_eq!(spec.pipeline_ref.param("pathInRepo"), Some("pipelines/e2e.yaml"));
    }

    #[test]
    fn resolver_for_other_branch_is_untouched() {
        let snapshot = pr_snapshot("snap", "api", 7, 1);
        let pr = snapshot.pull_request.clone().unwrap();
        let s = git_scenario(&pr.repo_url, "release-1.0");

        let spec = build_job_spec(&s, &snapshot, Duration::from_secs(60));
        assert_eq!(spec.pipeline_ref, s.resolver_ref);
    }

    #[test]
    fn push_snapshots_are_never_rewritten() {
        let mut snapshot = pr_snapshot("snap", "api", 7, 1);
        snapshot.trigger = TriggerEvent::Push;
        let pr = snapshot.pull_request.clone().unwrap();
        let mut resolver = git_scenario(&pr.repo_url, &pr.target_branch).resolver_ref;
        assert!(!rewrite_git_resolver(&mut resolver, &snapshot));
    }

    #[test]
    fn spec_carries_labels_finalizer_and_default_timeout() {
        let mut snapshot = component_snapshot("snap", "api", 1);
        snapshot
            .annotations
            .insert(format!("{}pull-request", PULL_REQUEST_ANNOTATION_PREFIX), "7".to_string());
        snapshot
            .annotations
            .insert("unrelated".to_string(), "x".to_string());

        let spec = build_job_spec(&scenario("e2e"), &snapshot, Duration::from_secs(3600));

        assert_eq!(spec.generate_name, "e2e-");
        assert_eq!(spec.labels[SNAPSHOT_LABEL], "snap");
        assert_eq!(spec.labels[SCENARIO_LABEL], "e2e");
        assert_eq!(spec.labels[COMPONENT_LABEL], "api");
        assert_eq!(spec.labels[TEST_TYPE_LABEL], INTEGRATION_TEST_TYPE);
        assert_eq!(spec.finalizers, vec![JOB_FINALIZER.to_string()]);
        assert_eq!(spec.timeouts.pipeline_secs, 3600);
        assert_eq!(spec.annotations.len(), 1);
        assert!(spec.params.iter().any(|p| p.name == SNAPSHOT_PARAM && p.value == "snap"));
    }
}
