//! Build-job readiness for a change group.
//!
//! Aggregation waits until every component's latest build in the group has
//! settled and produced its component Snapshot. Older builds of the same
//! component are ignored: a rebuild supersedes them.

use std::collections::BTreeMap;

use crate::types::labels::BUILD_SNAPSHOT_ANNOTATION;
use crate::types::{ComponentName, Job, JobName, Snapshot};

/// Whether a change group's builds allow aggregation yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every latest build succeeded and has its component Snapshot.
    Ready,

    /// A latest build is still running. Its completion triggers a new
    /// reconciliation, so nothing needs to be scheduled.
    Running(JobName),

    /// A latest build failed. Aggregation is abandoned for this attempt.
    Failed(JobName),

    /// A latest build succeeded but its component Snapshot does not exist yet.
    AwaitingSnapshot(JobName),
}

/// Keeps only the newest build job per component.
///
/// Ties on creation time are broken by name.
pub fn latest_per_component(jobs: Vec<Job>) -> Vec<Job> {
    let mut latest: BTreeMap<Option<ComponentName>, Job> = BTreeMap::new();
    for job in jobs {
        match latest.get(&job.component) {
            Some(current) if (&current.created_at, &current.name) >= (&job.created_at, &job.name) => {}
            _ => {
                latest.insert(job.component.clone(), job);
            }
        }
    }
    latest.into_values().collect()
}

/// Decides readiness from the group's build jobs.
///
/// `reconciling` is the component Snapshot being reconciled: its own build
/// job has not been annotated with the Snapshot yet but obviously has one.
/// A failure outranks a running build, which outranks a missing Snapshot.
pub fn assess(jobs: Vec<Job>, reconciling: &Snapshot) -> Readiness {
    let mut running = None;
    let mut awaiting = None;
    for job in latest_per_component(jobs) {
        if !job.phase.is_finished() {
            running.get_or_insert(job.name);
        } else if !job.phase.is_succeeded() {
            return Readiness::Failed(job.name);
        } else if !has_component_snapshot(&job, reconciling) {
            awaiting.get_or_insert(job.name);
        }
    }
    match (running, awaiting) {
        (Some(job), _) => Readiness::Running(job),
        (None, Some(job)) => Readiness::AwaitingSnapshot(job),
        (None, None) => Readiness::Ready,
    }
}

fn has_component_snapshot(job: &Job, reconciling: &Snapshot) -> bool {
    job.annotations
        .get(BUILD_SNAPSHOT_ANNOTATION)
        .is_some_and(|s| !s.is_empty())
        || reconciling.build_job.as_ref() == Some(&job.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_job, group_member, with_build_snapshot};
    use crate::types::JobPhase;

    #[test]
    fn older_failed_build_is_ignored() {
        let snapshot = group_member("snap-api", "api", "hash", 1);
        let old = build_job("api-build-1", "api", "hash", 1, JobPhase::Failed);
        let new = with_build_snapshot(
            build_job("api-build-2", "api", "hash", 2, JobPhase::Succeeded),
            "snap-api",
        );

        assert_eq!(assess(vec![old, new], &snapshot), Readiness::Ready);
    }

    #[test]
    fn failure_outranks_running() {
        let snapshot = group_member("snap-api", "api", "hash", 1);
        let running = build_job("web-build", "web", "hash", 1, JobPhase::Running);
        let failed = build_job("db-build", "db", "hash", 1, JobPhase::Failed);

        assert_eq!(
            assess(vec![running, failed], &snapshot),
            Readiness::Failed("db-build".into())
        );
    }

    #[test]
    fn succeeded_build_without_snapshot_is_not_ready() {
        let mut snapshot = group_member("snap-api", "api", "hash", 1);
        snapshot.build_job = Some("api-build".into());
        let own = build_job("api-build", "api", "hash", 1, JobPhase::Succeeded);
        let other = build_job("web-build", "web", "hash", 1, JobPhase::Succeeded);

        assert_eq!(
            assess(vec![own.clone(), other], &snapshot),
            Readiness::AwaitingSnapshot("web-build".into())
        );
        assert_eq!(assess(vec![own], &snapshot), Readiness::Ready);
    }

    #[test]
    fn latest_per_component_keeps_newest() {
        let jobs = vec![
            build_job("a1", "api", "hash", 1, JobPhase::Succeeded),
            build_job("a3", "api", "hash", 3, JobPhase::Running),
            build_job("a2", "api", "hash", 2, JobPhase::Failed),
            build_job("w1", "web", "hash", 1, JobPhase::Succeeded),
        ];
        let mut names: Vec<String> = latest_per_component(jobs)
            .into_iter()
            .map(|j| j.name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a3", "w1"]);
    }
}
