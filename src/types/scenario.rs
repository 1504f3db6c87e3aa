//! Integration test scenarios.
//!
//! Scenarios are read-only here: they come from the data-access layer and are
//! only used to decide what to run and how to parameterize the job.

use serde::{Deserialize, Serialize};

use super::ids::ScenarioName;
use super::job::Timeouts;
use super::snapshot::{Snapshot, SnapshotKind, TriggerEvent};

/// Resolver kind that fetches the pipeline definition from git.
pub const GIT_RESOLVER: &str = "git";

/// Resolver parameter naming the repository URL.
pub const RESOLVER_PARAM_URL: &str = "url";

/// Resolver parameter naming the revision.
pub const RESOLVER_PARAM_REVISION: &str = "revision";

/// A named string parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Where the job's pipeline definition is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverRef {
    pub resolver: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

impl ResolverRef {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Replaces the value of `name`, appending the parameter if absent.
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(p) => p.value = value,
            None => self.params.push(Param::new(name, value)),
        }
    }
}

/// A named, parameterized integration test definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationTestScenario {
    pub name: ScenarioName,
    pub application: String,
    pub resolver_ref: ResolverRef,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Applicability filter. Empty means "applies to everything".
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Optional scenarios do not gate promotion.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub timeouts: Option<Timeouts>,
}

impl IntegrationTestScenario {
    /// Returns true if this scenario should run for `snapshot`.
    pub fn applies_to(&self, snapshot: &Snapshot) -> bool {
        if self.contexts.is_empty() {
            return true;
        }
        if self.contexts.iter().any(|c| c == "disabled") {
            return false;
        }
        self.contexts
            .iter()
            .any(|context| context_matches(context, snapshot))
    }

    pub fn is_required(&self) -> bool {
        !self.optional
    }
}

fn context_matches(context: &str, snapshot: &Snapshot) -> bool {
    match context {
        "application" => true,
        "component" => matches!(snapshot.kind, SnapshotKind::Component { .. }),
        "group" => matches!(snapshot.kind, SnapshotKind::Group { .. }),
        "override" => snapshot.is_override(),
        "push" => snapshot.trigger == TriggerEvent::Push,
        "pull_request" => snapshot.trigger == TriggerEvent::PullRequest,
        other => match (other.strip_prefix("component_"), snapshot.component()) {
            (Some(wanted), Some(component)) => wanted == component.as_str(),
            _ => false,
        },
    }
}

/// Keeps only the scenarios that apply to `snapshot`.
pub fn applicable_scenarios(
    scenarios: Vec<IntegrationTestScenario>,
    snapshot: &Snapshot,
) -> Vec<IntegrationTestScenario> {
    scenarios
        .into_iter()
        .filter(|s| s.applies_to(snapshot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{component_snapshot, group_snapshot, scenario};

    fn with_contexts(contexts: &[&str]) -> IntegrationTestScenario {
        let mut s = scenario("e2e");
        s.contexts = contexts.iter().map(|c| c.to_string()).collect();
        s
    }

    #[test]
    fn no_contexts_applies_everywhere() {
        let snapshot = component_snapshot("snap", "api", 1);
        assert!(with_contexts(&[]).applies_to(&snapshot));
    }

    #[test]
    fn component_specific_context() {
        let snapshot = component_snapshot("snap", "api", 1);
        assert!(with_contexts(&["component_api"]).applies_to(&snapshot));
        assert!(!with_contexts(&["component_web"]).applies_to(&snapshot));
        assert!(!with_contexts(&["group"]).applies_to(&snapshot));
    }

    #[test]
    fn group_context_only_matches_group_snapshots() {
        let group = group_snapshot("g", "hash", 1);
        assert!(with_contexts(&["group"]).applies_to(&group));
        assert!(!with_contexts(&["component_api"]).applies_to(&group));
    }

    #[test]
    fn disabled_context_wins() {
        let snapshot = component_snapshot("snap", "api", 1);
        assert!(!with_contexts(&["application", "disabled"]).applies_to(&snapshot));
    }

    #[test]
    fn set_param_replaces_or_appends() {
        let mut resolver = ResolverRef {
            resolver: GIT_RESOLVER.to_string(),
            params: vec![Param::new(RESOLVER_PARAM_URL, "a")],
        };
        resolver.set_param(RESOLVER_PARAM_URL, "b");
        resolver.set_param(RESOLVER_PARAM_REVISION, "main");
        assert_eq!(resolver.param(RESOLVER_PARAM_URL), Some("b"));
        assert_eq!(resolver.param(RESOLVER_PARAM_REVISION), Some("main"));
        assert_eq!(resolver.params.len(), 2);
    }
}
