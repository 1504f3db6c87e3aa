//! Well-known label and annotation keys.
//!
//! Labels are used for queries by the data-access layer; annotations carry
//! opaque payloads (the ledger blob, diagnostic notes).

/// Annotation holding the serialized test status ledger.
pub const TEST_STATUS_ANNOTATION: &str = "integration.dev/test-status";

/// Label requesting a re-run. Value is `all` or a scenario name.
pub const RERUN_LABEL: &str = "integration.dev/run";

/// Rerun label value selecting every applicable scenario.
pub const RERUN_ALL: &str = "all";

/// Label linking a job or snapshot to its snapshot.
pub const SNAPSHOT_LABEL: &str = "integration.dev/snapshot";

/// Label linking a resource to its application.
pub const APPLICATION_LABEL: &str = "integration.dev/application";

/// Label linking a resource to a component.
pub const COMPONENT_LABEL: &str = "integration.dev/component";

/// Label naming the scenario a test job was created for.
pub const SCENARIO_LABEL: &str = "integration.dev/scenario";

/// Label naming the kind of test job.
pub const TEST_TYPE_LABEL: &str = "integration.dev/test-type";

/// Label carrying the change-group hash.
pub const GROUP_HASH_LABEL: &str = "integration.dev/pr-group-sha";

/// Annotation carrying the human-readable change-group name.
pub const GROUP_NAME_ANNOTATION: &str = "integration.dev/pr-group";

/// Annotation listing the constituent snapshots of a group snapshot.
pub const GROUP_COMPONENTS_ANNOTATION: &str = "integration.dev/group-test-info";

/// Annotation set on a job that was canceled because its snapshot was superseded.
pub const SUPERSEDED_ANNOTATION: &str = "integration.dev/pr-group-cancelled";

/// Annotation on a build job naming the component snapshot it produced.
pub const BUILD_SNAPSHOT_ANNOTATION: &str = "integration.dev/snapshot";

/// Finalizer placed on every integration test job.
pub const JOB_FINALIZER: &str = "integration.dev/job-finalizer";

/// Annotation prefix for pull-request metadata copied onto test jobs.
pub const PULL_REQUEST_ANNOTATION_PREFIX: &str = "pac.integration.dev/";

/// Label naming the Snapshot's kind (`component`, `group` or `override`).
pub const SNAPSHOT_TYPE_LABEL: &str = "integration.dev/type";

/// Annotation carrying the latest diagnostic about group snapshot creation.
pub const GROUP_CREATION_ANNOTATION: &str = "integration.dev/pr-group-creation";
