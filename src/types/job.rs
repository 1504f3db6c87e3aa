//! Job descriptors.
//!
//! Jobs are executed by an external runner. This crate only creates, labels
//! and cancels descriptors, and reads their observed phase.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ComponentName, JobName, SnapshotName};
use super::scenario::{Param, ResolverRef};

/// Observed execution phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobPhase::Succeeded | JobPhase::Failed | JobPhase::Cancelled
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, JobPhase::Succeeded)
    }
}

/// Cancellation requested of the job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelRequest {
    /// Stop scheduling new steps but let the current step and the
    /// `finally` block complete.
    CancelledRunFinally,
}

/// Effective timeouts for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub pipeline_secs: u64,
    #[serde(default)]
    pub tasks_secs: Option<u64>,
    #[serde(default)]
    pub finally_secs: Option<u64>,
}

/// A job descriptor to be submitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Name prefix; the backend appends a unique suffix.
    pub generate_name: String,
    pub owner: SnapshotName,
    pub pipeline_ref: ResolverRef,
    pub params: Vec<Param>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub finalizers: Vec<String>,
    pub timeouts: Timeouts,
}

/// A job as observed in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: JobName,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub component: Option<ComponentName>,
    #[serde(default)]
    pub phase: JobPhase,
    #[serde(default)]
    pub cancel: Option<CancelRequest>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
}
