//! Test Status Ledger.
//!
//! Per-snapshot mapping from scenario name to `{status, details, job}`. The
//! ledger is the only record of whether a job was ever created for a scenario:
//! job objects can be pruned externally, the ledger cannot.
//!
//! # Invariants
//!
//! - An entry exists for every scenario that was applicable at initialization.
//! - Entries are never removed, only transitioned.
//! - Status is never inferred from job state; every transition is requested
//!   by the caller.
//!
//! All operations are pure; persistence is done by writing [`TestStatusLedger::encode`]
//! back into the Snapshot's annotations.

pub mod codec;

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;

pub use codec::{LEDGER_VERSION, ScenarioEntry, TestStatus};

use crate::types::{JobName, ScenarioName, Snapshot};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The scenario has no ledger entry.
    #[error("scenario {0} has no ledger entry")]
    NotFound(ScenarioName),

    /// The blob could not be parsed.
    #[error("malformed ledger blob: {0}")]
    Codec(#[from] serde_json::Error),

    /// The blob was written by a newer format.
    #[error("ledger version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// The decoded ledger for one Snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestStatusLedger {
    entries: BTreeMap<ScenarioName, ScenarioEntry>,
    dirty: bool,
}

impl TestStatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the ledger stored on `snapshot`, or an empty one if none exists.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, LedgerError> {
        match snapshot.ledger_blob() {
            Some(blob) if !blob.is_empty() => Self::decode(blob),
            _ => Ok(Self::new()),
        }
    }

    pub fn decode(blob: &str) -> Result<Self, LedgerError> {
        let entries = codec::decode(blob)?
            .into_iter()
            .map(|e| (e.scenario.clone(), e))
            .collect();
        Ok(TestStatusLedger {
            entries,
            dirty: false,
        })
    }

    pub fn encode(&self) -> Result<String, LedgerError> {
        codec::encode(self.entries.values())
    }

    /// True if any operation changed the ledger since it was decoded or
    /// last marked clean.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScenarioEntry> {
        self.entries.values()
    }

    /// Adds a `Pending` entry for every name not already present.
    pub fn initialize<'a>(&mut self, names: impl IntoIterator<Item = &'a ScenarioName>) {
        let now = Utc::now();
        for name in names {
            if !self.entries.contains_key(name) {
                self.entries
                    .insert(name.clone(), ScenarioEntry::pending(name.clone(), now));
                self.dirty = true;
            }
        }
    }

    pub fn get(&self, scenario: &ScenarioName) -> Option<&ScenarioEntry> {
        self.entries.get(scenario)
    }

    /// The job recorded for `scenario`, if one was ever created.
    pub fn job_name(&self, scenario: &ScenarioName) -> Option<&JobName> {
        self.entries
            .get(scenario)
            .and_then(|e| e.job_name.as_ref())
            .filter(|j| !j.as_str().is_empty())
    }

    /// Moves `scenario` to `status` unless it is already there.
    ///
    /// Returns true if anything changed. A missing entry is created, so a
    /// scenario that became applicable after initialization still gets
    /// recorded.
    pub fn transition(
        &mut self,
        scenario: &ScenarioName,
        status: TestStatus,
        details: impl Into<String>,
    ) -> bool {
        let now = Utc::now();
        let entry = self
            .entries
            .entry(scenario.clone())
            .or_insert_with(|| ScenarioEntry::pending(scenario.clone(), now));
        if entry.status == status {
            return false;
        }
        entry.status = status;
        entry.details = details.into();
        entry.last_update_time = now;
        match status {
            TestStatus::InProgress => {
                entry.started_at = Some(now);
                entry.completed_at = None;
            }
            s if s.is_final() => entry.completed_at = Some(now),
            _ => {}
        }
        self.dirty = true;
        true
    }

    /// Forces `scenario` back to `Pending` with no job reference.
    pub fn reset(&mut self, scenario: &ScenarioName) {
        let now = Utc::now();
        self.entries
            .insert(scenario.clone(), ScenarioEntry::pending(scenario.clone(), now));
        self.dirty = true;
    }

    /// Records the job created for `scenario`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the scenario has no entry.
    pub fn set_job_name(&mut self, scenario: &ScenarioName, job: JobName) -> Result<(), LedgerError> {
        let entry = self
            .entries
            .get_mut(scenario)
            .ok_or_else(|| LedgerError::NotFound(scenario.clone()))?;
        if entry.job_name.as_ref() != Some(&job) {
            entry.job_name = Some(job);
            entry.last_update_time = Utc::now();
            self.dirty = true;
        }
        Ok(())
    }
}
