//! Versioned encoding of the ledger blob.
//!
//! The ledger is stored as an opaque annotation value on the Snapshot, so the
//! format has to survive being read by older and newer controllers:
//!
//! - Unknown fields are ignored on decode (serde's default).
//! - A missing `version` is read as version 1.
//! - A newer `version` than [`LEDGER_VERSION`] is rejected rather than
//!   silently rewritten with fields dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LedgerError;
use crate::types::{JobName, ScenarioName};

/// Current ledger format version.
pub const LEDGER_VERSION: u32 = 1;

/// Status of one scenario's test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Pending,
    InProgress,
    Passed,
    Failed,
    Invalid,
}

impl TestStatus {
    /// Terminal statuses stamp `completed_at` when entered.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Invalid
        )
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub scenario: ScenarioName,
    pub status: TestStatus,
    #[serde(default)]
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<JobName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_update_time: DateTime<Utc>,
}

impl ScenarioEntry {
    pub fn pending(scenario: ScenarioName, now: DateTime<Utc>) -> Self {
        ScenarioEntry {
            scenario,
            status: TestStatus::Pending,
            details: "Pending".to_string(),
            job_name: None,
            started_at: None,
            completed_at: None,
            last_update_time: now,
        }
    }
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    scenarios: Vec<ScenarioEntry>,
}

/// Encodes entries into the blob format.
pub fn encode<'a>(entries: impl IntoIterator<Item = &'a ScenarioEntry>) -> Result<String, LedgerError> {
    let doc = LedgerDocument {
        version: LEDGER_VERSION,
        scenarios: entries.into_iter().cloned().collect(),
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Decodes a blob into its entries.
pub fn decode(blob: &str) -> Result<Vec<ScenarioEntry>, LedgerError> {
    let doc: LedgerDocument = serde_json::from_str(blob)?;
    if doc.version > LEDGER_VERSION {
        return Err(LedgerError::UnsupportedVersion {
            found: doc.version,
            supported: LEDGER_VERSION,
        });
    }
    Ok(doc.scenarios)
}
