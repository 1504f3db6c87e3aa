//! Controller configuration.
//!
//! Every knob has a default; a few can be overridden from the environment:
//!
//! - `INTEGRATION_TRAIN_RETRY_TIMEOUT_MINS`: age after which a Snapshot's
//!   transient release failures stop being requeued (default 3 hours)
//! - `INTEGRATION_TRAIN_GROUP_WAIT_MINS`: how long aggregation waits for a
//!   succeeded build job's component Snapshot to appear (default 30 minutes)
//! - `INTEGRATION_TRAIN_GROUP_RECHECK_SECS`: requeue delay while waiting
//!   (default 60 seconds)
//! - `INTEGRATION_TRAIN_PROMOTION_ATTEMPTS`: immediate attempts for
//!   conditional component-record updates (default 3)

use std::time::Duration;

use crate::store::ConflictRetry;

/// Default age threshold for requeueing transient failures (3 hours).
const DEFAULT_RETRY_TIMEOUT_MINS: u64 = 180;

/// Default bound on the group readiness wait (30 minutes).
const DEFAULT_GROUP_WAIT_MINS: u64 = 30;

/// Default recheck interval while waiting on group readiness (60 seconds).
const DEFAULT_GROUP_RECHECK_SECS: u64 = 60;

/// Default attempts for conditional component-record updates.
const DEFAULT_PROMOTION_ATTEMPTS: u32 = 3;

/// Default pipeline timeout when a scenario declares none (1 hour).
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

/// Default bound on a single store call (30 seconds).
const DEFAULT_STORE_CALL_TIMEOUT_SECS: u64 = 30;

/// Configuration shared by every reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Snapshots older than this stop requeueing on transient release failures.
    ///
    /// Default: 3 hours. Configure via `INTEGRATION_TRAIN_RETRY_TIMEOUT_MINS`.
    pub retry_timeout: Duration,

    /// Bound on waiting for a succeeded build job's component Snapshot.
    ///
    /// Default: 30 minutes. Configure via `INTEGRATION_TRAIN_GROUP_WAIT_MINS`.
    pub group_wait: Duration,

    /// Requeue delay while the group readiness wait is running.
    pub group_recheck: Duration,

    /// Conflict retries for the per-component candidate record.
    pub promotion_retry: ConflictRetry,

    /// Pipeline timeout for scenarios that declare none.
    pub default_job_timeout: Duration,

    /// Bound on every individual store call.
    pub store_call_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        ControllerConfig {
            retry_timeout: Duration::from_secs(DEFAULT_RETRY_TIMEOUT_MINS * 60),
            group_wait: Duration::from_secs(DEFAULT_GROUP_WAIT_MINS * 60),
            group_recheck: Duration::from_secs(DEFAULT_GROUP_RECHECK_SECS),
            promotion_retry: ConflictRetry::new(
                DEFAULT_PROMOTION_ATTEMPTS,
                ConflictRetry::DEFAULT.delay,
            ),
            default_job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            store_call_timeout: Duration::from_secs(DEFAULT_STORE_CALL_TIMEOUT_SECS),
        }
    }

    /// Creates a config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let defaults = Self::new();

        let retry_mins = number("INTEGRATION_TRAIN_RETRY_TIMEOUT_MINS")
            .unwrap_or(DEFAULT_RETRY_TIMEOUT_MINS);
        let wait_mins =
            number("INTEGRATION_TRAIN_GROUP_WAIT_MINS").unwrap_or(DEFAULT_GROUP_WAIT_MINS);
        let recheck_secs =
            number("INTEGRATION_TRAIN_GROUP_RECHECK_SECS").unwrap_or(DEFAULT_GROUP_RECHECK_SECS);
        let attempts = number("INTEGRATION_TRAIN_PROMOTION_ATTEMPTS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_PROMOTION_ATTEMPTS);

        ControllerConfig {
            retry_timeout: Duration::from_secs(retry_mins.saturating_mul(60)),
            group_wait: Duration::from_secs(wait_mins.saturating_mul(60)),
            group_recheck: Duration::from_secs(recheck_secs),
            promotion_retry: ConflictRetry::new(attempts, defaults.promotion_retry.delay),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.retry_timeout, Duration::from_secs(3 * 60 * 60));
        assert_eq!(config.group_wait, Duration::from_secs(30 * 60));
        assert_eq!(config.promotion_retry.attempts, 3);
        assert_eq!(config.default_job_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("INTEGRATION_TRAIN_RETRY_TIMEOUT_MINS", "5"),
            ("INTEGRATION_TRAIN_GROUP_RECHECK_SECS", "not-a-number"),
            ("INTEGRATION_TRAIN_PROMOTION_ATTEMPTS", "0"),
        ]);
        let config = ControllerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.retry_timeout, Duration::from_secs(300));
        assert_eq!(config.group_recheck, Duration::from_secs(60));
        assert_eq!(config.promotion_retry.attempts, 1);
        assert_eq!(config.group_wait, Duration::from_secs(30 * 60));
    }
}
