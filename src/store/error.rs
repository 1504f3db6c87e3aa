//! Backing-store error taxonomy.
//!
//! Every failure from the data-access layer or the job backend is sorted into
//! one of a few kinds, because the kind alone decides what the control loop
//! does next:
//!
//! - **Invalid**: the backend rejected the request as malformed. Terminal for
//!   the sub-operation; recorded in the ledger or as a diagnostic.
//! - **NotFound**: the referenced resource is gone. Dangling references are
//!   cleaned up and processing continues.
//! - **Conflict**: optimistic-concurrency collision. Never resolved locally
//!   except for the candidate record, which gets a few immediate attempts.
//! - **AlreadyExists**: a create collided with an existing object of the same
//!   name. Deterministically named creates treat this as success.
//! - **Forbidden**: permission denied. Terminal for the sub-operation.
//! - **Transient**: the backend is unavailable. Requeued with backoff.

use std::fmt;

use thiserror::Error;

/// The kind of store error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    Invalid,
    NotFound,
    Conflict,
    AlreadyExists,
    Forbidden,
    Transient,
}

impl StoreErrorKind {
    /// Returns true if re-invoking the operation later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreErrorKind::Conflict | StoreErrorKind::Transient)
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreErrorKind::Invalid => "invalid",
            StoreErrorKind::NotFound => "not found",
            StoreErrorKind::Conflict => "conflict",
            StoreErrorKind::AlreadyExists => "already exists",
            StoreErrorKind::Forbidden => "forbidden",
            StoreErrorKind::Transient => "transient",
        };
        f.write_str(s)
    }
}

/// An error returned by the backing store or job backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct StoreError {
    pub kind: StoreErrorKind,

    /// The HTTP status code, if the backend reported one.
    pub status_code: Option<u16>,

    pub message: String,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Invalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Conflict, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::AlreadyExists, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Forbidden, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn is(&self, kind: StoreErrorKind) -> bool {
        self.kind == kind
    }

    /// Categorizes a raw backend failure.
    ///
    /// Message patterns are checked before the status code: an admission
    /// webhook denial arrives with a generic status but must be terminal.
    pub fn classify(status_code: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if is_validation_rejection(&message) {
            StoreErrorKind::Invalid
        } else {
            match status_code {
                Some(400) | Some(422) => StoreErrorKind::Invalid,
                Some(401) | Some(403) => StoreErrorKind::Forbidden,
                Some(404) => StoreErrorKind::NotFound,
                Some(409) if message.to_lowercase().contains("already exists") => {
                    StoreErrorKind::AlreadyExists
                }
                Some(409) => StoreErrorKind::Conflict,
                Some(429) => StoreErrorKind::Transient,
                Some(code) if (500..600).contains(&code) => StoreErrorKind::Transient,
                Some(_) => StoreErrorKind::Invalid,
                // No status: the request never got an answer.
                None => StoreErrorKind::Transient,
            }
        };
        StoreError {
            kind,
            status_code,
            message,
        }
    }
}

/// Checks if a message is an admission or schema validation rejection.
fn is_validation_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    (lower.contains("admission webhook") && lower.contains("denied the request"))
        || lower.contains("validation failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_denial_is_invalid_regardless_of_status() {
        let err = StoreError::classify(
            Some(500),
            "admission webhook \"validation.webhook.pipeline\" denied the request: validation failed: bad param",
        );
        assert_eq!(err.kind, StoreErrorKind::Invalid);
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(StoreError::classify(Some(403), "no").kind, StoreErrorKind::Forbidden);
        assert_eq!(StoreError::classify(Some(404), "gone").kind, StoreErrorKind::NotFound);
        assert_eq!(
            StoreError::classify(Some(409), "object has been modified").kind,
            StoreErrorKind::Conflict
        );
        assert_eq!(
            StoreError::classify(Some(409), "snapshots \"x\" already exists").kind,
            StoreErrorKind::AlreadyExists
        );
        assert_eq!(StoreError::classify(Some(503), "busy").kind, StoreErrorKind::Transient);
        assert_eq!(StoreError::classify(Some(422), "bad").kind, StoreErrorKind::Invalid);
    }

    #[test]
    fn unknown_errors_without_status_are_retried() {
        assert_eq!(
            StoreError::classify(None, "connection reset by peer").kind,
            StoreErrorKind::Transient
        );
    }

    #[test]
    fn retriable_kinds() {
        assert!(StoreErrorKind::Transient.is_retriable());
        assert!(StoreErrorKind::Conflict.is_retriable());
        assert!(!StoreErrorKind::Invalid.is_retriable());
        assert!(!StoreErrorKind::Forbidden.is_retriable());
    }

    #[test]
    fn display_includes_status() {
        let err = StoreError::classify(Some(404), "scenario missing");
        assert_eq!(err.to_string(), "not found (HTTP 404): scenario missing");
    }
}
