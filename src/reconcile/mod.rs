//! Orchestration Control Loop.
//!
//! The external scheduler invokes [`SnapshotAdapter::reconcile_snapshot`] once
//! per reconciliation request. Each concern is a separate entry point that
//! derives everything it does from the persisted Snapshot and related
//! resources, so an invocation interrupted at any point is safely repeated.

pub mod adapter;
pub mod context;
pub mod error;
pub mod outcome;

pub use adapter::{NO_REQUIRED_SCENARIOS_MESSAGE, SnapshotAdapter};
pub use context::Context;
pub use error::ReconcileError;
pub use outcome::{OperationResult, is_younger_than, requeue_if_younger_than};
