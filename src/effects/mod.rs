//! Effects-as-data for backing-store mutations.
//!
//! Reconciliation logic computes [`ClusterEffect`] values; an
//! [`EffectExecutor`] hands them to a [`ClusterInterpreter`] with a timeout
//! and cancellation check. This gives:
//! - Testability via the in-memory interpreter
//! - A log line for every intended write
//! - One place to bound every store call

pub mod cluster;
pub mod executor;
pub mod interpreter;

pub use cluster::{ClusterEffect, ClusterResponse, SnapshotPatch};
pub use executor::{EffectError, EffectExecutor};
pub use interpreter::ClusterInterpreter;
