//! Effect interpreter trait.
//!
//! Implementations execute [`ClusterEffect`]s against a real backing store.
//! The in-memory cluster in `store::memory` is the reference implementation
//! used by tests and the dry-run binary.

use std::future::Future;

use super::cluster::{ClusterEffect, ClusterResponse};
use crate::store::StoreError;

/// Executes cluster mutations.
///
/// Implementations must classify backend failures with
/// [`StoreError::classify`] (or construct the matching kind directly) so the
/// control loop can tell terminal rejections from retryable ones.
pub trait ClusterInterpreter {
    /// Execute an effect and return the store's response.
    fn interpret(
        &self,
        effect: ClusterEffect,
    ) -> impl Future<Output = Result<ClusterResponse, StoreError>> + Send;
}
