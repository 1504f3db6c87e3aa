//! Access to the backing store.
//!
//! - [`loader`]: the read-side trait implemented by the data-access layer
//! - [`error`]: the error taxonomy shared by reads and writes
//! - [`retry`]: immediate retries for conditional updates
//! - [`memory`]: an in-memory cluster implementing both sides

pub mod error;
pub mod loader;
pub mod memory;
pub mod retry;

pub use error::{StoreError, StoreErrorKind};
pub use loader::ResourceLoader;
pub use memory::{ClusterState, InMemoryCluster};
pub use retry::{ConflictAware, ConflictRetry, retry_on_conflict};
