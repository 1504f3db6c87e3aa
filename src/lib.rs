//! Integration Train - reconciliation core for snapshot testing, change-group
//! aggregation, candidate promotion, and release creation.
//!
//! A [`reconcile::SnapshotAdapter`] drives one Snapshot through its concerns.
//! Reads go through a [`store::ResourceLoader`], writes are expressed as
//! [`effects::ClusterEffect`] values and run by an [`effects::EffectExecutor`].

pub mod config;
pub mod effects;
pub mod group;
pub mod jobs;
pub mod ledger;
pub mod promote;
pub mod reconcile;
pub mod release;
pub mod store;
pub mod supersession;
pub mod types;

#[cfg(test)]
mod test_utils;
