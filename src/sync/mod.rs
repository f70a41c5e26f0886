//! Synchronization drivers: seeding, the three-pass upsert, orphan pruning
//! and full teardown.

pub mod engine;
pub mod prune;
pub mod teardown;

pub use engine::{SyncReport, Synchronizer};
pub use prune::Pruner;
pub use teardown::Teardown;
