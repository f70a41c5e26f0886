//! # racksync
//!
//! A batch synchronization engine that reconciles a locally built, typed
//! record graph against a remote inventory-management HTTP API.
//!
//! ## Core Components
//!
//! - **Model**: Record type schemas, the type registry and the in-memory
//!   record graph with typed references between instances
//! - **Api**: The HTTP client with retry, pagination and status
//!   classification, plus the incremental on-disk cache
//! - **Sync**: The three-pass upsert engine, orphan pruning and teardown
//!
//! ## Example
//!
//! ```rust,ignore
//! use racksync::{default_registry, SyncConfig, Synchronizer};
//!
//! let config = SyncConfig::new("https://dcim.example.com", "api-token");
//! let sync = Synchronizer::new(config)?;
//! let mut inventory = sync.inventory(default_registry());
//!
//! sync.client().probe_version().await?;
//! sync.seed_all(&mut inventory).await?;
//! inventory.resolve_relations();
//!
//! // ... feed discovered records via inventory.add_or_update_local ...
//!
//! sync.ensure_lifecycle_tags(&mut inventory);
//! inventory.mark_orphans();
//! let report = sync.apply(&mut inventory).await?;
//! println!("pushed {} changes", report.writes());
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod sync;

// Re-exports for convenience
pub use api::{ApiClient, CacheStore, Method, Outcome};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use model::{
    default_registry, ChildLink, FieldValue, Inventory, RecordHandle, RecordInstance,
    RecordSchema, Reference, TypeId, TypeRegistry, ValueKind,
};
pub use sync::{Pruner, SyncReport, Synchronizer, Teardown};
