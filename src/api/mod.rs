//! Remote API access: HTTP client and incremental on-disk cache.

pub mod cache;
pub mod client;

pub use cache::{latest_update, merge_snapshots, CacheStore};
pub use client::{ApiClient, Method, Outcome};
