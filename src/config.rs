//! Configuration for the synchronization run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tag added to every record created or updated by this process.
pub const DEFAULT_PRIMARY_TAG: &str = "racksync-synced";

/// Default number of days an orphaned record survives before deletion.
pub const DEFAULT_GRACE_DAYS: i64 = 30;

/// Configuration for a synchronization run.
///
/// Built once at startup, validated, and passed by reference thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the remote API, e.g. `https://dcim.example.com`.
    pub base_url: String,
    /// API token sent as `Authorization: Token ...`.
    pub api_token: String,
    /// Verify TLS certificates.
    pub validate_tls: bool,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per request before a transport failure becomes fatal.
    pub max_retry_attempts: u32,
    /// Default page size for list requests.
    pub page_limit: u32,
    /// Page size for brief identifier listings.
    pub brief_limit: u32,
    /// Whether orphan pruning runs at all.
    pub prune_enabled: bool,
    /// Days an orphaned record survives before hard deletion.
    pub prune_grace_days: i64,
    /// Whether per-type snapshots are cached on disk.
    pub use_caching: bool,
    /// Directory holding the per-type cache files.
    pub cache_dir: PathBuf,
    /// Tag marking records owned by this process.
    pub primary_tag: String,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            validate_tls: true,
            timeout_secs: 30,
            max_retry_attempts: 4,
            page_limit: 200,
            brief_limit: 500,
            prune_enabled: false,
            prune_grace_days: DEFAULT_GRACE_DAYS,
            use_caching: true,
            cache_dir: PathBuf::from("cache"),
            primary_tag: DEFAULT_PRIMARY_TAG.to_string(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn with_pruning(mut self, grace_days: i64) -> Self {
        self.prune_enabled = true;
        self.prune_grace_days = grace_days;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn without_caching(mut self) -> Self {
        self.use_caching = false;
        self
    }

    pub fn with_primary_tag(mut self, tag: impl Into<String>) -> Self {
        self.primary_tag = tag.into();
        self
    }

    /// Tag marking records no longer reported by any active source.
    pub fn orphan_tag(&self) -> String {
        format!("{}: orphaned", self.primary_tag)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config("base_url must not be empty".into()));
        }
        if self.api_token.is_empty() {
            return Err(Error::Config("api_token must not be empty".into()));
        }
        if self.max_retry_attempts == 0 {
            return Err(Error::Config("max_retry_attempts must be at least 1".into()));
        }
        if self.page_limit == 0 {
            return Err(Error::Config("page_limit must be at least 1".into()));
        }
        if self.prune_grace_days < 0 {
            return Err(Error::Config("prune_grace_days must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SyncConfig::new("https://dcim.example.com", "token");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retry_attempts, 4);
        assert_eq!(config.page_limit, 200);
        assert!(!config.prune_enabled);
        assert!(config.use_caching);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SyncConfig::new("https://dcim.example.com", "token")
            .with_timeout(10)
            .with_max_retries(2)
            .with_pruning(14)
            .without_caching();

        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_retry_attempts, 2);
        assert!(config.prune_enabled);
        assert_eq!(config.prune_grace_days, 14);
        assert!(!config.use_caching);
    }

    #[test]
    fn test_orphan_tag_derived_from_primary() {
        let config = SyncConfig::new("https://dcim.example.com", "token");
        assert_eq!(config.orphan_tag(), "racksync-synced: orphaned");

        let config = config.with_primary_tag("custom");
        assert_eq!(config.orphan_tag(), "custom: orphaned");
    }

    #[test]
    fn test_config_validation_failures() {
        assert!(SyncConfig::new("", "token").validate().is_err());
        assert!(SyncConfig::new("https://x", "").validate().is_err());
        assert!(SyncConfig::new("https://x", "t")
            .with_max_retries(0)
            .validate()
            .is_err());
    }
}
