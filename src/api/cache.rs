//! Per record-type on-disk snapshots of last-known remote state.
//!
//! Each type gets one file holding the raw record sequence from the last
//! successful run. The highest `last_updated` timestamp across the cached
//! entries is the high-water mark for delta fetches. Any read or parse
//! failure is treated as a cache miss, never as a fatal error.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::SyncConfig;

/// On-disk cache of raw remote records, one file per record type.
pub struct CacheStore {
    dir: PathBuf,
    enabled: bool,
}

impl CacheStore {
    /// Set up the cache directory. Any condition that makes the directory
    /// unusable disables caching with a warning instead of failing the run.
    pub fn new(config: &SyncConfig) -> Self {
        let dir = config.cache_dir.clone();
        if !config.use_caching {
            return Self {
                dir,
                enabled: false,
            };
        }

        if dir.is_file() {
            warn!("cache directory {} is a file, caching disabled", dir.display());
            return Self {
                dir,
                enabled: false,
            };
        }

        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(
                "unable to create cache directory {}: {e}, caching disabled",
                dir.display()
            );
            return Self {
                dir,
                enabled: false,
            };
        }

        debug!("using cache directory {}", dir.display());
        Self { dir, enabled: true }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn path_for(&self, type_name: &str) -> PathBuf {
        self.dir.join(format!("{type_name}.cache"))
    }

    /// Load the cached snapshot for a record type. Absence or corruption of
    /// the file silently triggers a full fetch instead of an incremental one.
    pub fn load(&self, type_name: &str) -> Option<Vec<Map<String, Value>>> {
        if !self.enabled {
            return None;
        }
        let path = self.path_for(type_name);
        let body = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Vec<Map<String, Value>>>(&body) {
            Ok(records) => {
                debug!(
                    "read {} cached '{type_name}' records from {}",
                    records.len(),
                    path.display()
                );
                Some(records)
            }
            Err(e) => {
                warn!("discarding unreadable cache file {}: {e}", path.display());
                None
            }
        }
    }

    /// Overwrite the snapshot for a record type. Write failures are logged,
    /// never fatal.
    pub fn store(&self, type_name: &str, records: &[Map<String, Value>]) {
        if !self.enabled {
            return;
        }
        let path = self.path_for(type_name);
        match serde_json::to_string(records) {
            Ok(body) => {
                if let Err(e) = fs::write(&path, body) {
                    warn!("failed to write cache file {}: {e}", path.display());
                } else {
                    debug!("cached {} '{type_name}' records", records.len());
                }
            }
            Err(e) => warn!("failed to serialize cache for '{type_name}': {e}"),
        }
    }

    /// Directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Maximum `last_updated` timestamp across a record sequence.
///
/// ISO-8601 timestamps order lexicographically, so the maximum string is the
/// latest update. `None` when no entry carries a timestamp, which forces a
/// full fetch for types that structurally lack one.
pub fn latest_update(records: &[Map<String, Value>]) -> Option<String> {
    records
        .iter()
        .filter_map(|r| r.get("last_updated").and_then(Value::as_str))
        .max()
        .map(str::to_string)
}

/// Merge a cached snapshot with the results of a brief and a delta fetch.
///
/// Keeps cached records whose identifier still exists remotely and was not
/// among the changed ones, then appends the freshly fetched changed records.
/// Records whose identifier disappeared from the brief list were deleted
/// remotely and are dropped.
pub fn merge_snapshots(
    cached: Vec<Map<String, Value>>,
    existing_ids: &BTreeSet<i64>,
    changed: Vec<Map<String, Value>>,
) -> Vec<Map<String, Value>> {
    let changed_ids: BTreeSet<i64> = changed
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect();

    let mut merged: Vec<Map<String, Value>> = cached
        .into_iter()
        .filter(|record| {
            record
                .get("id")
                .and_then(Value::as_i64)
                .is_some_and(|id| existing_ids.contains(&id) && !changed_ids.contains(&id))
        })
        .collect();
    merged.extend(changed);
    merged
}
