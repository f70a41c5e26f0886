//! Removal of orphaned records after a grace period.
//!
//! A record owned by this process that no active source re-reported gets the
//! orphan tag during the run. Once its remote update timestamp is older than
//! the configured grace period, the pruner deletes it. Child interfaces
//! carry no timestamp of their own and are deleted together with their
//! parent, before it.

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, error, info};

use crate::api::{Method, Outcome};
use crate::error::Result;
use crate::model::{Inventory, RecordHandle, TypeId};

use super::engine::Synchronizer;

/// Deletes orphaned records that outlived the grace period.
pub struct Pruner<'a> {
    sync: &'a Synchronizer,
    now: NaiveDateTime,
}

impl<'a> Pruner<'a> {
    pub fn new(sync: &'a Synchronizer) -> Self {
        Self {
            sync,
            now: Utc::now().naive_utc(),
        }
    }

    /// Override the reference instant used for age calculations.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    /// Delete eligible orphans, most dependent types first. Returns the
    /// number of records removed, children included.
    pub async fn prune(&self, inventory: &mut Inventory) -> Result<usize> {
        if !self.sync.config().prune_enabled {
            info!("pruning is disabled, skipping");
            return Ok(0);
        }
        let grace = self.sync.config().prune_grace_days;
        info!("pruning orphaned records untouched for {grace} days or more");

        let mut deleted = 0;
        let type_ids: Vec<TypeId> = inventory.registry().ids().rev().collect();
        for type_id in type_ids {
            if !inventory.registry().get(type_id).prune {
                continue;
            }
            for handle in inventory.handles(type_id) {
                if !self.eligible(inventory, handle) {
                    continue;
                }
                // children first, they carry no timestamp of their own
                for child in inventory.interfaces_of(handle) {
                    if inventory.get(child).deleted {
                        continue;
                    }
                    deleted += usize::from(self.delete_record(inventory, child).await?);
                }
                deleted += usize::from(self.delete_record(inventory, handle).await?);
            }
        }

        info!(deleted, "orphan pruning finished");
        Ok(deleted)
    }

    /// The skip chain protecting records from deletion: anything touched by
    /// an active source, not marked as orphaned, owned by a disabled source
    /// or still within the grace period survives.
    fn eligible(&self, inventory: &Inventory, handle: RecordHandle) -> bool {
        let record = inventory.get(handle);
        if record.deleted || record.remote_id.is_none() {
            return false;
        }
        if record.source.is_some() {
            return false;
        }
        if !record.has_tag(inventory.orphan_tag()) {
            return false;
        }
        if record
            .tags
            .keys()
            .any(|tag| inventory.disabled_source_tags().contains(tag))
        {
            debug!(
                "record '{}' belongs to a disabled source, not pruning",
                inventory.display_name(handle)
            );
            return false;
        }
        let Some(updated) = record.last_updated_time() else {
            return false;
        };

        // whole elapsed days between two instants; a partial 30th day does
        // not end the grace period yet
        let age_days = (self.now - updated).num_days();
        if age_days < self.sync.config().prune_grace_days {
            debug!(
                "record '{}' is orphaned for {age_days} days, grace period not over yet",
                inventory.display_name(handle)
            );
            return false;
        }
        true
    }

    async fn delete_record(
        &self,
        inventory: &mut Inventory,
        handle: RecordHandle,
    ) -> Result<bool> {
        let schema = inventory.registry().get(handle.type_id).clone();
        let Some(id) = inventory.get(handle).remote_id else {
            return Ok(false);
        };
        let name = inventory.display_name(handle);
        info!("deleting orphaned '{}' record '{name}'", schema.name);

        match self
            .sync
            .client()
            .execute(&schema, Method::Delete, None, &[], Some(id))
            .await?
        {
            Outcome::Deleted => {
                inventory.get_mut(handle).deleted = true;
                Ok(true)
            }
            _ => {
                error!("failed to delete '{}' record '{name}'", schema.name);
                Ok(false)
            }
        }
    }
}
