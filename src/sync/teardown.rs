//! Bulk removal of everything this process ever created.
//!
//! The remote side rejects deletions whose target is still referenced, so a
//! single reverse-order sweep is not enough for arbitrary reference shapes.
//! The teardown repeats the sweep until a round deletes nothing, then
//! removes the two lifecycle tag records themselves.

use tracing::{debug, error, info, warn};

use crate::api::{Method, Outcome};
use crate::error::Result;
use crate::model::{Inventory, TypeId};

use super::engine::Synchronizer;

/// Rounds after which a non-converging teardown gives up.
const MAX_ROUNDS: usize = 10;

/// Deletes every record carrying the primary lifecycle tag.
pub struct Teardown<'a> {
    sync: &'a Synchronizer,
}

impl<'a> Teardown<'a> {
    pub fn new(sync: &'a Synchronizer) -> Self {
        Self { sync }
    }

    /// Read the full remote state, then delete all owned records in rounds.
    /// Returns the number of records removed, the lifecycle tags included.
    pub async fn run(&self, inventory: &mut Inventory) -> Result<usize> {
        warn!("removing all synchronized records from the remote side");
        self.sync.seed_all(inventory).await?;
        inventory.resolve_relations();

        let tag_type = inventory.registry().lookup("tag");
        let mut total = 0;
        for round in 1..=MAX_ROUNDS {
            debug!(round, "starting teardown round");
            let deleted = self.sweep(inventory, tag_type).await?;
            total += deleted;

            if deleted == 0 {
                total += self.delete_lifecycle_tags(inventory).await?;
                info!(total, "teardown finished");
                return Ok(total);
            }
            info!("deleted {deleted} records in round {round}");
        }

        warn!("teardown did not converge after {MAX_ROUNDS} rounds, some records remain");
        Ok(total)
    }

    /// One reverse-order deletion sweep. Rejected deletions are left for the
    /// next round, once whatever referenced them is gone.
    async fn sweep(&self, inventory: &mut Inventory, tag_type: Option<TypeId>) -> Result<usize> {
        let primary = inventory.primary_tag().to_string();
        let mut deleted = 0;

        let type_ids: Vec<TypeId> = inventory.registry().ids().rev().collect();
        for type_id in type_ids {
            // the tag records must outlive everything that carries them
            if Some(type_id) == tag_type {
                continue;
            }
            let schema = inventory.registry().get(type_id).clone();
            if !schema.prune {
                continue;
            }
            for handle in inventory.handles(type_id) {
                let record = inventory.get(handle);
                if record.deleted || record.remote_id.is_none() || !record.has_tag(&primary) {
                    continue;
                }
                let id = record.remote_id.unwrap_or_default();
                let name = inventory.display_name(handle);

                match self
                    .sync
                    .client()
                    .execute(&schema, Method::Delete, None, &[], Some(id))
                    .await?
                {
                    Outcome::Deleted => {
                        inventory.get_mut(handle).deleted = true;
                        deleted += 1;
                    }
                    _ => {
                        debug!(
                            "'{}' record '{name}' not deletable yet, retrying next round",
                            schema.name
                        );
                    }
                }
            }
        }
        Ok(deleted)
    }

    async fn delete_lifecycle_tags(&self, inventory: &mut Inventory) -> Result<usize> {
        let Some(tag_type) = inventory.registry().lookup("tag") else {
            return Ok(0);
        };
        let schema = inventory.registry().get(tag_type).clone();
        let names = [
            inventory.orphan_tag().to_string(),
            inventory.primary_tag().to_string(),
        ];

        let mut deleted = 0;
        for name in names {
            let Some(handle) = inventory.find_by_key(tag_type, &name.clone().into()) else {
                continue;
            };
            let Some(id) = inventory.get(handle).remote_id else {
                continue;
            };
            info!("deleting lifecycle tag '{name}'");
            match self
                .sync
                .client()
                .execute(&schema, Method::Delete, None, &[], Some(id))
                .await?
            {
                Outcome::Deleted => {
                    inventory.get_mut(handle).deleted = true;
                    deleted += 1;
                }
                _ => error!("failed to delete lifecycle tag '{name}'"),
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::model::{RecordSchema, TypeRegistry, ValueKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(
            RecordSchema::new("tag", "extras/tags")
                .field("name", ValueKind::Scalar)
                .field("description", ValueKind::Scalar),
        );
        registry.register(
            RecordSchema::new("device", "dcim/devices")
                .taggable()
                .prunable()
                .field("name", ValueKind::Scalar),
        );
        registry
    }

    fn sync_with(server_uri: &str) -> Synchronizer {
        let config = SyncConfig::new(server_uri, "test-token")
            .with_max_retries(1)
            .without_caching();
        Synchronizer::new(config).unwrap()
    }

    async fn mount_listings(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/extras/tags/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 8, "name": "racksync-synced"},
                    {"id": 9, "name": "racksync-synced: orphaned"},
                ],
                "next": null,
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/dcim/devices/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 1, "name": "owned", "tags": [{"name": "racksync-synced"}]},
                    {"id": 2, "name": "foreign"},
                ],
                "next": null,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_teardown_deletes_owned_records_then_tags() {
        let server = MockServer::start().await;
        mount_listings(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/api/dcim/devices/1/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        // the foreign record is never touched
        Mock::given(method("DELETE"))
            .and(path("/api/dcim/devices/2/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/extras/tags/8/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/extras/tags/9/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sync = sync_with(&server.uri());
        let mut inv = Inventory::new(registry());

        let total = Teardown::new(&sync).run(&mut inv).await.unwrap();
        assert_eq!(total, 3);

        let device = inv.registry().lookup("device").unwrap();
        assert!(inv.get(inv.find_by_remote_id(device, 1).unwrap()).deleted);
        assert!(!inv.get(inv.find_by_remote_id(device, 2).unwrap()).deleted);
    }

    #[tokio::test]
    async fn test_rejected_deletions_are_retried_next_round() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/extras/tags/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 8, "name": "racksync-synced"}],
                "next": null,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/dcim/devices/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 1, "name": "blocked", "tags": [{"name": "racksync-synced"}]},
                    {"id": 2, "name": "free", "tags": [{"name": "racksync-synced"}]},
                ],
                "next": null,
            })))
            .mount(&server)
            .await;
        // still referenced during the first round
        Mock::given(method("DELETE"))
            .and(path("/api/dcim/devices/1/"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"detail": "still referenced"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/dcim/devices/1/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/dcim/devices/2/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/extras/tags/8/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sync = sync_with(&server.uri());
        let mut inv = Inventory::new(registry());

        let total = Teardown::new(&sync).run(&mut inv).await.unwrap();
        // two devices across two rounds plus the tag record
        assert_eq!(total, 3);
    }
}
