//! Dependency-ordered three-pass synchronizer.
//!
//! Upserting a graph with circular references (a device references its
//! primary address, the address references an interface, the interface
//! references the device) is impossible in one pass with plain create and
//! update calls. The engine therefore runs three passes: explicit clears
//! first, then an upsert pass that defers unresolved references and all
//! primary-address fields, then a final upsert pass with the deferral
//! relaxed, by which point the targets created in pass two carry remote
//! identifiers.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::api::{latest_update, merge_snapshots, ApiClient, CacheStore, Method, Outcome};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{
    FieldValue, Inventory, RecordHandle, RecordSchema, TypeId, TypeRegistry, ValueKind,
};

/// Mode of a synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Push explicit field clears only.
    Unset,
    /// Create/update records; `final_pass` relaxes primary-address deferral.
    Upsert { final_pass: bool },
}

/// Counters describing what a run pushed to the remote side.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Records created (POST).
    pub creates: usize,
    /// Records updated (PATCH).
    pub updates: usize,
    /// Explicit clear patches issued.
    pub unset_patches: usize,
    /// References still unresolved after the final pass.
    pub unresolved: usize,
}

impl SyncReport {
    /// Total write operations issued.
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.unset_patches
    }
}

/// Drives the record graph against the remote API.
pub struct Synchronizer {
    client: ApiClient,
    cache: CacheStore,
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let client = ApiClient::new(&config)?;
        let cache = CacheStore::new(&config);
        Ok(Self {
            client,
            cache,
            config,
        })
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Build an inventory carrying this configuration's lifecycle tags.
    /// Tagging, orphan marking and pruning all read the tag names from the
    /// inventory, so it must be constructed through here.
    pub fn inventory(&self, registry: TypeRegistry) -> Inventory {
        Inventory::new(registry)
            .with_lifecycle_tags(self.config.primary_tag.clone(), self.config.orphan_tag())
    }

    /// Seed the local graph from remote state for the given types, using
    /// the incremental cache where possible.
    pub async fn seed(&self, inventory: &mut Inventory, types: &[TypeId]) -> Result<()> {
        let mut visited = BTreeSet::new();
        for &type_id in types {
            self.seed_type(inventory, type_id, &mut visited).await?;
        }
        Ok(())
    }

    /// Seed every registered type.
    pub async fn seed_all(&self, inventory: &mut Inventory) -> Result<()> {
        let types: Vec<TypeId> = inventory.registry().ids().collect();
        self.seed(inventory, &types).await
    }

    async fn seed_type(
        &self,
        inventory: &mut Inventory,
        type_id: TypeId,
        visited: &mut BTreeSet<TypeId>,
    ) -> Result<()> {
        if !visited.insert(type_id) {
            return Ok(());
        }
        let schema = inventory.registry().get(type_id).clone();

        let cached = self.cache.load(&schema.name);
        let high_water = cached.as_deref().and_then(latest_update);

        let records = match (cached, high_water) {
            (Some(cached), Some(ts)) => {
                debug!("requesting a brief '{}' listing", schema.name);
                let brief = self
                    .fetch_results(
                        &schema,
                        &[
                            ("brief", "1".to_string()),
                            ("limit", self.config.brief_limit.to_string()),
                        ],
                    )
                    .await?;

                debug!("requesting '{}' records updated since {ts}", schema.name);
                let changed = self
                    .fetch_results(&schema, &[("last_updated__gte", ts)])
                    .await?;

                let existing_ids: BTreeSet<i64> = brief
                    .iter()
                    .filter_map(|r| r.get("id").and_then(Value::as_i64))
                    .collect();
                merge_snapshots(cached, &existing_ids, changed)
            }
            // no cache entry, or the cached entries carry no update
            // timestamp at all: full fetch
            _ => {
                debug!("requesting all '{}' records", schema.name);
                self.fetch_results(&schema, &[]).await?
            }
        };

        self.cache.store(&schema.name, &records);

        debug!(
            "processing {} returned '{}' records",
            records.len(),
            schema.name
        );
        for record in &records {
            inventory.add_from_remote(type_id, record);
        }
        Ok(())
    }

    async fn fetch_results(
        &self,
        schema: &RecordSchema,
        params: &[(&str, String)],
    ) -> Result<Vec<Map<String, Value>>> {
        let outcome = self
            .client
            .execute(schema, Method::Get, None, params, None)
            .await?;
        let payload = outcome
            .into_payload()
            .ok_or_else(|| Error::missing_results(&schema.name))?;
        let results = payload
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::missing_results(&schema.name))?;
        Ok(results
            .iter()
            .filter_map(|r| r.as_object().cloned())
            .collect())
    }

    /// Upsert the two bookkeeping tag records into the local graph so the
    /// normal passes create or refresh them remotely.
    pub fn ensure_lifecycle_tags(&self, inventory: &mut Inventory) {
        let Some(tag_type) = inventory.registry().lookup("tag") else {
            return;
        };
        debug!("checking lifecycle tag records");

        let prune_text = if self.config.prune_enabled {
            format!(
                "Pruning is enabled and records will be removed after {} days.",
                self.config.prune_grace_days
            )
        } else {
            format!(
                "Records would be removed after {} days but pruning is currently disabled.",
                self.config.prune_grace_days
            )
        };

        // the inventory's tag names are authoritative; records are tagged
        // with them, so the remote tag records must use the same names
        let orphan_tag = inventory.orphan_tag().to_string();
        let primary_tag = inventory.primary_tag().to_string();
        inventory.add_or_update_local(
            tag_type,
            BTreeMap::from([
                ("name".to_string(), FieldValue::Scalar(orphan_tag.into())),
                ("color".to_string(), FieldValue::Scalar("607d8b".into())),
                (
                    "description".to_string(),
                    FieldValue::Scalar(
                        format!(
                            "A source which has previously provided this record no \
                             longer states it exists. {prune_text}"
                        )
                        .into(),
                    ),
                ),
            ]),
            None,
        );
        inventory.add_or_update_local(
            tag_type,
            BTreeMap::from([
                (
                    "name".to_string(),
                    FieldValue::Scalar(primary_tag.into()),
                ),
                (
                    "description".to_string(),
                    FieldValue::Scalar(
                        "Created and used by racksync to keep track of synchronized \
                         records. Do not change this tag."
                            .into(),
                    ),
                ),
            ]),
            None,
        );
    }

    /// Push all pending changes in three passes and scan for references
    /// that remained unresolved.
    pub async fn apply(&self, inventory: &mut Inventory) -> Result<SyncReport> {
        info!("updating changed records on the remote side");
        let mut report = SyncReport::default();

        let passes = [
            Pass::Unset,
            Pass::Upsert { final_pass: false },
            Pass::Upsert { final_pass: true },
        ];
        for pass in passes {
            debug!(?pass, "starting synchronization pass");
            let mut visited = BTreeSet::new();
            let types: Vec<TypeId> = inventory.registry().ids().collect();
            for type_id in types {
                self.sync_type(inventory, type_id, pass, &mut visited, &mut report)
                    .await?;
            }
        }

        report.unresolved = self.scan_unresolved(inventory);
        Ok(report)
    }

    /// Process one record type, after recursively processing its declared
    /// dependencies. The visited set is threaded through the recursion and
    /// marks a type on entry, which cuts dependency cycles.
    async fn sync_type(
        &self,
        inventory: &mut Inventory,
        type_id: TypeId,
        pass: Pass,
        visited: &mut BTreeSet<TypeId>,
        report: &mut SyncReport,
    ) -> Result<()> {
        if !visited.insert(type_id) {
            return Ok(());
        }

        for dep in inventory.registry().dependencies_of(type_id) {
            if !visited.contains(&dep) {
                debug!(
                    "resolving dependency '{}'",
                    inventory.registry().get(dep).name
                );
                Box::pin(self.sync_type(inventory, dep, pass, visited, report)).await?;
            }
        }

        for handle in inventory.handles(type_id) {
            if inventory.get(handle).deleted {
                continue;
            }
            match pass {
                Pass::Unset => self.unset_record(inventory, handle, report).await?,
                Pass::Upsert { final_pass } => {
                    self.upsert_record(inventory, handle, final_pass, report)
                        .await?
                }
            }
        }
        Ok(())
    }

    /// Push a patch that explicitly clears the record's `unset_items`:
    /// `null` for single-valued fields, an empty sequence for lists.
    async fn unset_record(
        &self,
        inventory: &mut Inventory,
        handle: RecordHandle,
        report: &mut SyncReport,
    ) -> Result<()> {
        let schema = inventory.registry().get(handle.type_id).clone();
        let record = inventory.get(handle);
        if record.unset_items.is_empty() {
            return Ok(());
        }
        let Some(remote_id) = record.remote_id else {
            // never created remotely, nothing to clear there
            inventory.get_mut(handle).unset_items.clear();
            return Ok(());
        };

        let mut patch = Map::new();
        for field in &record.unset_items {
            let cleared = match schema.field_kind(field) {
                ValueKind::ReferenceList { .. } => Value::Array(Vec::new()),
                _ => Value::Null,
            };
            patch.insert(field.clone(), cleared);
        }

        let name = inventory.display_name(handle);
        info!("clearing fields on '{}' record '{name}': {patch:?}", schema.name);

        let outcome = self
            .client
            .execute(&schema, Method::Patch, Some(&patch), &[], Some(remote_id))
            .await?;
        match outcome {
            Outcome::Payload(payload) => {
                if let Some(payload) = payload.as_object() {
                    let record = inventory.get_mut(handle);
                    record.update_from_remote(&schema, payload);
                    record.unset_items.clear();
                    inventory.resolve_record(handle);
                    report.unset_patches += 1;
                }
            }
            _ => {
                error!(
                    "clear request failed for '{}' record '{name}', used data: {patch:?}",
                    schema.name
                );
            }
        }
        Ok(())
    }

    /// Push the record's pending field changes.
    ///
    /// Pending fields split three ways: scalars go straight into the patch,
    /// references with a resolvable target go in as the target's remote
    /// identifier, and unresolved references are deferred to a later pass.
    /// Primary-address fields are always deferred before the final pass.
    async fn upsert_record(
        &self,
        inventory: &mut Inventory,
        handle: RecordHandle,
        final_pass: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let schema = inventory.registry().get(handle.type_id).clone();
        let record = inventory.get(handle);

        let mut patch = Map::new();
        let mut deferred: BTreeMap<String, FieldValue> = BTreeMap::new();

        for field in record.updated_items.clone() {
            if field == "tags" && schema.taggable {
                patch.insert(field, record.tags_wire());
                continue;
            }
            let Some(value) = record.data.get(&field) else {
                continue;
            };
            match value {
                FieldValue::Scalar(scalar) => {
                    patch.insert(field, scalar.clone());
                }
                reference => {
                    let hold_for_final = field.starts_with("primary_ip") && !final_pass;
                    match reference.to_wire(inventory) {
                        Some(wire) if !hold_for_final => {
                            patch.insert(field, wire);
                        }
                        _ => {
                            deferred.insert(field, reference.clone());
                        }
                    }
                }
            }
        }

        let was_new = record.is_new;
        let remote_id = record.remote_id;
        let name = inventory.display_name(handle);

        if !patch.is_empty() {
            let (method, id, action) = if was_new {
                (Method::Post, None, "creating")
            } else {
                (Method::Patch, remote_id, "updating")
            };
            info!("{action} '{}' record '{name}' with data: {patch:?}", schema.name);

            let outcome = self
                .client
                .execute(&schema, method, Some(&patch), &[], id)
                .await?;
            match outcome {
                Outcome::Payload(payload) => {
                    if let Some(payload) = payload.as_object() {
                        inventory
                            .get_mut(handle)
                            .update_from_remote(&schema, payload);
                        if was_new {
                            report.creates += 1;
                        } else {
                            report.updates += 1;
                        }
                    }
                }
                _ => {
                    error!(
                        "request failed for '{}' record '{name}', used data: {patch:?}",
                        schema.name
                    );
                }
            }
        }

        if !deferred.is_empty() {
            debug!(
                "deferring unresolved fields of '{name}' to a later pass: {:?}",
                deferred.keys().collect::<Vec<_>>()
            );
            let record = inventory.get_mut(handle);
            for (field, value) in deferred {
                record.data.insert(field.clone(), value);
                record.updated_items.insert(field);
            }
        }

        inventory.resolve_record(handle);
        Ok(())
    }

    /// Log every pending field that still holds an unresolved reference.
    /// These are terminal for this run; the next scheduled run retries them
    /// since their `updated_items` entries remain set.
    fn scan_unresolved(&self, inventory: &Inventory) -> usize {
        let mut unresolved = 0;
        for type_id in inventory.registry().ids() {
            for handle in inventory.handles(type_id) {
                let record = inventory.get(handle);
                for field in &record.updated_items {
                    let Some(value) = record.data.get(field) else {
                        continue;
                    };
                    if value.is_reference() && !value.is_resolved(inventory) {
                        error!(
                            "updated field '{field}' of record '{}' could not be fully \
                             resolved: {}",
                            inventory.display_name(handle),
                            value.describe(inventory)
                        );
                        unresolved += 1;
                    }
                }
            }
        }
        unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordSchema, Reference, TypeRegistry};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(
            RecordSchema::new("site", "dcim/sites")
                .field("name", ValueKind::Scalar)
                .field("tenant", ValueKind::reference("site"))
                .field("asns", ValueKind::reference_list("site")),
        );
        registry.register(
            RecordSchema::new("device", "dcim/devices")
                .depends_on("site")
                .depends_on("ip-address")
                .field("name", ValueKind::Scalar)
                .field("site", ValueKind::reference("site"))
                .field("primary_ip4", ValueKind::reference("ip-address")),
        );
        registry.register(
            RecordSchema::new("interface", "dcim/interfaces")
                .secondary_key("device")
                .depends_on("device")
                .field("name", ValueKind::Scalar)
                .field("device", ValueKind::reference("device")),
        );
        registry.register(
            RecordSchema::new("ip-address", "ipam/ip-addresses")
                .primary_key("address")
                .depends_on("interface")
                .field("address", ValueKind::Scalar)
                .field("interface", ValueKind::reference("interface")),
        );
        registry
    }

    fn sync_with(server_uri: &str, cache_dir: &TempDir) -> Synchronizer {
        let config = SyncConfig::new(server_uri, "test-token")
            .with_max_retries(1)
            .with_cache_dir(cache_dir.path());
        Synchronizer::new(config).unwrap()
    }

    fn scalar(value: Value) -> FieldValue {
        FieldValue::Scalar(value)
    }

    #[tokio::test]
    async fn test_create_assigns_remote_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/dcim/sites/"))
            .and(body_partial_json(json!({"name": "fra1"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 11, "name": "fra1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();
        let handle = inv.add_or_update_local(
            site,
            BTreeMap::from([("name".to_string(), scalar(json!("fra1")))]),
            Some("importer"),
        );
        assert!(inv.get(handle).is_new);

        let report = sync.apply(&mut inv).await.unwrap();

        assert_eq!(report.creates, 1);
        assert_eq!(report.unresolved, 0);
        let record = inv.get(handle);
        assert!(!record.is_new);
        assert_eq!(record.remote_id, Some(11));
        assert!(record.updated_items.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_issues_no_writes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/dcim/sites/"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 11, "name": "fra1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();
        inv.add_or_update_local(
            site,
            BTreeMap::from([("name".to_string(), scalar(json!("fra1")))]),
            Some("importer"),
        );

        let first = sync.apply(&mut inv).await.unwrap();
        assert_eq!(first.writes(), 1);

        let second = sync.apply(&mut inv).await.unwrap();
        assert_eq!(second.writes(), 0);
    }

    #[tokio::test]
    async fn test_dependency_written_before_dependent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/dcim/sites/"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 3, "name": "fra1"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        // the device write must carry the site's assigned identifier
        Mock::given(method("POST"))
            .and(path("/api/dcim/devices/"))
            .and(body_partial_json(json!({"site": 3})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": 8, "name": "edge-01", "site": {"id": 3}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();
        let device = inv.registry().lookup("device").unwrap();

        let site_handle = inv.add_or_update_local(
            site,
            BTreeMap::from([("name".to_string(), scalar(json!("fra1")))]),
            Some("importer"),
        );
        let device_handle = inv.add_or_update_local(
            device,
            BTreeMap::from([
                ("name".to_string(), scalar(json!("edge-01"))),
                (
                    "site".to_string(),
                    FieldValue::Ref(Reference::Local(site_handle)),
                ),
            ]),
            Some("importer"),
        );

        let report = sync.apply(&mut inv).await.unwrap();
        assert_eq!(report.creates, 2);
        assert_eq!(inv.get(device_handle).remote_id, Some(8));
    }

    #[tokio::test]
    async fn test_three_pass_resolves_primary_address_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/dcim/sites/"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 1, "name": "fra1"})),
            )
            .mount(&server)
            .await;
        // pass 2: the device is created without its primary address
        Mock::given(method("POST"))
            .and(path("/api/dcim/devices/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 2, "name": "edge-01", "site": {"id": 1}, "primary_ip4": null,
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/dcim/interfaces/"))
            .and(body_partial_json(json!({"device": 2})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 3, "name": "eth0", "device": {"id": 2},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/ipam/ip-addresses/"))
            .and(body_partial_json(json!({"interface": 3})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 4, "address": "10.0.0.1/24", "interface": {"id": 3},
            })))
            .expect(1)
            .mount(&server)
            .await;
        // pass 3: the primary address is patched onto the device
        Mock::given(method("PATCH"))
            .and(path("/api/dcim/devices/2/"))
            .and(body_partial_json(json!({"primary_ip4": 4})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 2, "name": "edge-01", "primary_ip4": {"id": 4},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();
        let device = inv.registry().lookup("device").unwrap();
        let iface = inv.registry().lookup("interface").unwrap();
        let ip = inv.registry().lookup("ip-address").unwrap();

        let site_handle = inv.add_or_update_local(
            site,
            BTreeMap::from([("name".to_string(), scalar(json!("fra1")))]),
            Some("importer"),
        );
        let device_handle = inv.add_or_update_local(
            device,
            BTreeMap::from([
                ("name".to_string(), scalar(json!("edge-01"))),
                (
                    "site".to_string(),
                    FieldValue::Ref(Reference::Local(site_handle)),
                ),
            ]),
            Some("importer"),
        );
        let iface_handle = inv.add_or_update_local(
            iface,
            BTreeMap::from([
                ("name".to_string(), scalar(json!("eth0"))),
                (
                    "device".to_string(),
                    FieldValue::Ref(Reference::Local(device_handle)),
                ),
            ]),
            Some("importer"),
        );
        let ip_handle = inv.add_or_update_local(
            ip,
            BTreeMap::from([
                ("address".to_string(), scalar(json!("10.0.0.1/24"))),
                (
                    "interface".to_string(),
                    FieldValue::Ref(Reference::Local(iface_handle)),
                ),
            ]),
            Some("importer"),
        );
        inv.add_or_update_local(
            device,
            BTreeMap::from([(
                "primary_ip4".to_string(),
                FieldValue::Ref(Reference::Local(ip_handle)),
            )]),
            Some("importer"),
        );

        let report = sync.apply(&mut inv).await.unwrap();

        assert_eq!(report.creates, 4);
        assert_eq!(report.updates, 1);
        assert_eq!(report.unresolved, 0);
        assert_eq!(inv.get(device_handle).remote_id, Some(2));
        assert_eq!(inv.get(iface_handle).remote_id, Some(3));
        assert_eq!(inv.get(ip_handle).remote_id, Some(4));
    }

    #[tokio::test]
    async fn test_unset_patch_clears_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/dcim/sites/5/"))
            .and(body_partial_json(json!({"tenant": null, "asns": []})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 5, "name": "fra1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();
        let handle = inv.add_from_remote(
            site,
            json!({"id": 5, "name": "fra1"}).as_object().unwrap(),
        );
        {
            let record = inv.get_mut(handle);
            record.schedule_unset("tenant");
            record.schedule_unset("asns");
        }

        let report = sync.apply(&mut inv).await.unwrap();
        assert_eq!(report.unset_patches, 1);
        assert!(inv.get(handle).unset_items.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_reference_survives_and_is_counted() {
        let server = MockServer::start().await;
        // the site can never be created
        Mock::given(method("POST"))
            .and(path("/api/dcim/sites/"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/dcim/devices/"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": 2, "name": "edge-01"})),
            )
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();
        let device = inv.registry().lookup("device").unwrap();

        let site_handle = inv.add_or_update_local(
            site,
            BTreeMap::from([("name".to_string(), scalar(json!("fra1")))]),
            Some("importer"),
        );
        let device_handle = inv.add_or_update_local(
            device,
            BTreeMap::from([
                ("name".to_string(), scalar(json!("edge-01"))),
                (
                    "site".to_string(),
                    FieldValue::Ref(Reference::Local(site_handle)),
                ),
            ]),
            Some("importer"),
        );

        let report = sync.apply(&mut inv).await.unwrap();
        assert_eq!(report.unresolved, 1);
        // the dependent record keeps its pending field for the next run
        assert!(inv.get(device_handle).updated_items.contains("site"));
    }

    #[tokio::test]
    async fn test_seed_cold_full_fetch_populates_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dcim/sites/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 1, "name": "fra1", "last_updated": "2026-08-01T00:00:00Z"},
                    {"id": 2, "name": "ams1", "last_updated": "2026-08-02T00:00:00Z"},
                ],
                "next": null,
            })))
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();

        sync.seed(&mut inv, &[site]).await.unwrap();

        assert_eq!(inv.count(site), 2);
        assert!(cache_dir.path().join("site.cache").exists());
        // seeded records are remote reads, not pending changes
        for handle in inv.handles(site) {
            assert!(inv.get(handle).updated_items.is_empty());
            assert!(!inv.get(handle).is_new);
        }
    }

    #[tokio::test]
    async fn test_seed_incremental_merges_brief_and_delta() {
        let cache_dir = TempDir::new().unwrap();
        let cached: Vec<Value> = (1..=10)
            .map(|id| json!({"id": id, "name": format!("site-{id}"),
                             "last_updated": "2026-08-01T00:00:00Z"}))
            .collect();
        std::fs::write(
            cache_dir.path().join("site.cache"),
            serde_json::to_string(&cached).unwrap(),
        )
        .unwrap();

        let server = MockServer::start().await;
        // id 10 disappeared remotely
        let brief: Vec<Value> = (1..=9).map(|id| json!({"id": id})).collect();
        Mock::given(method("GET"))
            .and(path("/api/dcim/sites/"))
            .and(query_param("brief", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"results": brief, "next": null})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/dcim/sites/"))
            .and(query_param("last_updated__gte", "2026-08-01T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 2, "name": "site-2-renamed", "last_updated": "2026-08-10T00:00:00Z"},
                    {"id": 5, "name": "site-5-renamed", "last_updated": "2026-08-11T00:00:00Z"},
                ],
                "next": null,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sync = sync_with(&server.uri(), &cache_dir);
        let mut inv = Inventory::new(test_registry());
        let site = inv.registry().lookup("site").unwrap();

        sync.seed(&mut inv, &[site]).await.unwrap();

        assert_eq!(inv.count(site), 9);
        assert!(inv.find_by_remote_id(site, 10).is_none());
        let renamed = inv.find_by_remote_id(site, 2).unwrap();
        assert_eq!(inv.display_name(renamed), "site-2-renamed");

        // merged set written back
        let written: Vec<Map<String, Value>> = serde_json::from_str(
            &std::fs::read_to_string(cache_dir.path().join("site.cache")).unwrap(),
        )
        .unwrap();
        assert_eq!(written.len(), 9);
    }

    #[tokio::test]
    async fn test_lifecycle_tags_are_upserted_locally() {
        let mut registry = TypeRegistry::new();
        registry.register(
            RecordSchema::new("tag", "extras/tags")
                .field("name", ValueKind::Scalar)
                .field("color", ValueKind::Scalar)
                .field("description", ValueKind::Scalar),
        );

        let cache_dir = TempDir::new().unwrap();
        let config = SyncConfig::new("https://dcim.example.com", "token")
            .with_cache_dir(cache_dir.path())
            .with_pruning(30);
        let sync = Synchronizer::new(config).unwrap();
        let mut inv = sync.inventory(registry);
        let tag = inv.registry().lookup("tag").unwrap();

        sync.ensure_lifecycle_tags(&mut inv);

        assert_eq!(inv.count(tag), 2);
        assert!(inv
            .find_by_key(tag, &json!("racksync-synced"))
            .is_some());
        assert!(inv
            .find_by_key(tag, &json!("racksync-synced: orphaned"))
            .is_some());
        // twice is idempotent
        sync.ensure_lifecycle_tags(&mut inv);
        assert_eq!(inv.count(tag), 2);
    }

    #[tokio::test]
    async fn test_custom_primary_tag_is_used_throughout() {
        let mut registry = TypeRegistry::new();
        registry.register(
            RecordSchema::new("tag", "extras/tags")
                .field("name", ValueKind::Scalar)
                .field("color", ValueKind::Scalar)
                .field("description", ValueKind::Scalar),
        );
        registry.register(
            RecordSchema::new("device", "dcim/devices")
                .taggable()
                .field("name", ValueKind::Scalar),
        );

        let cache_dir = TempDir::new().unwrap();
        let config = SyncConfig::new("https://dcim.example.com", "token")
            .with_cache_dir(cache_dir.path())
            .with_primary_tag("custom");
        let sync = Synchronizer::new(config).unwrap();
        let mut inv = sync.inventory(registry);
        let tag = inv.registry().lookup("tag").unwrap();
        let device = inv.registry().lookup("device").unwrap();

        sync.ensure_lifecycle_tags(&mut inv);
        assert!(inv.find_by_key(tag, &json!("custom")).is_some());
        assert!(inv.find_by_key(tag, &json!("custom: orphaned")).is_some());
        assert!(inv.find_by_key(tag, &json!("racksync-synced")).is_none());

        // connector-observed records carry the configured tag, so orphan
        // marking and pruning match the tag records created above
        let handle = inv.add_or_update_local(
            device,
            BTreeMap::from([("name".to_string(), scalar(json!("edge-01")))]),
            Some("vcenter"),
        );
        assert!(inv.get(handle).has_tag("custom"));
        assert!(!inv.get(handle).has_tag("racksync-synced"));

        inv.get_mut(handle).source = None;
        inv.mark_orphans();
        assert!(inv.get(handle).has_tag("custom: orphaned"));
    }
}
