//! In-memory graph of record instances.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::DEFAULT_PRIMARY_TAG;

use super::record::RecordInstance;
use super::schema::{TypeId, TypeRegistry, ValueKind};
use super::value::{FieldValue, RecordHandle, Reference};

/// The local record graph, seeded from remote reads and mutated by
/// discovery connectors.
///
/// Instances are addressed by [`RecordHandle`] and never removed during a
/// run, only flagged as deleted, so handles stay valid.
pub struct Inventory {
    registry: TypeRegistry,
    records: Vec<Vec<RecordInstance>>,
    primary_tag: String,
    orphan_tag: String,
    disabled_source_tags: BTreeSet<String>,
}

impl Inventory {
    pub fn new(registry: TypeRegistry) -> Self {
        let records = (0..registry.len()).map(|_| Vec::new()).collect();
        Self {
            registry,
            records,
            primary_tag: DEFAULT_PRIMARY_TAG.to_string(),
            orphan_tag: format!("{DEFAULT_PRIMARY_TAG}: orphaned"),
            disabled_source_tags: BTreeSet::new(),
        }
    }

    pub fn with_lifecycle_tags(
        mut self,
        primary: impl Into<String>,
        orphan: impl Into<String>,
    ) -> Self {
        self.primary_tag = primary.into();
        self.orphan_tag = orphan.into();
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn primary_tag(&self) -> &str {
        &self.primary_tag
    }

    pub fn orphan_tag(&self) -> &str {
        &self.orphan_tag
    }

    /// Tags belonging to sources that are configured but disabled this run.
    /// Orphaned records carrying one of these are protected from pruning.
    pub fn disabled_source_tags(&self) -> &BTreeSet<String> {
        &self.disabled_source_tags
    }

    pub fn add_disabled_source_tag(&mut self, tag: impl Into<String>) {
        self.disabled_source_tags.insert(tag.into());
    }

    pub fn get(&self, handle: RecordHandle) -> &RecordInstance {
        &self.records[handle.type_id.0][handle.slot]
    }

    pub fn get_mut(&mut self, handle: RecordHandle) -> &mut RecordInstance {
        &mut self.records[handle.type_id.0][handle.slot]
    }

    /// Handles of every instance of a type, in insertion order.
    pub fn handles(&self, type_id: TypeId) -> Vec<RecordHandle> {
        (0..self.records[type_id.0].len())
            .map(|slot| RecordHandle { type_id, slot })
            .collect()
    }

    pub fn count(&self, type_id: TypeId) -> usize {
        self.records[type_id.0].len()
    }

    /// Merge a raw remote record into the graph.
    ///
    /// Matches an existing instance by remote identifier first, then by
    /// primary (and secondary) key; creates a fresh instance otherwise.
    pub fn add_from_remote(&mut self, type_id: TypeId, payload: &Map<String, Value>) -> RecordHandle {
        let handle = self
            .match_remote(type_id, payload)
            .unwrap_or_else(|| self.push_new(type_id));

        let schema = self.registry.get(type_id).clone();
        self.records[handle.type_id.0][handle.slot].update_from_remote(&schema, payload);
        handle
    }

    /// Merge connector-observed data into the graph.
    ///
    /// This is the discovery connectors' mutation entry point: changed
    /// fields are marked pending, the supplying source is recorded and the
    /// primary ownership tag applied.
    pub fn add_or_update_local(
        &mut self,
        type_id: TypeId,
        data: BTreeMap<String, FieldValue>,
        source: Option<&str>,
    ) -> RecordHandle {
        let handle = self
            .match_local(type_id, &data)
            .unwrap_or_else(|| self.push_new(type_id));

        let taggable = self.registry.get(type_id).taggable;
        let primary_tag = self.primary_tag.clone();
        let record = &mut self.records[handle.type_id.0][handle.slot];
        record.apply_local(data);
        if let Some(source) = source {
            record.source = Some(source.to_string());
            if taggable {
                record.add_tag(primary_tag, Some(source));
            }
        }
        handle
    }

    pub fn find_by_remote_id(&self, type_id: TypeId, id: i64) -> Option<RecordHandle> {
        self.records[type_id.0]
            .iter()
            .position(|r| r.remote_id == Some(id))
            .map(|slot| RecordHandle { type_id, slot })
    }

    /// Find an instance whose primary key scalar equals the given value.
    pub fn find_by_key(&self, type_id: TypeId, key: &Value) -> Option<RecordHandle> {
        let schema = self.registry.get(type_id);
        let wanted = FieldValue::Scalar(key.clone());
        self.records[type_id.0]
            .iter()
            .position(|r| r.primary_key_value(schema) == Some(&wanted))
            .map(|slot| RecordHandle { type_id, slot })
    }

    /// Attempt to convert every raw remote reference into a link to a local
    /// instance of the target type.
    pub fn resolve_relations(&mut self) {
        for type_id in self.registry.ids() {
            for handle in self.handles(type_id) {
                self.resolve_record(handle);
            }
        }
    }

    /// Resolve pending references of a single record.
    pub fn resolve_record(&mut self, handle: RecordHandle) {
        let schema = self.registry.get(handle.type_id);
        let mut upgrades: Vec<(String, FieldValue)> = Vec::new();

        for (name, value) in &self.get(handle).data {
            let Some(target) = schema.field_kind(name).target().and_then(|t| self.registry.lookup(t))
            else {
                continue;
            };
            match value {
                FieldValue::Ref(Reference::Remote(id)) => {
                    if let Some(target_handle) = self.find_by_remote_id(target, *id) {
                        upgrades.push((
                            name.clone(),
                            FieldValue::Ref(Reference::Local(target_handle)),
                        ));
                    }
                }
                FieldValue::RefList(refs) => {
                    let resolved: Vec<Reference> = refs
                        .iter()
                        .map(|r| match r {
                            Reference::Remote(id) => self
                                .find_by_remote_id(target, *id)
                                .map(Reference::Local)
                                .unwrap_or(*r),
                            Reference::Local(_) => *r,
                        })
                        .collect();
                    if &resolved != refs {
                        upgrades.push((name.clone(), FieldValue::RefList(resolved)));
                    }
                }
                _ => {}
            }
        }

        let record = self.get_mut(handle);
        for (name, value) in upgrades {
            // a resolved reference is the same value, not a pending change
            record.data.insert(name, value);
        }
    }

    /// Tag records owned by this process that no active source re-reported
    /// this run; drop the orphan tag from records that were re-reported.
    pub fn mark_orphans(&mut self) {
        let primary = self.primary_tag.clone();
        let orphan = self.orphan_tag.clone();
        let mut orphaned = 0usize;

        for type_id in self.registry.ids() {
            if !self.registry.get(type_id).taggable {
                continue;
            }
            for record in &mut self.records[type_id.0] {
                if !record.has_tag(&primary) {
                    continue;
                }
                if record.source.is_none() {
                    if !record.has_tag(&orphan) {
                        record.add_tag(orphan.clone(), None);
                        orphaned += 1;
                    }
                } else {
                    record.remove_tag(&orphan);
                }
            }
        }

        if orphaned > 0 {
            debug!(orphaned, "marked records as orphaned");
        }
    }

    /// Child interface records owned by the given parent.
    pub fn interfaces_of(&self, parent: RecordHandle) -> Vec<RecordHandle> {
        let Some(link) = &self.registry.get(parent.type_id).child_link else {
            return Vec::new();
        };
        let Some(child_type) = self.registry.lookup(&link.type_name) else {
            return Vec::new();
        };
        let parent_remote = self.get(parent).remote_id;

        self.handles(child_type)
            .into_iter()
            .filter(|&h| match self.get(h).data.get(&link.parent_field) {
                Some(FieldValue::Ref(Reference::Local(target))) => *target == parent,
                Some(FieldValue::Ref(Reference::Remote(id))) => Some(*id) == parent_remote,
                _ => false,
            })
            .collect()
    }

    /// Human-readable name for logging.
    pub fn display_name(&self, handle: RecordHandle) -> String {
        let record = self.get(handle);
        let schema = self.registry.get(handle.type_id);
        match record.primary_key_value(schema) {
            Some(FieldValue::Scalar(Value::String(s))) => s.clone(),
            Some(value) => value.describe(self),
            None => match record.remote_id {
                Some(id) => format!("{} #{id}", schema.name),
                None => format!("unnamed {}", schema.name),
            },
        }
    }

    fn push_new(&mut self, type_id: TypeId) -> RecordHandle {
        let slot = self.records[type_id.0].len();
        self.records[type_id.0].push(RecordInstance::new(type_id));
        RecordHandle { type_id, slot }
    }

    fn match_remote(&self, type_id: TypeId, payload: &Map<String, Value>) -> Option<RecordHandle> {
        if let Some(id) = payload.get("id").and_then(Value::as_i64) {
            if let Some(handle) = self.find_by_remote_id(type_id, id) {
                return Some(handle);
            }
        }

        let schema = self.registry.get(type_id);
        let primary = FieldValue::from_wire(
            &schema.field_kind(&schema.primary_key),
            payload.get(&schema.primary_key)?,
        )?;
        let secondary = schema.secondary_key.as_ref().and_then(|key| {
            payload
                .get(key)
                .and_then(|raw| FieldValue::from_wire(&schema.field_kind(key), raw))
        });

        self.match_by_key(type_id, &primary, secondary.as_ref())
    }

    fn match_local(
        &self,
        type_id: TypeId,
        data: &BTreeMap<String, FieldValue>,
    ) -> Option<RecordHandle> {
        let schema = self.registry.get(type_id);
        let primary = data.get(&schema.primary_key)?;
        let secondary = schema
            .secondary_key
            .as_ref()
            .and_then(|key| data.get(key));
        self.match_by_key(type_id, primary, secondary)
    }

    fn match_by_key(
        &self,
        type_id: TypeId,
        primary: &FieldValue,
        secondary: Option<&FieldValue>,
    ) -> Option<RecordHandle> {
        let schema = self.registry.get(type_id);
        for handle in self.handles(type_id) {
            let record = self.get(handle);
            let Some(existing) = record.primary_key_value(schema) else {
                continue;
            };
            if !self.values_match(existing, primary) {
                continue;
            }
            if let (Some(key), Some(wanted)) = (&schema.secondary_key, secondary) {
                match record.data.get(key) {
                    Some(existing) if self.values_match(existing, wanted) => {}
                    _ => continue,
                }
            }
            return Some(handle);
        }
        None
    }

    /// Value equality that treats a raw remote reference and a local link to
    /// the same record as equal.
    fn values_match(&self, a: &FieldValue, b: &FieldValue) -> bool {
        match (a, b) {
            (FieldValue::Scalar(x), FieldValue::Scalar(y)) => x == y,
            (FieldValue::Ref(x), FieldValue::Ref(y)) => {
                match (x.remote_id(self), y.remote_id(self)) {
                    (Some(i), Some(j)) => i == j,
                    _ => x == y,
                }
            }
            (FieldValue::RefList(xs), FieldValue::RefList(ys)) => {
                xs.len() == ys.len()
                    && xs.iter().zip(ys).all(|(x, y)| {
                        self.values_match(&FieldValue::Ref(*x), &FieldValue::Ref(*y))
                    })
            }
            _ => false,
        }
    }
}
