//! A single concrete record instance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use super::schema::{RecordSchema, TypeId};
use super::value::FieldValue;

/// One concrete object of a record type, local or remote.
#[derive(Debug, Clone)]
pub struct RecordInstance {
    /// Type of this record.
    pub type_id: TypeId,
    /// Remote identifier, `None` until the first successful create.
    pub remote_id: Option<i64>,
    /// Field name -> current value.
    pub data: BTreeMap<String, FieldValue>,
    /// Fields changed locally and not yet pushed.
    pub updated_items: BTreeSet<String>,
    /// Fields to be explicitly cleared remotely.
    pub unset_items: BTreeSet<String>,
    /// Tag name -> source that last supplied it (`None` for remote-read tags).
    pub tags: BTreeMap<String, Option<String>>,
    /// Source that last touched this record during this run.
    pub source: Option<String>,
    /// True until the first successful create.
    pub is_new: bool,
    /// True once successfully removed remotely.
    pub deleted: bool,
    /// Raw remote `last_updated` timestamp.
    pub last_updated: Option<String>,
}

impl RecordInstance {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            remote_id: None,
            data: BTreeMap::new(),
            updated_items: BTreeSet::new(),
            unset_items: BTreeSet::new(),
            tags: BTreeMap::new(),
            source: None,
            is_new: true,
            deleted: false,
            last_updated: None,
        }
    }

    /// Merge a raw remote representation into this instance.
    ///
    /// The remote is authoritative: fields present in the payload are
    /// overwritten and dropped from `updated_items`. A non-null `id` assigns
    /// the remote identifier and clears `is_new`.
    pub fn update_from_remote(&mut self, schema: &RecordSchema, payload: &Map<String, Value>) {
        if let Some(id) = payload.get("id").and_then(Value::as_i64) {
            self.remote_id = Some(id);
            self.is_new = false;
        }

        if let Some(ts) = payload.get("last_updated").and_then(Value::as_str) {
            self.last_updated = Some(ts.to_string());
        }

        if schema.taggable {
            if let Some(raw_tags) = payload.get("tags") {
                self.merge_remote_tags(raw_tags);
                self.updated_items.remove("tags");
            }
        }

        for (name, kind) in &schema.fields {
            let Some(raw) = payload.get(name) else {
                continue;
            };
            match FieldValue::from_wire(kind, raw) {
                Some(value) => {
                    self.data.insert(name.clone(), value);
                }
                None => {
                    self.data.remove(name);
                }
            }
            self.updated_items.remove(name);
        }
    }

    /// Apply locally observed field values, marking changed fields as
    /// pending for the next push.
    pub fn apply_local(&mut self, data: BTreeMap<String, FieldValue>) {
        for (name, value) in data {
            if self.data.get(&name) != Some(&value) {
                self.data.insert(name.clone(), value);
                self.updated_items.insert(name);
            }
        }
    }

    /// Schedule a field to be explicitly cleared remotely.
    pub fn schedule_unset(&mut self, field: impl Into<String>) {
        self.unset_items.insert(field.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Add a tag, recording which source supplied it. Marks the tag set as
    /// pending when the tag is new.
    pub fn add_tag(&mut self, tag: impl Into<String>, source: Option<&str>) {
        let tag = tag.into();
        if !self.tags.contains_key(&tag) {
            self.updated_items.insert("tags".to_string());
        }
        self.tags.insert(tag, source.map(str::to_string));
    }

    pub fn remove_tag(&mut self, tag: &str) {
        if self.tags.remove(tag).is_some() {
            self.updated_items.insert("tags".to_string());
        }
    }

    /// Wire representation of the tag set.
    pub fn tags_wire(&self) -> Value {
        Value::Array(
            self.tags
                .keys()
                .map(|name| serde_json::json!({ "name": name }))
                .collect(),
        )
    }

    /// Value of the schema's primary key field.
    pub fn primary_key_value<'a>(&'a self, schema: &RecordSchema) -> Option<&'a FieldValue> {
        self.data.get(&schema.primary_key)
    }

    /// Last update time truncated to second precision. Anything that does
    /// not start with 19 bytes of plain timestamp yields `None`.
    pub fn last_updated_time(&self) -> Option<NaiveDateTime> {
        let raw = self.last_updated.as_deref()?.get(..19)?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok()
    }

    fn merge_remote_tags(&mut self, raw: &Value) {
        let Some(items) = raw.as_array() else {
            return;
        };
        let mut names = BTreeSet::new();
        for item in items {
            let name = match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            if let Some(name) = name {
                names.insert(name);
            }
        }
        // keep existing source attribution for tags that survive the merge
        self.tags.retain(|tag, _| names.contains(tag));
        for name in names {
            self.tags.entry(name).or_insert(None);
        }
    }
}
