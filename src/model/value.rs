//! Field values and references between record instances.

use serde_json::Value;

use super::inventory::Inventory;
use super::schema::{TypeId, ValueKind};

/// Handle to a record instance inside an [`Inventory`].
///
/// Slots are stable for the whole run: instances are only ever flagged as
/// deleted, never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHandle {
    pub type_id: TypeId,
    pub slot: usize,
}

/// A pointer to another record instance or to a raw remote identifier.
///
/// A reference contributes a usable wire value only once its target has a
/// non-null remote identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Raw remote identifier, not (yet) matched to a local instance.
    Remote(i64),
    /// Another instance in the local graph.
    Local(RecordHandle),
}

impl Reference {
    /// Remote identifier of the target, if it has one.
    pub fn remote_id(&self, inventory: &Inventory) -> Option<i64> {
        match self {
            Self::Remote(id) => Some(*id),
            Self::Local(handle) => inventory.get(*handle).remote_id,
        }
    }

    /// Human-readable description for diagnostics.
    pub fn describe(&self, inventory: &Inventory) -> String {
        match self {
            Self::Remote(id) => format!("remote #{id}"),
            Self::Local(handle) => inventory.display_name(*handle),
        }
    }
}

/// Value of a single record field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Ref(Reference),
    RefList(Vec<Reference>),
}

impl FieldValue {
    /// Parse a raw wire value according to the declared field kind.
    ///
    /// Null values and malformed references yield `None`; the field is then
    /// simply absent from the local mapping.
    pub fn from_wire(kind: &ValueKind, raw: &Value) -> Option<Self> {
        if raw.is_null() {
            return None;
        }
        match kind {
            ValueKind::Scalar => Some(Self::Scalar(raw.clone())),
            ValueKind::Reference { .. } => wire_ref_id(raw).map(|id| Self::Ref(Reference::Remote(id))),
            ValueKind::ReferenceList { .. } => {
                let items = raw.as_array()?;
                let refs: Vec<Reference> = items
                    .iter()
                    .filter_map(wire_ref_id)
                    .map(Reference::Remote)
                    .collect();
                Some(Self::RefList(refs))
            }
        }
    }

    /// Serialize into an outgoing request value.
    ///
    /// References resolve to their target's remote identifier; `None` when
    /// any target still lacks one.
    pub fn to_wire(&self, inventory: &Inventory) -> Option<Value> {
        match self {
            Self::Scalar(value) => Some(value.clone()),
            Self::Ref(reference) => reference.remote_id(inventory).map(Value::from),
            Self::RefList(refs) => {
                let ids: Option<Vec<i64>> =
                    refs.iter().map(|r| r.remote_id(inventory)).collect();
                ids.map(Value::from)
            }
        }
    }

    /// Whether this value holds one or more references.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Ref(_) | Self::RefList(_))
    }

    /// Whether every contained reference resolves to a remote identifier.
    /// Scalars are trivially resolved.
    pub fn is_resolved(&self, inventory: &Inventory) -> bool {
        match self {
            Self::Scalar(_) => true,
            Self::Ref(reference) => reference.remote_id(inventory).is_some(),
            Self::RefList(refs) => refs.iter().all(|r| r.remote_id(inventory).is_some()),
        }
    }

    /// Description of the value for diagnostics.
    pub fn describe(&self, inventory: &Inventory) -> String {
        match self {
            Self::Scalar(value) => value.to_string(),
            Self::Ref(reference) => reference.describe(inventory),
            Self::RefList(refs) => {
                let parts: Vec<String> = refs.iter().map(|r| r.describe(inventory)).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

/// Extract a remote identifier from a wire reference value, which arrives
/// either as a bare integer or as a nested object carrying an `id` field.
fn wire_ref_id(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => map.get("id").and_then(Value::as_i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_wire_scalar() {
        let value = FieldValue::from_wire(&ValueKind::Scalar, &json!("rack-12")).unwrap();
        assert_eq!(value, FieldValue::Scalar(json!("rack-12")));
    }

    #[test]
    fn test_from_wire_null_is_absent() {
        assert!(FieldValue::from_wire(&ValueKind::Scalar, &Value::Null).is_none());
        assert!(FieldValue::from_wire(&ValueKind::reference("site"), &Value::Null).is_none());
    }

    #[test]
    fn test_from_wire_reference_forms() {
        let bare = FieldValue::from_wire(&ValueKind::reference("site"), &json!(7)).unwrap();
        assert_eq!(bare, FieldValue::Ref(Reference::Remote(7)));

        let nested =
            FieldValue::from_wire(&ValueKind::reference("site"), &json!({"id": 7, "name": "fra1"}))
                .unwrap();
        assert_eq!(nested, FieldValue::Ref(Reference::Remote(7)));
    }

    #[test]
    fn test_from_wire_reference_list() {
        let value = FieldValue::from_wire(
            &ValueKind::reference_list("tag"),
            &json!([{"id": 1}, 2, {"id": 3}]),
        )
        .unwrap();
        assert_eq!(
            value,
            FieldValue::RefList(vec![
                Reference::Remote(1),
                Reference::Remote(2),
                Reference::Remote(3)
            ])
        );
    }
}
