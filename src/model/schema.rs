//! Record type schemas and the static type registry.

use std::collections::{BTreeMap, HashMap};

/// Identifier of a record type within a [`TypeRegistry`].
///
/// The numeric value is the registration index; registration order is the
/// dependency-safe iteration order for reads and upserts, reverse order for
/// pruning and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub usize);

/// Kind of value a schema field holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// Plain JSON scalar (string, number, bool, nested object).
    Scalar,
    /// Single reference to a record of the named type.
    Reference { target: String },
    /// List of references to records of the named type.
    ReferenceList { target: String },
}

impl ValueKind {
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Reference {
            target: target.into(),
        }
    }

    pub fn reference_list(target: impl Into<String>) -> Self {
        Self::ReferenceList {
            target: target.into(),
        }
    }

    /// Target type name if this is a reference kind.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Scalar => None,
            Self::Reference { target } | Self::ReferenceList { target } => Some(target),
        }
    }
}

/// Link from a parent type to the child interface type it owns.
///
/// Child interfaces carry no update timestamp of their own, so the pruning
/// engine deletes them explicitly before deleting the parent.
#[derive(Debug, Clone)]
pub struct ChildLink {
    /// Name of the child record type.
    pub type_name: String,
    /// Field on the child that references the parent.
    pub parent_field: String,
}

/// Declared kind of remote resource.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    /// Human-readable type name, also the cache file stem.
    pub name: String,
    /// Wire path segment under `/api/`.
    pub api_path: String,
    /// Field whose value names an instance.
    pub primary_key: String,
    /// Optional second field for composite uniqueness (e.g. name + parent).
    pub secondary_key: Option<String>,
    /// Whether instances of this type are eligible for orphan pruning.
    pub prune: bool,
    /// Whether instances carry lifecycle tags on the wire.
    pub taggable: bool,
    /// Field name -> value kind.
    pub fields: BTreeMap<String, ValueKind>,
    /// Names of types that must be synchronized before this one.
    pub dependencies: Vec<String>,
    /// Owned child interface type, if any.
    pub child_link: Option<ChildLink>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, api_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_path: api_path.into(),
            primary_key: "name".to_string(),
            secondary_key: None,
            prune: false,
            taggable: false,
            fields: BTreeMap::new(),
            dependencies: Vec::new(),
            child_link: None,
        }
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn secondary_key(mut self, key: impl Into<String>) -> Self {
        self.secondary_key = Some(key.into());
        self
    }

    pub fn prunable(mut self) -> Self {
        self.prune = true;
        self
    }

    pub fn taggable(mut self) -> Self {
        self.taggable = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn depends_on(mut self, type_name: impl Into<String>) -> Self {
        self.dependencies.push(type_name.into());
        self
    }

    pub fn child_link(
        mut self,
        type_name: impl Into<String>,
        parent_field: impl Into<String>,
    ) -> Self {
        self.child_link = Some(ChildLink {
            type_name: type_name.into(),
            parent_field: parent_field.into(),
        });
        self
    }

    /// Kind of the given field, `Scalar` when undeclared.
    pub fn field_kind(&self, name: &str) -> ValueKind {
        self.fields.get(name).cloned().unwrap_or(ValueKind::Scalar)
    }
}

/// Explicit, ordered collection of record type descriptors.
///
/// Registered once at startup; lookups by name or [`TypeId`].
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<RecordSchema>,
    index: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, returning its id.
    ///
    /// Panics if a schema with the same name was already registered; the
    /// registry is built once at startup from static declarations.
    pub fn register(&mut self, schema: RecordSchema) -> TypeId {
        assert!(
            !self.index.contains_key(&schema.name),
            "record type '{}' registered twice",
            schema.name
        );
        let id = TypeId(self.types.len());
        self.index.insert(schema.name.clone(), id.0);
        self.types.push(schema);
        id
    }

    pub fn get(&self, id: TypeId) -> &RecordSchema {
        &self.types[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied().map(TypeId)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All type ids in registration order.
    pub fn ids(&self) -> impl DoubleEndedIterator<Item = TypeId> {
        (0..self.types.len()).map(TypeId)
    }

    /// Dependencies of a type, resolved to ids. Unregistered names are
    /// ignored; the registry is the single source of truth.
    pub fn dependencies_of(&self, id: TypeId) -> Vec<TypeId> {
        self.get(id)
            .dependencies
            .iter()
            .filter_map(|name| self.lookup(name))
            .collect()
    }
}
