//! Record/object model: schemas, instances and the in-memory graph.

pub mod catalog;
pub mod inventory;
pub mod record;
pub mod schema;
pub mod value;

pub use catalog::default_registry;
pub use inventory::Inventory;
pub use record::RecordInstance;
pub use schema::{ChildLink, RecordSchema, TypeId, TypeRegistry, ValueKind};
pub use value::{FieldValue, RecordHandle, Reference};
