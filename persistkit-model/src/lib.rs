//! Entity model for Persistkit.
//!
//! Defines the descriptors every other Persistkit crate depends on:
//! - [`EntityDefinition`]: table, primary key, indexed fields, unique groups, encryption flag
//! - [`FieldDescriptor`] / [`FieldType`]: one field and its semantic type tag
//! - [`Record`] and [`validate_record`]: the overflow payload and its type-table driven validator
//! - [`Catalog`] / [`PersistedObject`]: statically defined entity types
//!
//! Dynamic models and Rust types both end up as an `EntityDefinition`; no
//! concrete types are synthesized at runtime.

mod catalog;
mod definition;
mod error;
mod field;
mod record;

pub use catalog::{Catalog, PersistedObject};
pub use definition::{
    DefinitionBuilder, EntityDefinition, CREATED_AT_COLUMN, OVERFLOW_COLUMN, RESERVED_COLUMNS,
    UPDATED_AT_COLUMN,
};
pub use error::{ModelError, ModelResult};
pub use field::{is_identifier, FieldDescriptor, FieldType};
pub use record::{key_text, validate_record, Record};
