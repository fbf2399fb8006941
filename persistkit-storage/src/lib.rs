//! SQLite storage layer for Persistkit.
//!
//! Maps entity definitions onto tables with a hybrid layout and provides the
//! generic CRUD/query engine over them.
//!
//! # Architecture
//!
//! - [`SchemaCompiler`] turns a definition into a cached [`CompiledSchema`]
//! - Each row holds the primary key, indexed scalar columns, the full payload
//!   in the `overflow` column, and `created_at` / `updated_at`
//! - [`Store`] validates, encodes, and writes records inside one transaction
//!   per write, and rebuilds entities from the overflow on read
//! - Blocking calls take a `&Connection`; `*_async` calls take a [`Database`]
//!   and run the same code on tokio's blocking pool

mod database;
mod error;
mod query;
mod schema;
mod store;
mod typed;

pub use database::{Database, DatabaseConfig, JournalMode};
pub use error::{StorageError, StorageResult};
pub use query::{
    escape_like, Direction, FilterItem, FilterOptions, FilterResult, ListQuery, OrderBy,
    Predicate, DEFAULT_FILTER_LIMIT, DEFAULT_LIST_LIMIT,
};
pub use schema::{
    create_table, existing_columns, fingerprint, sync_table, table_exists, Column, ColumnRole,
    ColumnType, CompiledSchema, SchemaCompiler, TableSync, UniqueConstraint,
    DEFAULT_PRIMARY_KEY_LENGTH,
};
pub use store::{Store, StoreOptions, StoredEntity};
pub use typed::TypedStore;

use persistkit_model::Catalog;
use rusqlite::Connection;
use std::sync::Arc;

/// Compiles and creates the table of every cataloged definition.
pub fn create_all(
    conn: &Connection,
    catalog: &Catalog,
    compiler: &SchemaCompiler,
) -> StorageResult<Vec<Arc<CompiledSchema>>> {
    catalog
        .all()
        .iter()
        .map(|definition| {
            let schema = compiler.compile(definition)?;
            create_table(conn, &schema)?;
            Ok(schema)
        })
        .collect()
}
