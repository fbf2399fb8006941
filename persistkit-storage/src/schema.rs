//! Schema compiler.
//!
//! Turns an [`EntityDefinition`] into the physical layout of its table: the
//! primary-key column, one typed column per indexed simple field, the
//! overflow column, and the two timestamp columns. Compiled schemas are
//! immutable and cached per `(table, fingerprint)`.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use persistkit_crypto::canonical_json;
use persistkit_model::{
    EntityDefinition, FieldType, CREATED_AT_COLUMN, OVERFLOW_COLUMN, UPDATED_AT_COLUMN,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Primary-key column width when the key field declares no max length.
pub const DEFAULT_PRIMARY_KEY_LENGTH: usize = 400;

/// Bounded string width for string-like fields with no declared or type default.
const FALLBACK_STRING_LENGTH: usize = 200;

/// Text form of timestamps, matching rusqlite's chrono mapping.
const TIMESTAMP_FORMAT: &str = "%F %T%.f%:z";

// ============================================================================
// Columns
// ============================================================================

/// Physical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Integer,
    Timestamp,
    Varchar(usize),
    Text,
}

impl ColumnType {
    /// Maps a simple field type. Complex types have no column.
    pub fn for_field(field_type: FieldType, max_length: Option<usize>) -> Option<Self> {
        match field_type {
            FieldType::Boolean => Some(Self::Boolean),
            FieldType::Integer => Some(Self::Integer),
            FieldType::DateTime => Some(Self::Timestamp),
            t if t.is_complex() => None,
            t => Some(Self::Varchar(
                max_length
                    .or_else(|| t.default_max_length())
                    .unwrap_or(FALLBACK_STRING_LENGTH),
            )),
        }
    }

    pub fn sql(&self) -> String {
        match self {
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Varchar(n) => format!("VARCHAR({n})"),
            Self::Text => "TEXT".to_string(),
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Varchar(_) | Self::Text)
    }

    /// Converts a payload value into the column's storage form.
    ///
    /// Timestamps accept RFC 3339 or the stored text form and are normalized
    /// to UTC so ordering and comparisons are chronological.
    pub fn to_sql(&self, column: &str, value: &Value) -> StorageResult<SqlValue> {
        let mismatch = || {
            StorageError::Validation(format!(
                "column '{column}' ({}) cannot hold {value}",
                self.sql()
            ))
        };
        Ok(match (self, value) {
            (_, Value::Null) => SqlValue::Null,
            (Self::Boolean, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (Self::Boolean, Value::Number(n)) => SqlValue::Integer(i64::from(n.as_i64() != Some(0))),
            (Self::Integer, Value::Number(n)) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().ok_or_else(mismatch)?),
            },
            (Self::Integer, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (Self::Timestamp, Value::String(s)) => {
                SqlValue::Text(format_timestamp(&parse_timestamp(s).ok_or_else(mismatch)?))
            }
            (Self::Varchar(_) | Self::Text, Value::String(s)) => SqlValue::Text(s.clone()),
            (Self::Varchar(_) | Self::Text, Value::Number(n)) => SqlValue::Text(n.to_string()),
            (Self::Varchar(_) | Self::Text, Value::Bool(b)) => SqlValue::Text(b.to_string()),
            _ => return Err(mismatch()),
        })
    }

    /// Converts a stored value back to JSON for column projections.
    pub fn to_json(&self, value: ValueRef<'_>) -> Value {
        match (self, value) {
            (_, ValueRef::Null) => Value::Null,
            (Self::Boolean, ValueRef::Integer(i)) => Value::Bool(i != 0),
            (_, ValueRef::Integer(i)) => Value::from(i),
            (_, ValueRef::Real(f)) => Value::from(f),
            (Self::Timestamp, ValueRef::Text(t)) => {
                let text = String::from_utf8_lossy(t);
                match parse_timestamp(&text) {
                    Some(dt) => Value::String(dt.to_rfc3339()),
                    None => Value::String(text.into_owned()),
                }
            }
            (_, ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).into_owned()),
            (_, ValueRef::Blob(b)) => Value::String(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// What a column is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    PrimaryKey,
    Indexed,
    Overflow,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub role: ColumnRole,
}

impl Column {
    fn definition_sql(&self) -> String {
        let name = quote(&self.name);
        let ty = self.column_type.sql();
        match self.role {
            ColumnRole::PrimaryKey => format!("{name} {ty} NOT NULL PRIMARY KEY"),
            ColumnRole::Indexed => format!("{name} {ty}"),
            ColumnRole::Overflow | ColumnRole::CreatedAt | ColumnRole::UpdatedAt => {
                format!("{name} {ty} NOT NULL")
            }
        }
    }

    /// Literal used when the column is added to a table that already has rows.
    pub fn neutral_default(&self) -> &'static str {
        match (self.role, self.column_type) {
            (ColumnRole::CreatedAt | ColumnRole::UpdatedAt, _) => "'1970-01-01 00:00:00+00:00'",
            (_, ColumnType::Integer | ColumnType::Boolean) => "0",
            _ => "''",
        }
    }

    /// `ALTER TABLE ... ADD COLUMN` for this column.
    pub fn add_column_sql(&self, table: &str) -> String {
        let name = quote(&self.name);
        let ty = self.column_type.sql();
        let default = self.neutral_default();
        let not_null = if self.role == ColumnRole::Indexed {
            ""
        } else {
            " NOT NULL"
        };
        format!(
            "ALTER TABLE {} ADD COLUMN {name} {ty}{not_null} DEFAULT {default}",
            quote(table)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    /// Group label used in duplicate-key errors (`a,b`).
    pub fn label(&self) -> String {
        self.columns.join(",")
    }
}

// ============================================================================
// CompiledSchema
// ============================================================================

/// Physical layout of one entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    pub entity: String,
    pub table_name: String,
    pub fingerprint: String,
    columns: Vec<Column>,
    unique_constraints: Vec<UniqueConstraint>,
    encrypted: bool,
}

impl CompiledSchema {
    fn from_definition(definition: &EntityDefinition, fingerprint: String) -> StorageResult<Self> {
        let table = definition.table_name.as_str();
        let pk = definition.primary_key_field().ok_or_else(|| {
            StorageError::Validation(format!("{}: primary key is not declared", definition.name))
        })?;

        let mut columns = vec![Column {
            name: pk.name.clone(),
            column_type: ColumnType::Varchar(pk.max_length.unwrap_or(DEFAULT_PRIMARY_KEY_LENGTH)),
            role: ColumnRole::PrimaryKey,
        }];
        for field in definition.indexed_descriptors() {
            if field.name == pk.name {
                continue;
            }
            if let Some(column_type) = ColumnType::for_field(field.field_type, field.max_length) {
                columns.push(Column {
                    name: field.name.clone(),
                    column_type,
                    role: ColumnRole::Indexed,
                });
            }
        }
        columns.push(Column {
            name: OVERFLOW_COLUMN.to_string(),
            column_type: ColumnType::Text,
            role: ColumnRole::Overflow,
        });
        columns.push(Column {
            name: CREATED_AT_COLUMN.to_string(),
            column_type: ColumnType::Timestamp,
            role: ColumnRole::CreatedAt,
        });
        columns.push(Column {
            name: UPDATED_AT_COLUMN.to_string(),
            column_type: ColumnType::Timestamp,
            role: ColumnRole::UpdatedAt,
        });

        let unique_constraints = definition
            .unique_groups()
            .into_iter()
            .filter(|group| !(group.len() == 1 && group[0] == pk.name))
            .map(|group| UniqueConstraint {
                name: format!("uq_{table}_{}", group.join("_")),
                columns: group,
            })
            .collect();

        Ok(Self {
            entity: definition.name.clone(),
            table_name: table.to_string(),
            fingerprint,
            columns,
            unique_constraints,
            encrypted: definition.encrypt,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &Column {
        &self.columns[0]
    }

    /// Indexed columns other than the primary key, in declaration order.
    pub fn indexed_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.role == ColumnRole::Indexed)
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    /// True when the overflow column holds ciphertext.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Column names in physical order.
    pub fn column_names(&self, include_overflow: bool) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| include_overflow || c.role != ColumnRole::Overflow)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn column_types(&self) -> Vec<(&str, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c.column_type))
            .collect()
    }

    /// Columns a free-text search scans. The overflow is skipped when it is
    /// encrypted.
    pub fn searchable_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| match c.role {
                ColumnRole::PrimaryKey | ColumnRole::Indexed => c.column_type.is_textual(),
                ColumnRole::Overflow => !self.encrypted,
                _ => false,
            })
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition_sql).collect();
        for uq in &self.unique_constraints {
            let cols: Vec<String> = uq.columns.iter().map(|c| quote(c)).collect();
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote(&uq.name),
                cols.join(", ")
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(&self.table_name),
            parts.join(",\n    ")
        )
    }

    /// One secondary index per indexed non-key column.
    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexed_columns()
            .map(|c| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote(&format!("ix_{}_{}", self.table_name, c.name)),
                    quote(&self.table_name),
                    quote(&c.name)
                )
            })
            .collect()
    }
}

// ============================================================================
// SchemaCompiler
// ============================================================================

/// Compiles definitions and caches the result for the process lifetime.
#[derive(Debug, Default)]
pub struct SchemaCompiler {
    cache: Mutex<HashMap<(String, String), Arc<CompiledSchema>>>,
}

impl SchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and compiles `definition`, reusing a cached schema when the
    /// same table was already compiled from an identical definition.
    pub fn compile(&self, definition: &EntityDefinition) -> StorageResult<Arc<CompiledSchema>> {
        definition.validate()?;
        let fingerprint = fingerprint(definition)?;
        let key = (definition.table_name.clone(), fingerprint.clone());

        {
            let cache = self.cache.lock().map_err(|_| StorageError::LockPoisoned)?;
            if let Some(schema) = cache.get(&key) {
                debug!(table = %definition.table_name, "schema cache hit");
                return Ok(Arc::clone(schema));
            }
        }

        let compiled = Arc::new(CompiledSchema::from_definition(definition, fingerprint)?);
        let mut cache = self.cache.lock().map_err(|_| StorageError::LockPoisoned)?;
        let schema = cache.entry(key).or_insert_with(|| {
            debug!(
                table = %definition.table_name,
                columns = compiled.columns.len(),
                "schema cache miss, compiled"
            );
            compiled
        });
        Ok(Arc::clone(schema))
    }

    /// Drops every cached schema for `table`. Returns how many were dropped.
    pub fn invalidate(&self, table: &str) -> StorageResult<usize> {
        let mut cache = self.cache.lock().map_err(|_| StorageError::LockPoisoned)?;
        let before = cache.len();
        cache.retain(|(t, _), _| t != table);
        Ok(before - cache.len())
    }

    pub fn cached_len(&self) -> usize {
        match self.cache.lock() {
            Ok(cache) => cache.len(),
            Err(poisoned) => {
                warn!("schema cache lock poisoned; recovering");
                poisoned.into_inner().len()
            }
        }
    }
}

/// SHA-256 hex digest of the definition's canonical JSON.
pub fn fingerprint(definition: &EntityDefinition) -> StorageResult<String> {
    let canonical = canonical_json(&serde_json::to_value(definition)?)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

// ============================================================================
// Table maintenance
// ============================================================================

/// Outcome of bringing a physical table in line with a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSync {
    pub created: bool,
    pub added_columns: Vec<String>,
}

pub fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Column names currently present on `table`, via `PRAGMA table_info`.
pub fn existing_columns(conn: &Connection, table: &str) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Creates the table and indexes if absent (idempotent).
///
/// An older table missing some indexed columns needs [`sync_table`] instead.
pub fn create_table(conn: &Connection, schema: &CompiledSchema) -> StorageResult<bool> {
    let created = create_bare_table(conn, schema)?;
    create_indexes(conn, schema)?;
    Ok(created)
}

/// Creates the table if needed, then adds any schema column the table lacks.
///
/// Additive only: existing columns are never dropped or retyped and existing
/// rows keep their values. New columns get a type-neutral default.
pub fn sync_table(conn: &Connection, schema: &CompiledSchema) -> StorageResult<TableSync> {
    let created = create_bare_table(conn, schema)?;
    let present = existing_columns(conn, &schema.table_name)?;

    let mut added_columns = Vec::new();
    for column in schema.columns() {
        if present.iter().any(|p| p.eq_ignore_ascii_case(&column.name)) {
            continue;
        }
        conn.execute_batch(&column.add_column_sql(&schema.table_name))?;
        info!(
            table = %schema.table_name,
            column = %column.name,
            column_type = %column.column_type.sql(),
            "added column"
        );
        added_columns.push(column.name.clone());
    }
    // Indexes go last so they can cover the columns added above.
    create_indexes(conn, schema)?;

    Ok(TableSync {
        created,
        added_columns,
    })
}

fn create_bare_table(conn: &Connection, schema: &CompiledSchema) -> StorageResult<bool> {
    let existed = table_exists(conn, &schema.table_name)?;
    conn.execute_batch(&schema.create_table_sql())?;
    if !existed {
        info!(table = %schema.table_name, entity = %schema.entity, "created table");
    }
    Ok(!existed)
}

fn create_indexes(conn: &Connection, schema: &CompiledSchema) -> StorageResult<()> {
    for sql in schema.create_index_sql() {
        conn.execute_batch(&sql)?;
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Double-quotes an identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, TIMESTAMP_FORMAT))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
