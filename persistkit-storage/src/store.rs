//! Generic CRUD and query engine over the hybrid layout.
//!
//! Each row carries the primary key, the indexed column values derived from
//! the payload at write time, the encoded payload in the overflow column, and
//! the two timestamps. Reads rebuild the entity from the overflow alone.

use crate::database::Database;
use crate::error::{StorageError, StorageResult};
use crate::query::{order_sql, FilterItem, FilterOptions, FilterResult, ListQuery, Predicate};
use crate::schema::{self, format_timestamp, quote, CompiledSchema, SchemaCompiler};
use chrono::{DateTime, Utc};
use persistkit_crypto::OverflowCodec;
use persistkit_model::{
    key_text, validate_record, EntityDefinition, Record, CREATED_AT_COLUMN, OVERFLOW_COLUMN,
    UPDATED_AT_COLUMN,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Types
// ============================================================================

/// A reconstructed entity with its storage timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub record: Record,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredEntity {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.record)
    }
}

/// Physical table naming applied when a store compiles its schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub table_prefix: String,
    pub table_suffix: String,
}

impl StoreOptions {
    pub fn physical_table_name(&self, table: &str) -> String {
        format!("{}{table}{}", self.table_prefix, self.table_suffix)
    }
}

// ============================================================================
// Store
// ============================================================================

/// CRUD over one entity table.
///
/// Cheap to clone; the definition, schema, and codec are shared.
#[derive(Clone)]
pub struct Store {
    definition: Arc<EntityDefinition>,
    schema: Arc<CompiledSchema>,
    codec: Arc<OverflowCodec>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("entity", &self.definition.name)
            .field("table", &self.schema.table_name)
            .field("encrypted", &self.codec.is_encrypted())
            .finish()
    }
}

impl Store {
    /// Compiles `definition` and builds a store over it.
    pub fn new(
        definition: EntityDefinition,
        compiler: &SchemaCompiler,
        codec: Arc<OverflowCodec>,
    ) -> StorageResult<Self> {
        Self::with_options(definition, compiler, codec, &StoreOptions::default())
    }

    /// Like [`Store::new`], with the table renamed by `options`.
    pub fn with_options(
        mut definition: EntityDefinition,
        compiler: &SchemaCompiler,
        codec: Arc<OverflowCodec>,
        options: &StoreOptions,
    ) -> StorageResult<Self> {
        definition.table_name = options.physical_table_name(&definition.table_name);
        let schema = compiler.compile(&definition)?;
        Self::from_parts(Arc::new(definition), schema, codec)
    }

    /// Builds a store from an already compiled schema.
    ///
    /// The codec must encrypt exactly when the definition asks for it.
    pub fn from_parts(
        definition: Arc<EntityDefinition>,
        schema: Arc<CompiledSchema>,
        codec: Arc<OverflowCodec>,
    ) -> StorageResult<Self> {
        if definition.encrypt != codec.is_encrypted() {
            let wanted = if definition.encrypt { "an encrypting" } else { "a plain" };
            return Err(StorageError::Validation(format!(
                "{} requires {wanted} overflow codec",
                definition.name
            )));
        }
        Ok(Self {
            definition,
            schema,
            codec,
        })
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    pub fn entity_name(&self) -> &str {
        &self.definition.name
    }

    pub fn table_name(&self) -> &str {
        &self.schema.table_name
    }

    fn pk(&self) -> &str {
        &self.schema.primary_key().name
    }

    // ── Table ────────────────────────────────────────────────────

    /// Idempotent `CREATE TABLE IF NOT EXISTS` plus indexes. Returns true
    /// when the table was created by this call.
    pub fn create_table(&self, conn: &Connection) -> StorageResult<bool> {
        schema::create_table(conn, &self.schema)
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn get(&self, conn: &Connection, key: &str) -> StorageResult<Option<StoredEntity>> {
        let sql = format!(
            "SELECT {}, {}, {} FROM {} WHERE {} = ?1",
            quote(OVERFLOW_COLUMN),
            quote(CREATED_AT_COLUMN),
            quote(UPDATED_AT_COLUMN),
            quote(self.table_name()),
            quote(self.pk()),
        );
        let row = conn
            .query_row(&sql, [key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                ))
            })
            .optional()?;
        row.map(|(overflow, created_at, updated_at)| {
            self.reconstruct(key, &overflow, created_at, updated_at)
        })
        .transpose()
    }

    /// Number of rows matching `predicate` (all rows when `None`).
    pub fn count(&self, conn: &Connection, predicate: Option<&Predicate>) -> StorageResult<usize> {
        let mut params = Vec::new();
        let where_sql = self.where_clause(predicate, &mut params)?;
        self.count_with(conn, &where_sql, &params)
    }

    pub fn filter(&self, conn: &Connection, options: &FilterOptions) -> StorageResult<FilterResult> {
        let mut params = Vec::new();
        let where_sql = self.where_clause(options.predicate.as_ref(), &mut params)?;
        let order = order_sql(&self.schema, &options.order)?;

        let total = if options.include_total {
            let total = self.count_with(conn, &where_sql, &params)?;
            if total == 0 {
                return Ok(FilterResult::empty(options, 0));
            }
            total
        } else {
            0
        };

        let page = match (options.limit, options.skip) {
            (Some(limit), skip) => {
                params.push(SqlValue::Integer(to_i64(limit)));
                params.push(SqlValue::Integer(to_i64(skip)));
                " LIMIT ? OFFSET ?"
            }
            (None, 0) => "",
            (None, skip) => {
                params.push(SqlValue::Integer(to_i64(skip)));
                " LIMIT -1 OFFSET ?"
            }
        };

        let items = if options.project_columns_only {
            self.select_columns(conn, &where_sql, &order, page, &params)?
        } else {
            self.select_entities(conn, &where_sql, &order, page, &params)?
                .into_iter()
                .map(FilterItem::Entity)
                .collect()
        };

        Ok(FilterResult {
            fetched: items.len(),
            items,
            total,
            skip: options.skip,
            limit: options.limit,
        })
    }

    /// Equality filters, optional search, one ordering. Returns the page
    /// and the total match count.
    pub fn list(
        &self,
        conn: &Connection,
        query: &ListQuery,
    ) -> StorageResult<(Vec<StoredEntity>, usize)> {
        let result = self.filter(conn, &query.to_filter_options())?;
        let entities = result
            .items
            .into_iter()
            .filter_map(FilterItem::into_entity)
            .collect();
        Ok((entities, result.total))
    }

    /// Every entity, in primary-key order.
    pub fn get_all(&self, conn: &Connection) -> StorageResult<Vec<StoredEntity>> {
        let order = order_sql(&self.schema, &[])?;
        self.select_entities(conn, "", &order, "", &[])
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Validates, encodes, and inserts a new entity.
    pub fn create(&self, conn: &Connection, record: Record) -> StorageResult<StoredEntity> {
        let record = validate_record(&self.definition, record)?;
        let key = self.key_of(&record)?;
        let columns = self.column_values(&record)?;
        let payload = self.codec.encode(&Value::Object(record.clone()))?;
        let now = format_timestamp(&Utc::now());

        let mut names = vec![quote(self.pk())];
        names.extend(self.schema.indexed_columns().map(|c| quote(&c.name)));
        names.push(quote(OVERFLOW_COLUMN));
        names.push(quote(CREATED_AT_COLUMN));
        names.push(quote(UPDATED_AT_COLUMN));
        let marks = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({marks})",
            quote(self.table_name()),
            names.join(", ")
        );

        let mut params = vec![SqlValue::Text(key.clone())];
        params.extend(columns);
        params.push(SqlValue::Text(payload));
        params.push(SqlValue::Text(now.clone()));
        params.push(SqlValue::Text(now));

        let tx = conn.unchecked_transaction()?;
        if let Err(err) = tx.execute(&sql, params_from_iter(params.iter())) {
            return Err(self.map_write_error(err, &record));
        }
        tx.commit()?;
        debug!(entity = %self.definition.name, key = %key, "created");

        self.reload(conn, &key)
    }

    /// Overwrites an existing entity. Fails with `NotFound` (and writes
    /// nothing) when no row has the record's key.
    pub fn update(&self, conn: &Connection, record: Record) -> StorageResult<StoredEntity> {
        let record = validate_record(&self.definition, record)?;
        let key = self.key_of(&record)?;
        let columns = self.column_values(&record)?;
        let payload = self.codec.encode(&Value::Object(record.clone()))?;

        let tx = conn.unchecked_transaction()?;
        let created_at: Option<DateTime<Utc>> = tx
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    quote(CREATED_AT_COLUMN),
                    quote(self.table_name()),
                    quote(self.pk())
                ),
                [&key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(created_at) = created_at else {
            return Err(self.not_found(&key));
        };
        let now = Utc::now().max(created_at);

        let mut sets: Vec<String> = self
            .schema
            .indexed_columns()
            .map(|c| format!("{} = ?", quote(&c.name)))
            .collect();
        sets.push(format!("{} = ?", quote(OVERFLOW_COLUMN)));
        sets.push(format!("{} = ?", quote(UPDATED_AT_COLUMN)));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(self.table_name()),
            sets.join(", "),
            quote(self.pk())
        );

        let mut params = columns;
        params.push(SqlValue::Text(payload));
        params.push(SqlValue::Text(format_timestamp(&now)));
        params.push(SqlValue::Text(key.clone()));

        if let Err(err) = tx.execute(&sql, params_from_iter(params.iter())) {
            return Err(self.map_write_error(err, &record));
        }
        tx.commit()?;
        debug!(entity = %self.definition.name, key = %key, "updated");

        self.reload(conn, &key)
    }

    /// Removes the row. Returns false when there was nothing to remove.
    pub fn delete(&self, conn: &Connection, key: &str) -> StorageResult<bool> {
        let removed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote(self.table_name()),
                quote(self.pk())
            ),
            [key],
        )?;
        if removed > 0 {
            debug!(entity = %self.definition.name, key = %key, "deleted");
        }
        Ok(removed > 0)
    }

    // ── Async variants ───────────────────────────────────────────

    pub async fn create_table_async(&self, db: &Database) -> StorageResult<bool> {
        let store = self.clone();
        db.run(move |conn| store.create_table(conn)).await
    }

    pub async fn get_async(&self, db: &Database, key: &str) -> StorageResult<Option<StoredEntity>> {
        let store = self.clone();
        let key = key.to_string();
        db.run(move |conn| store.get(conn, &key)).await
    }

    pub async fn create_async(&self, db: &Database, record: Record) -> StorageResult<StoredEntity> {
        let store = self.clone();
        db.run(move |conn| store.create(conn, record)).await
    }

    pub async fn update_async(&self, db: &Database, record: Record) -> StorageResult<StoredEntity> {
        let store = self.clone();
        db.run(move |conn| store.update(conn, record)).await
    }

    pub async fn delete_async(&self, db: &Database, key: &str) -> StorageResult<bool> {
        let store = self.clone();
        let key = key.to_string();
        db.run(move |conn| store.delete(conn, &key)).await
    }

    pub async fn filter_async(
        &self,
        db: &Database,
        options: FilterOptions,
    ) -> StorageResult<FilterResult> {
        let store = self.clone();
        db.run(move |conn| store.filter(conn, &options)).await
    }

    pub async fn list_async(
        &self,
        db: &Database,
        query: ListQuery,
    ) -> StorageResult<(Vec<StoredEntity>, usize)> {
        let store = self.clone();
        db.run(move |conn| store.list(conn, &query)).await
    }

    pub async fn get_all_async(&self, db: &Database) -> StorageResult<Vec<StoredEntity>> {
        let store = self.clone();
        db.run(move |conn| store.get_all(conn)).await
    }

    pub async fn count_async(
        &self,
        db: &Database,
        predicate: Option<Predicate>,
    ) -> StorageResult<usize> {
        let store = self.clone();
        db.run(move |conn| store.count(conn, predicate.as_ref())).await
    }

    // ── Internals ────────────────────────────────────────────────

    fn key_of(&self, record: &Record) -> StorageResult<String> {
        record.get(self.pk()).and_then(key_text).ok_or_else(|| {
            StorageError::Validation(format!(
                "{}: primary key '{}' must be a string or number",
                self.definition.name,
                self.pk()
            ))
        })
    }

    /// Indexed column values derived from the payload, in column order.
    fn column_values(&self, record: &Record) -> StorageResult<Vec<SqlValue>> {
        self.schema
            .indexed_columns()
            .map(|c| {
                let value = record.get(&c.name).unwrap_or(&Value::Null);
                c.column_type.to_sql(&c.name, value)
            })
            .collect()
    }

    fn reconstruct(
        &self,
        key: &str,
        overflow: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<StoredEntity> {
        let decoded = self.codec.decode(overflow);
        if decoded.is_fallback() {
            warn!(
                entity = %self.definition.name,
                table = %self.table_name(),
                key = %key,
                outcome = decoded.kind(),
                "overflow payload read through fallback"
            );
        }
        match decoded.into_value() {
            Value::Object(record) => Ok(StoredEntity {
                record,
                created_at,
                updated_at,
            }),
            _ => Err(StorageError::CorruptPayload {
                entity: self.definition.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    fn reload(&self, conn: &Connection, key: &str) -> StorageResult<StoredEntity> {
        self.get(conn, key)?.ok_or_else(|| self.not_found(key))
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::NotFound {
            entity: self.definition.name.clone(),
            key_field: self.pk().to_string(),
            key: key.to_string(),
        }
    }

    fn where_clause(
        &self,
        predicate: Option<&Predicate>,
        params: &mut Vec<SqlValue>,
    ) -> StorageResult<String> {
        Ok(match predicate {
            Some(p) => format!(" WHERE {}", p.to_sql(&self.schema, params)?),
            None => String::new(),
        })
    }

    fn count_with(
        &self,
        conn: &Connection,
        where_sql: &str,
        params: &[SqlValue],
    ) -> StorageResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}{where_sql}", quote(self.table_name()));
        let n: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn select_entities(
        &self,
        conn: &Connection,
        where_sql: &str,
        order: &str,
        page: &str,
        params: &[SqlValue],
    ) -> StorageResult<Vec<StoredEntity>> {
        let sql = format!(
            "SELECT {}, {}, {}, {} FROM {}{where_sql} ORDER BY {order}{page}",
            quote(self.pk()),
            quote(OVERFLOW_COLUMN),
            quote(CREATED_AT_COLUMN),
            quote(UPDATED_AT_COLUMN),
            quote(self.table_name()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(key, overflow, created_at, updated_at)| {
                self.reconstruct(&key, &overflow, created_at, updated_at)
            })
            .collect()
    }

    fn select_columns(
        &self,
        conn: &Connection,
        where_sql: &str,
        order: &str,
        page: &str,
        params: &[SqlValue],
    ) -> StorageResult<Vec<FilterItem>> {
        let columns: Vec<_> = self
            .schema
            .columns()
            .iter()
            .filter(|c| c.name != OVERFLOW_COLUMN)
            .collect();
        let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
        let sql = format!(
            "SELECT {} FROM {}{where_sql} ORDER BY {order}{page}",
            names.join(", "),
            quote(self.table_name()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut map = Map::new();
                for (i, c) in columns.iter().enumerate() {
                    map.insert(c.name.clone(), c.column_type.to_json(row.get_ref(i)?));
                }
                Ok(FilterItem::Columns(map))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Maps a constraint failure to `DuplicateKey`, naming the violated
    /// column group and the record's values for it.
    fn map_write_error(&self, err: rusqlite::Error, record: &Record) -> StorageError {
        let columns = match &err {
            rusqlite::Error::SqliteFailure(e, Some(msg)) if e.code == ErrorCode::ConstraintViolation => {
                msg.strip_prefix("UNIQUE constraint failed: ")
            }
            _ => None,
        };
        let Some(columns) = columns else {
            return err.into();
        };

        let fields: Vec<String> = columns
            .split(',')
            .map(|c| {
                let c = c.trim();
                c.rsplit_once('.').map_or(c, |(_, col)| col).to_string()
            })
            .collect();
        let value = fields
            .iter()
            .map(|f| record.get(f).and_then(key_text).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");
        StorageError::DuplicateKey {
            entity: self.definition.name.clone(),
            field: fields.join(","),
            value,
        }
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
