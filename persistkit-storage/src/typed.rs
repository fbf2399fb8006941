//! Store wrapper for statically defined Rust types.

use crate::database::Database;
use crate::error::{StorageError, StorageResult};
use crate::query::ListQuery;
use crate::schema::SchemaCompiler;
use crate::store::{Store, StoreOptions, StoredEntity};
use persistkit_crypto::OverflowCodec;
use persistkit_model::{PersistedObject, Record};
use rusqlite::Connection;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// A [`Store`] that converts to and from `T` with serde.
pub struct TypedStore<T> {
    store: Store,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: PersistedObject> TypedStore<T> {
    pub fn new(compiler: &SchemaCompiler, codec: Arc<OverflowCodec>) -> StorageResult<Self> {
        Self::with_options(compiler, codec, &StoreOptions::default())
    }

    pub fn with_options(
        compiler: &SchemaCompiler,
        codec: Arc<OverflowCodec>,
        options: &StoreOptions,
    ) -> StorageResult<Self> {
        Ok(Self {
            store: Store::with_options(T::definition(), compiler, codec, options)?,
            _marker: PhantomData,
        })
    }

    /// The untyped store underneath.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn create_table(&self, conn: &Connection) -> StorageResult<bool> {
        self.store.create_table(conn)
    }

    pub fn get(&self, conn: &Connection, key: &str) -> StorageResult<Option<T>> {
        self.store.get(conn, key)?.map(from_stored).transpose()
    }

    pub fn create(&self, conn: &Connection, entity: &T) -> StorageResult<T> {
        from_stored(self.store.create(conn, to_record(entity)?)?)
    }

    pub fn update(&self, conn: &Connection, entity: &T) -> StorageResult<T> {
        from_stored(self.store.update(conn, to_record(entity)?)?)
    }

    pub fn delete(&self, conn: &Connection, key: &str) -> StorageResult<bool> {
        self.store.delete(conn, key)
    }

    pub fn list(&self, conn: &Connection, query: &ListQuery) -> StorageResult<(Vec<T>, usize)> {
        let (page, total) = self.store.list(conn, query)?;
        let items = page.into_iter().map(from_stored).collect::<StorageResult<_>>()?;
        Ok((items, total))
    }

    pub fn get_all(&self, conn: &Connection) -> StorageResult<Vec<T>> {
        self.store
            .get_all(conn)?
            .into_iter()
            .map(from_stored)
            .collect()
    }

    pub async fn get_async(&self, db: &Database, key: &str) -> StorageResult<Option<T>> {
        self.store.get_async(db, key).await?.map(from_stored).transpose()
    }

    pub async fn create_async(&self, db: &Database, entity: &T) -> StorageResult<T> {
        from_stored(self.store.create_async(db, to_record(entity)?).await?)
    }

    pub async fn update_async(&self, db: &Database, entity: &T) -> StorageResult<T> {
        from_stored(self.store.update_async(db, to_record(entity)?).await?)
    }

    pub async fn delete_async(&self, db: &Database, key: &str) -> StorageResult<bool> {
        self.store.delete_async(db, key).await
    }

    pub async fn get_all_async(&self, db: &Database) -> StorageResult<Vec<T>> {
        self.store
            .get_all_async(db)
            .await?
            .into_iter()
            .map(from_stored)
            .collect()
    }
}

fn to_record<T: PersistedObject>(entity: &T) -> StorageResult<Record> {
    match serde_json::to_value(entity)? {
        Value::Object(record) => Ok(record),
        other => Err(StorageError::Validation(format!(
            "entity must serialize to a JSON object, got {other}"
        ))),
    }
}

fn from_stored<T: PersistedObject>(stored: StoredEntity) -> StorageResult<T> {
    Ok(serde_json::from_value(stored.into_value())?)
}
