//! Saved model definitions, kept in an ordinary entity table so a restarted
//! process can register them again.

use crate::definition::{ModelDefinition, ModelSource};
use crate::error::{RegistryError, RegistryResult};
use persistkit_crypto::OverflowCodec;
use persistkit_model::{EntityDefinition, FieldDescriptor, Record};
use persistkit_storage::{SchemaCompiler, Store, StoreOptions, StorageError, StoredEntity};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Logical table holding saved definitions.
pub const DEFINITIONS_TABLE: &str = "model_definitions";

/// One saved definition with the metadata it is indexed by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedDefinition {
    pub name: String,
    pub table_name: String,
    pub description: String,
    pub source: ModelSource,
}

/// Row shape inside the definitions table.
#[derive(Serialize, Deserialize)]
struct DefinitionRow {
    name: String,
    table_name: String,
    kind: String,
    #[serde(default)]
    description: String,
    /// The validator fills an absent object with `{}`; only parsed for
    /// `kind = "fields"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    definition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script: Option<String>,
}

impl SavedDefinition {
    fn to_record(&self) -> RegistryResult<Record> {
        let (definition, script) = match &self.source {
            ModelSource::Fields(definition) => (
                Some(serde_json::to_value(definition).map_err(StorageError::from)?),
                None,
            ),
            ModelSource::Script(script) => (None, Some(script.clone())),
        };
        let row = DefinitionRow {
            name: self.name.clone(),
            table_name: self.table_name.clone(),
            kind: self.source.kind().to_string(),
            description: self.description.clone(),
            definition,
            script,
        };
        match serde_json::to_value(row).map_err(StorageError::from)? {
            Value::Object(record) => Ok(record),
            _ => Err(RegistryError::Validation(format!(
                "definition '{}' did not serialize to an object",
                self.name
            ))),
        }
    }

    fn from_entity(entity: StoredEntity) -> RegistryResult<Self> {
        let row: DefinitionRow =
            serde_json::from_value(entity.into_value()).map_err(StorageError::from)?;
        let source = match (row.kind.as_str(), row.definition, row.script) {
            ("fields", Some(definition), _) => ModelSource::Fields(
                serde_json::from_value(definition).map_err(StorageError::from)?,
            ),
            ("script", _, Some(script)) => ModelSource::Script(script),
            (kind, _, _) => {
                return Err(RegistryError::Validation(format!(
                    "saved definition '{}' of kind '{kind}' has no body",
                    row.name
                )));
            }
        };
        Ok(Self {
            name: row.name,
            table_name: row.table_name,
            description: row.description,
            source,
        })
    }
}

/// Store over [`DEFINITIONS_TABLE`].
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    store: Store,
}

impl DefinitionStore {
    pub fn new(compiler: &SchemaCompiler, options: &StoreOptions) -> RegistryResult<Self> {
        let store = Store::with_options(
            Self::entity_definition()?,
            compiler,
            Arc::new(OverflowCodec::plain()),
            options,
        )?;
        Ok(Self { store })
    }

    /// Built-in definition of the saved-definition entity.
    pub fn entity_definition() -> RegistryResult<EntityDefinition> {
        let definition = EntityDefinition::builder("ModelDefinition", DEFINITIONS_TABLE)
            .field(FieldDescriptor::key_field("name").primary_key())
            .field(FieldDescriptor::key_field("table_name").indexed().unique())
            .field(FieldDescriptor::string("kind").with_max_length(16).indexed())
            .field(FieldDescriptor::text("description").optional())
            .field(FieldDescriptor::object("definition"))
            .field(FieldDescriptor::max_content_field("script").optional())
            .description("Saved dynamic model definitions")
            .build()?;
        Ok(definition)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn create_table(&self, conn: &Connection) -> RegistryResult<bool> {
        Ok(self.store.create_table(conn)?)
    }

    /// Inserts or replaces the definition saved under `saved.name`.
    pub fn save(&self, conn: &Connection, saved: &SavedDefinition) -> RegistryResult<()> {
        let record = saved.to_record()?;
        if self.store.get(conn, &saved.name)?.is_some() {
            self.store.update(conn, record)?;
        } else {
            self.store.create(conn, record)?;
        }
        Ok(())
    }

    pub fn get(&self, conn: &Connection, name: &str) -> RegistryResult<Option<SavedDefinition>> {
        self.store
            .get(conn, name)?
            .map(SavedDefinition::from_entity)
            .transpose()
    }

    pub fn delete(&self, conn: &Connection, name: &str) -> RegistryResult<bool> {
        Ok(self.store.delete(conn, name)?)
    }

    /// Every saved definition in name order. A row that no longer decodes
    /// is returned as an error next to its key.
    pub fn load_all(
        &self,
        conn: &Connection,
    ) -> RegistryResult<Vec<(String, RegistryResult<SavedDefinition>)>> {
        let pk = self.store.definition().primary_key.clone();
        Ok(self
            .store
            .get_all(conn)?
            .into_iter()
            .map(|entity| {
                let name = entity
                    .get(&pk)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (name, SavedDefinition::from_entity(entity))
            })
            .collect())
    }
}
