use crate::error::{ModelError, ModelResult};
use crate::field::{is_identifier, FieldDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Physical column holding the serialized (optionally encrypted) entity.
pub const OVERFLOW_COLUMN: &str = "overflow";
/// Set once when a row is inserted.
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Refreshed on every insert and update.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Column names managed by the storage layer; entity fields may not use them.
pub const RESERVED_COLUMNS: [&str; 3] = [OVERFLOW_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Describes an entity type's storage shape.
///
/// The primary key and the other indexed fields become physical columns; the
/// full entity is always kept in the overflow column. Unique groups are either
/// a single field name or a comma-joined composite (`"first_name,last_name"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub table_name: String,
    pub primary_key: String,
    pub indexed_fields: Vec<String>,
    #[serde(default)]
    pub unique_fields: Vec<String>,
    #[serde(default)]
    pub encrypt: bool,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl EntityDefinition {
    pub fn builder(name: &str, table_name: &str) -> DefinitionBuilder {
        DefinitionBuilder::new(name, table_name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key_field(&self) -> Option<&FieldDescriptor> {
        self.field(&self.primary_key)
    }

    /// Descriptors of the indexed fields, in index order.
    pub fn indexed_descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.indexed_fields.iter().filter_map(|name| self.field(name))
    }

    pub fn is_indexed(&self, name: &str) -> bool {
        self.indexed_fields.iter().any(|f| f == name)
    }

    /// Unique groups split into their member field names.
    pub fn unique_groups(&self) -> Vec<Vec<String>> {
        self.unique_fields
            .iter()
            .map(|group| {
                group
                    .split(',')
                    .map(|member| member.trim().to_string())
                    .filter(|member| !member.is_empty())
                    .collect()
            })
            .collect()
    }

    /// Checks every structural invariant of the definition.
    pub fn validate(&self) -> ModelResult<()> {
        let entity = self.name.as_str();
        if self.name.trim().is_empty() {
            return Err(ModelError::validation("entity", "entity name must not be empty"));
        }
        if !is_identifier(&self.table_name) {
            return Err(ModelError::validation(
                entity,
                format!("table name '{}' is not a valid identifier", self.table_name),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_identifier(&field.name) {
                return Err(ModelError::validation(
                    entity,
                    format!("field name '{}' is not a valid identifier", field.name),
                ));
            }
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(ModelError::validation(
                    entity,
                    format!("field name '{}' is reserved", field.name),
                ));
            }
            // SQLite column names compare case-insensitively.
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(ModelError::validation(
                    entity,
                    format!("field '{}' is declared more than once", field.name),
                ));
            }
        }

        let pk = self.primary_key_field().ok_or_else(|| {
            ModelError::validation(
                entity,
                format!("primary key '{}' is not a declared field", self.primary_key),
            )
        })?;
        if pk.field_type.is_complex() {
            return Err(ModelError::validation(
                entity,
                format!("primary key '{}' cannot be of type {}", pk.name, pk.field_type),
            ));
        }
        if !self.is_indexed(&self.primary_key) {
            return Err(ModelError::validation(
                entity,
                format!("primary key '{}' must be an indexed field", self.primary_key),
            ));
        }

        let mut indexed = HashSet::new();
        for name in &self.indexed_fields {
            let field = self.field(name).ok_or_else(|| {
                ModelError::validation(entity, format!("indexed field '{name}' is not a declared field"))
            })?;
            if field.field_type.is_complex() {
                return Err(ModelError::validation(
                    entity,
                    format!("field '{name}' of type {} cannot be indexed", field.field_type),
                ));
            }
            if !indexed.insert(name.as_str()) {
                return Err(ModelError::validation(entity, format!("field '{name}' is indexed twice")));
            }
        }

        for (group, members) in self.unique_fields.iter().zip(self.unique_groups()) {
            if members.is_empty() {
                return Err(ModelError::validation(entity, format!("unique group '{group}' is empty")));
            }
            for member in &members {
                let field = self.field(member).ok_or_else(|| {
                    ModelError::validation(entity, format!("unique field '{member}' is not a declared field"))
                })?;
                if field.field_type.is_complex() {
                    return Err(ModelError::validation(
                        entity,
                        format!("field '{member}' of type {} cannot be unique", field.field_type),
                    ));
                }
                if !self.is_indexed(member) {
                    return Err(ModelError::validation(
                        entity,
                        format!("unique field '{member}' must also be indexed"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Incremental construction of an [`EntityDefinition`].
///
/// The primary key is always placed first in the indexed list, and
/// `build()` validates the finished definition.
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    definition: EntityDefinition,
}

impl DefinitionBuilder {
    fn new(name: &str, table_name: &str) -> Self {
        Self {
            definition: EntityDefinition {
                name: name.into(),
                table_name: table_name.into(),
                primary_key: String::new(),
                indexed_fields: Vec::new(),
                unique_fields: Vec::new(),
                encrypt: false,
                fields: Vec::new(),
                description: String::new(),
            },
        }
    }

    pub fn primary_key(mut self, name: &str) -> Self {
        self.definition.primary_key = name.into();
        self
    }

    /// Adds a field. Descriptor flags (`is_primary_key`, `is_indexed`,
    /// `is_unique`) are honoured.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        if field.is_primary_key {
            self.definition.primary_key = field.name.clone();
        }
        if field.is_indexed && !field.is_primary_key {
            self.push_indexed(&field.name);
        }
        if field.is_unique && !field.is_primary_key {
            self.definition.unique_fields.push(field.name.clone());
        }
        self.definition.fields.push(field);
        self
    }

    pub fn fields(self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        fields.into_iter().fold(self, Self::field)
    }

    pub fn indexed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.push_indexed(name.as_ref());
        }
        self
    }

    /// Adds a unique group: a field name or a comma-joined composite.
    pub fn unique(mut self, group: &str) -> Self {
        if !self.definition.unique_fields.iter().any(|g| g == group) {
            self.definition.unique_fields.push(group.into());
        }
        self
    }

    pub fn encrypted(mut self, encrypt: bool) -> Self {
        self.definition.encrypt = encrypt;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.definition.description = description.into();
        self
    }

    fn push_indexed(&mut self, name: &str) {
        if !self.definition.indexed_fields.iter().any(|f| f == name) {
            self.definition.indexed_fields.push(name.into());
        }
    }

    pub fn build(mut self) -> ModelResult<EntityDefinition> {
        let pk = self.definition.primary_key.clone();
        if pk.is_empty() {
            return Err(ModelError::validation(
                &self.definition.name,
                "a primary key field is required",
            ));
        }
        self.definition.indexed_fields.retain(|f| *f != pk);
        self.definition.indexed_fields.insert(0, pk.clone());
        self.definition.unique_fields.retain(|g| g.trim() != pk);
        for field in &mut self.definition.fields {
            if field.name == pk {
                field.is_primary_key = true;
                field.required = true;
            }
        }
        self.definition.validate()?;
        Ok(self.definition)
    }
}
