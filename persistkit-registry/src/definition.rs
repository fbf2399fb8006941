//! Dynamic model definitions and their translation into entity definitions.

use crate::error::{RegistryError, RegistryResult};
use persistkit_model::{EntityDefinition, FieldDescriptor};
use persistkit_script::ScriptModel;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A model submitted as a field list.
///
/// ```json
/// {
///   "name": "Product",
///   "table_name": "products",
///   "fields": [
///     {"name": "sku", "type": "string", "is_primary_key": true, "max_length": 64},
///     {"name": "price", "type": "integer", "is_indexed": true}
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    pub table_name: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldDescriptor>,
    /// Composite unique groups, each a comma-joined list of field names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_together: Vec<String>,
    #[serde(default)]
    pub encrypt: bool,
}

impl ModelDefinition {
    pub fn new(name: &str, table_name: &str) -> Self {
        Self {
            name: name.to_string(),
            table_name: table_name.to_string(),
            description: String::new(),
            fields: Vec::new(),
            unique_together: Vec::new(),
            encrypt: false,
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn unique_together(mut self, group: &str) -> Self {
        self.unique_together.push(group.to_string());
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    /// Field list of a model extracted from an entity script.
    pub fn from_script_model(model: &ScriptModel) -> Self {
        Self {
            name: model.name.clone(),
            table_name: model.table_name.clone().unwrap_or_default(),
            description: model.description.clone(),
            fields: model.descriptors(),
            unique_together: model.composite_unique(),
            encrypt: model.encrypt,
        }
    }

    /// Classifies the fields and builds the validated entity definition.
    ///
    /// Exactly one field must be the primary key. The key comes first among
    /// the indexed fields, followed by the other indexed simple fields in
    /// declaration order. Unique simple fields, and members of composite
    /// groups, are promoted to indexed. Complex fields never get a column,
    /// so their index flags are dropped.
    pub fn to_entity_definition(&self) -> RegistryResult<EntityDefinition> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Validation("model name is required".into()));
        }

        let keys: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.is_primary_key)
            .map(|f| f.name.as_str())
            .collect();
        if keys.len() != 1 {
            return Err(RegistryError::Validation(format!(
                "model '{}' must declare exactly one primary key field, found {}",
                self.name,
                keys.len()
            )));
        }

        let fields = self.fields.iter().cloned().map(|mut field| {
            if field.field_type.is_complex() {
                if field.is_indexed || field.is_unique {
                    debug!(
                        model = %self.name,
                        field = %field.name,
                        field_type = field.field_type.as_str(),
                        "complex field stays in the overflow; ignoring index flags"
                    );
                }
                field.is_indexed = false;
                field.is_unique = false;
            } else if field.is_unique {
                field.is_indexed = true;
            }
            field
        });

        let mut builder = EntityDefinition::builder(&self.name, &self.table_name)
            .fields(fields)
            .encrypted(self.encrypt)
            .description(&self.description);
        for group in &self.unique_together {
            let members: Vec<&str> = group.split(',').map(str::trim).collect();
            builder = builder.indexed(members.iter().copied()).unique(&members.join(","));
        }
        Ok(builder.build()?)
    }
}

/// What a registration was made from; persisted so it can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Fields(ModelDefinition),
    Script(String),
}

impl ModelSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelSource::Fields(_) => "fields",
            ModelSource::Script(_) => "script",
        }
    }
}

/// Returned by a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredModel {
    pub name: String,
    pub table_name: String,
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistkit_model::FieldType;

    fn product() -> ModelDefinition {
        ModelDefinition::new("Product", "products")
            .field(FieldDescriptor::string("name").indexed())
            .field(FieldDescriptor::key_field("sku").primary_key())
            .field(FieldDescriptor::key_field("barcode").unique())
            .field(FieldDescriptor::string_array("tags").indexed())
    }

    #[test]
    fn primary_key_leads_indexed_fields() {
        let definition = product().to_entity_definition().unwrap();
        assert_eq!(definition.primary_key, "sku");
        assert_eq!(definition.indexed_fields, vec!["sku", "name", "barcode"]);
        assert_eq!(definition.unique_fields, vec!["barcode"]);
    }

    #[test]
    fn complex_fields_lose_index_flags() {
        let definition = product().to_entity_definition().unwrap();
        let tags = definition.field("tags").unwrap();
        assert_eq!(tags.field_type, FieldType::StringArray);
        assert!(!tags.is_indexed);
        assert!(!definition.is_indexed("tags"));
    }

    #[test]
    fn composite_members_become_indexed() {
        let definition = ModelDefinition::new("Person", "people")
            .field(FieldDescriptor::id_field("id").primary_key())
            .field(FieldDescriptor::string("first"))
            .field(FieldDescriptor::string("last"))
            .unique_together("first, last")
            .to_entity_definition()
            .unwrap();
        assert_eq!(definition.indexed_fields, vec!["id", "first", "last"]);
        assert_eq!(definition.unique_fields, vec!["first,last"]);
    }

    #[test]
    fn primary_key_count_must_be_one() {
        let none = ModelDefinition::new("A", "a").field(FieldDescriptor::string("x"));
        let two = ModelDefinition::new("A", "a")
            .field(FieldDescriptor::string("x").primary_key())
            .field(FieldDescriptor::string("y").primary_key());
        for definition in [none, two] {
            assert!(matches!(
                definition.to_entity_definition(),
                Err(RegistryError::Validation(_))
            ));
        }
    }

    #[test]
    fn source_serializes_with_its_kind() {
        let source = ModelSource::Script("model A : Entity {}".into());
        assert_eq!(source.kind(), "script");
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json, serde_json::json!({"script": "model A : Entity {}"}));
    }
}
