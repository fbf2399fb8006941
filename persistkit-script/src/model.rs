//! Models declared by a script and the rules for picking the one to register.

use crate::error::{ScriptError, ScriptResult};
use persistkit_model::FieldDescriptor;
use serde::Serialize;

/// Name of the built-in base model every entity derives from.
pub const BASE_MODEL: &str = "Entity";

/// A `model` declaration after evaluation, with inherited members merged in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptModel {
    pub name: String,
    /// Direct parent as written (`Entity`, another model, or none).
    pub base: Option<String>,
    /// Parent chain, nearest first. Ends with `Entity` for entity models.
    pub ancestors: Vec<String>,
    pub table_name: Option<String>,
    pub primary_key: Option<String>,
    pub indexed: Vec<String>,
    pub unique: Vec<String>,
    pub encrypt: bool,
    pub description: String,
    pub fields: Vec<FieldDescriptor>,
}

impl ScriptModel {
    pub(crate) fn root(name: &str, base: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            base: base.map(str::to_string),
            ancestors: base.map(|b| vec![b.to_string()]).unwrap_or_default(),
            table_name: None,
            primary_key: None,
            indexed: Vec::new(),
            unique: Vec::new(),
            encrypt: false,
            description: String::new(),
            fields: Vec::new(),
        }
    }

    /// Starts a child declaration from a copy of `parent`.
    pub(crate) fn derive(name: &str, parent: &ScriptModel) -> Self {
        let mut ancestors = vec![parent.name.clone()];
        ancestors.extend(parent.ancestors.iter().cloned());
        Self {
            name: name.to_string(),
            base: Some(parent.name.clone()),
            ancestors,
            ..parent.clone()
        }
    }

    pub fn is_entity(&self) -> bool {
        self.ancestors.iter().any(|a| a == BASE_MODEL)
    }

    /// An entity subtype with a table: eligible for registration.
    pub fn qualifies(&self) -> bool {
        self.is_entity() && self.table_name.is_some()
    }

    pub fn derives_from(&self, other: &str) -> bool {
        self.ancestors.iter().any(|a| a == other)
    }

    pub(crate) fn set_field(&mut self, field: FieldDescriptor) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Field descriptors with the model-level `primary_key`, `indexed`, and
    /// single-field `unique` lists folded into their flags.
    pub fn descriptors(&self) -> Vec<FieldDescriptor> {
        self.fields
            .iter()
            .cloned()
            .map(|mut field| {
                if self.primary_key.as_deref() == Some(field.name.as_str()) {
                    field.is_primary_key = true;
                    field.required = true;
                } else if self.primary_key.is_some() {
                    field.is_primary_key = false;
                }
                if self.indexed.contains(&field.name) {
                    field.is_indexed = true;
                }
                if self.unique.contains(&field.name) {
                    field.is_unique = true;
                }
                field
            })
            .collect()
    }

    /// Multi-field unique groups (`"a,b"`), which have no per-field flag.
    pub fn composite_unique(&self) -> Vec<String> {
        self.unique
            .iter()
            .filter(|group| group.contains(','))
            .cloned()
            .collect()
    }

    pub fn info(&self) -> ScriptModelInfo {
        ScriptModelInfo {
            name: self.name.clone(),
            table_name: self.table_name.clone().unwrap_or_default(),
            description: self.description.clone(),
        }
    }

    /// Every name in `primary_key`, `indexed`, and `unique` must be a
    /// declared field.
    fn check_references(&self) -> ScriptResult<()> {
        let declared = |name: &str| self.fields.iter().any(|f| f.name == name);
        let referenced = self
            .primary_key
            .iter()
            .map(|pk| ("primary_key", pk.as_str()))
            .chain(self.indexed.iter().map(|n| ("indexed", n.as_str())))
            .chain(
                self.unique
                    .iter()
                    .flat_map(|group| group.split(','))
                    .map(|n| ("unique", n.trim())),
            );
        for (list, name) in referenced {
            if !declared(name) {
                return Err(ScriptError::Runtime(format!(
                    "model '{}' lists undeclared field '{name}' in {list}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Metadata of a script's model, extracted without registering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptModelInfo {
    pub name: String,
    pub table_name: String,
    pub description: String,
}

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptOutput {
    /// Declared models, in declaration order.
    pub models: Vec<ScriptModel>,
    pub fuel_used: u64,
}

impl ScriptOutput {
    /// Picks the model to register.
    ///
    /// With several qualifying models the unique most-derived one wins: the
    /// one no other qualifying model inherits from.
    pub fn resolve(self) -> ScriptResult<ScriptModel> {
        let qualifying: Vec<&ScriptModel> = self.models.iter().filter(|m| m.qualifies()).collect();
        let leaves: Vec<&ScriptModel> = qualifying
            .iter()
            .copied()
            .filter(|m| !qualifying.iter().any(|other| other.derives_from(&m.name)))
            .collect();
        let chosen = match (qualifying.len(), leaves.as_slice()) {
            (0, _) => return Err(ScriptError::NoModel),
            (_, [single]) => (*single).clone(),
            (_, many) => {
                return Err(ScriptError::Ambiguous(
                    many.iter().map(|m| m.name.clone()).collect(),
                ));
            }
        };
        chosen.check_references()?;
        Ok(chosen)
    }
}
