use crate::definition::EntityDefinition;
use crate::error::{ModelError, ModelResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// A Rust type persisted through a fixed [`EntityDefinition`].
///
/// The serde representation of the type is the overflow payload, so every
/// field named by the definition must serialize under the same name.
pub trait PersistedObject: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn definition() -> EntityDefinition;
}

/// Registry of statically defined entities, keyed by table name.
///
/// Used at startup to create every known table in one pass. Owned by the
/// application; there is no global instance.
#[derive(Debug, Default)]
pub struct Catalog {
    definitions: RwLock<BTreeMap<String, Arc<EntityDefinition>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition. Re-registering an identical definition is a no-op;
    /// a different definition for the same table is rejected.
    pub fn register(&self, definition: EntityDefinition) -> ModelResult<Arc<EntityDefinition>> {
        definition.validate()?;
        let mut definitions = self.definitions.write().map_err(|_| ModelError::LockPoisoned)?;
        if let Some(existing) = definitions.get(&definition.table_name) {
            if **existing == definition {
                return Ok(Arc::clone(existing));
            }
            return Err(ModelError::DuplicateTable(definition.table_name));
        }
        let definition = Arc::new(definition);
        definitions.insert(definition.table_name.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    pub fn register_type<T: PersistedObject>(&self) -> ModelResult<Arc<EntityDefinition>> {
        self.register(T::definition())
    }

    pub fn get_by_table_name(&self, table_name: &str) -> Option<Arc<EntityDefinition>> {
        self.read().get(table_name).cloned()
    }

    /// All definitions, ordered by table name.
    pub fn all(&self) -> Vec<Arc<EntityDefinition>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // Inserts never leave the map half-updated; infallible accessors recover.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<EntityDefinition>>> {
        self.definitions.read().unwrap_or_else(|poisoned| {
            warn!("catalog lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<EntityDefinition>>> {
        self.definitions.write().unwrap_or_else(|poisoned| {
            warn!("catalog lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldDescriptor;

    #[test]
    fn poisoned_catalog_stays_readable() {
        let catalog = Arc::new(Catalog::new());
        let def = EntityDefinition::builder("Note", "notes")
            .field(FieldDescriptor::id_field("id").primary_key())
            .build()
            .unwrap();
        catalog.register(def.clone()).unwrap();

        let holder = Arc::clone(&catalog);
        let _ = std::thread::spawn(move || {
            let _guard = holder.definitions.write().unwrap();
            panic!("poison the catalog");
        })
        .join();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.all().len(), 1);
        assert!(catalog.get_by_table_name("notes").is_some());
        assert!(matches!(catalog.register(def), Err(ModelError::LockPoisoned)));
        catalog.clear();
        assert!(catalog.is_empty());
    }
}
