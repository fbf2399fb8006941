//! The dynamic model registry.
//!
//! Registration builds and compiles everything before taking the write lock,
//! then checks for conflicts and inserts under it, so a rejected model never
//! leaves a trace. Table reconciliation is additive and serialized per table.

use crate::config::RegistryConfig;
use crate::definition::{ModelDefinition, ModelSource, RegisteredModel};
use crate::error::{RegistryError, RegistryResult};
use crate::persist::{DefinitionStore, SavedDefinition};
use persistkit_crypto::OverflowCodec;
use persistkit_model::EntityDefinition;
use persistkit_script::{ScriptModelInfo, ScriptSandbox};
use persistkit_storage::{sync_table, Database, SchemaCompiler, StorageError, Store, TableSync};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

// ============================================================================
// Types
// ============================================================================

/// A registered model and the store serving it.
#[derive(Debug)]
pub struct RegistrationEntry {
    pub name: String,
    pub source: ModelSource,
    pub store: Store,
    pub endpoint: String,
}

impl RegistrationEntry {
    pub fn definition(&self) -> &EntityDefinition {
        self.store.definition()
    }

    /// Physical table name, after the store's prefix and suffix.
    pub fn table_name(&self) -> &str {
        self.store.table_name()
    }

    pub fn registered(&self) -> RegisteredModel {
        RegisteredModel {
            name: self.name.clone(),
            table_name: self.table_name().to_string(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// What reconciling one model's table changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub model: String,
    pub table: String,
    pub created: bool,
    pub added_columns: Vec<String>,
}

impl ReconcileReport {
    fn new(entry: &RegistrationEntry, sync: TableSync) -> Self {
        Self {
            model: entry.name.clone(),
            table: entry.table_name().to_string(),
            created: sync.created,
            added_columns: sync.added_columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of [`DynamicRegistry::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: Vec<ReconcileReport>,
    pub failed: Vec<RestoreFailure>,
}

/// A saved definition and whether it is currently registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedModel {
    pub name: String,
    pub table_name: String,
    pub description: String,
    pub kind: &'static str,
    pub is_active: bool,
}

// ============================================================================
// Registry
// ============================================================================

pub struct DynamicRegistry {
    config: RegistryConfig,
    compiler: Arc<SchemaCompiler>,
    sandbox: ScriptSandbox,
    plain: Arc<OverflowCodec>,
    /// Derived once from `config.encryption`.
    sealed: Option<Arc<OverflowCodec>>,
    definitions: DefinitionStore,
    entries: RwLock<HashMap<String, Arc<RegistrationEntry>>>,
    table_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for DynamicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRegistry")
            .field("config", &self.config)
            .field("models", &self.len())
            .finish_non_exhaustive()
    }
}

impl DynamicRegistry {
    pub fn new(config: RegistryConfig) -> RegistryResult<Self> {
        Self::with_compiler(config, Arc::new(SchemaCompiler::new()))
    }

    /// Shares an existing schema cache with the registry.
    pub fn with_compiler(
        config: RegistryConfig,
        compiler: Arc<SchemaCompiler>,
    ) -> RegistryResult<Self> {
        let sealed = match &config.encryption {
            Some(settings) => Some(Arc::new(OverflowCodec::encrypted(settings)?)),
            None => None,
        };
        let definitions = DefinitionStore::new(&compiler, &config.store_options)?;
        Ok(Self {
            sandbox: ScriptSandbox::new(config.script_limits.clone()),
            config,
            compiler,
            plain: Arc::new(OverflowCodec::plain()),
            sealed,
            definitions,
            entries: RwLock::new(HashMap::new()),
            table_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn compiler(&self) -> &Arc<SchemaCompiler> {
        &self.compiler
    }

    // ── Registration ─────────────────────────────────────────────

    /// Registers a model from a field list.
    pub fn register_fields(&self, definition: ModelDefinition) -> RegistryResult<RegisteredModel> {
        let entity = definition.to_entity_definition()?;
        self.install(entity, ModelSource::Fields(definition))
    }

    /// Registers the model declared by an entity script.
    pub fn register_script(&self, source: &str) -> RegistryResult<RegisteredModel> {
        let model = self.sandbox.extract_model(source)?;
        let entity = ModelDefinition::from_script_model(&model).to_entity_definition()?;
        self.install(entity, ModelSource::Script(source.to_string()))
    }

    /// Metadata of a script's model, without registering it.
    pub fn inspect_script(&self, source: &str) -> RegistryResult<ScriptModelInfo> {
        Ok(self.sandbox.inspect(source)?)
    }

    fn install(
        &self,
        entity: EntityDefinition,
        source: ModelSource,
    ) -> RegistryResult<RegisteredModel> {
        let name = entity.name.clone();
        let codec = if entity.encrypt {
            self.sealed.clone().ok_or_else(|| {
                RegistryError::Validation(format!(
                    "model '{name}' is encrypted but no encryption settings are configured"
                ))
            })?
        } else {
            Arc::clone(&self.plain)
        };
        let endpoint = self.config.endpoint(&entity.table_name);
        let store = Store::with_options(entity, &self.compiler, codec, &self.config.store_options)?;

        if store.table_name() == self.definitions.store().table_name() {
            return Err(RegistryError::conflict(
                &name,
                format!("table '{}' is reserved for saved definitions", store.table_name()),
            ));
        }

        let entry = Arc::new(RegistrationEntry {
            name: name.clone(),
            source,
            store,
            endpoint,
        });

        let mut entries = self.entries.write().map_err(|_| RegistryError::LockPoisoned)?;
        if entries.contains_key(&name) {
            return Err(RegistryError::conflict(&name, "a model with this name is already registered"));
        }
        if let Some(owner) = entries.values().find(|e| e.table_name() == entry.table_name()) {
            return Err(RegistryError::conflict(
                &name,
                format!("table '{}' belongs to model '{}'", owner.table_name(), owner.name),
            ));
        }
        entries.insert(name.clone(), Arc::clone(&entry));
        drop(entries);

        info!(
            model = %name,
            table = %entry.table_name(),
            source = entry.source.kind(),
            "registered dynamic model"
        );
        Ok(entry.registered())
    }

    /// Drops the in-memory registration. The table and its rows stay.
    pub fn unregister(&self, name: &str) -> RegistryResult<bool> {
        let removed = self
            .entries
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?
            .remove(name);
        if let Some(entry) = &removed {
            info!(model = %name, table = %entry.table_name(), "unregistered dynamic model");
        }
        Ok(removed.is_some())
    }

    // ── Lookup ───────────────────────────────────────────────────

    pub fn entry(&self, name: &str) -> RegistryResult<Option<Arc<RegistrationEntry>>> {
        let entries = self.entries.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(entries.get(name).cloned())
    }

    pub fn store(&self, name: &str) -> RegistryResult<Option<Store>> {
        Ok(self.entry(name)?.map(|entry| entry.store.clone()))
    }

    pub fn definition(&self, name: &str) -> RegistryResult<Option<EntityDefinition>> {
        Ok(self.entry(name)?.map(|entry| entry.definition().clone()))
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> RegistryResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Every registration, sorted by name.
    pub fn registered(&self) -> RegistryResult<Vec<RegisteredModel>> {
        let entries = self.entries.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut models: Vec<RegisteredModel> = entries.values().map(|e| e.registered()).collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => {
                warn!("registry lock poisoned; recovering");
                poisoned.into_inner().len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn require(&self, name: &str) -> RegistryResult<Arc<RegistrationEntry>> {
        self.entry(name)?
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    // ── Reconciliation ───────────────────────────────────────────

    fn table_lock(&self, table: &str) -> RegistryResult<Arc<Mutex<()>>> {
        let mut locks = self.table_locks.lock().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(table.to_string()).or_default()))
    }

    /// Creates the model's table if needed and adds any missing columns.
    pub fn reconcile(&self, conn: &Connection, name: &str) -> RegistryResult<ReconcileReport> {
        let entry = self.require(name)?;
        let lock = self.table_lock(entry.table_name())?;
        let _guard = lock.lock().map_err(|_| RegistryError::LockPoisoned)?;
        let sync = sync_table(conn, entry.store.schema())?;
        debug!(model = %name, created = sync.created, added = sync.added_columns.len(), "reconciled");
        Ok(ReconcileReport::new(&entry, sync))
    }

    /// [`DynamicRegistry::reconcile`] on the database's blocking pool.
    pub async fn reconcile_async(&self, db: &Database, name: &str) -> RegistryResult<ReconcileReport> {
        let entry = self.require(name)?;
        let lock = self.table_lock(entry.table_name())?;
        let schema = Arc::clone(entry.store.schema());
        let sync = db
            .run(move |conn| {
                let _guard = lock.lock().map_err(|_| StorageError::LockPoisoned)?;
                sync_table(conn, &schema)
            })
            .await?;
        Ok(ReconcileReport::new(&entry, sync))
    }

    // ── Saved definitions ────────────────────────────────────────

    pub fn definitions(&self) -> &DefinitionStore {
        &self.definitions
    }

    /// Validates `source` and saves it for [`DynamicRegistry::restore`].
    pub fn save_definition(
        &self,
        conn: &Connection,
        source: &ModelSource,
    ) -> RegistryResult<SavedDefinition> {
        let saved = match source {
            ModelSource::Fields(definition) => {
                definition.to_entity_definition()?;
                SavedDefinition {
                    name: definition.name.clone(),
                    table_name: definition.table_name.clone(),
                    description: definition.description.clone(),
                    source: source.clone(),
                }
            }
            ModelSource::Script(script) => {
                let info = self.sandbox.inspect(script)?;
                SavedDefinition {
                    name: info.name,
                    table_name: info.table_name,
                    description: info.description,
                    source: source.clone(),
                }
            }
        };
        self.definitions.create_table(conn)?;
        self.definitions.save(conn, &saved)?;
        debug!(model = %saved.name, source = source.kind(), "saved model definition");
        Ok(saved)
    }

    /// Deletes a saved definition. The registration, if any, is untouched.
    pub fn forget_definition(&self, conn: &Connection, name: &str) -> RegistryResult<bool> {
        self.definitions.create_table(conn)?;
        self.definitions.delete(conn, name)
    }

    /// Saved definitions that still decode, flagged by whether they are
    /// registered right now.
    pub fn saved_models(&self, conn: &Connection) -> RegistryResult<Vec<SavedModel>> {
        self.definitions.create_table(conn)?;
        let mut models = Vec::new();
        for (name, saved) in self.definitions.load_all(conn)? {
            match saved {
                Ok(saved) => models.push(SavedModel {
                    is_active: self.entry(&saved.name)?.is_some(),
                    kind: saved.source.kind(),
                    name: saved.name,
                    table_name: saved.table_name,
                    description: saved.description,
                }),
                Err(e) => warn!(model = %name, error = %e, "skipping unreadable saved definition"),
            }
        }
        Ok(models)
    }

    /// Registers every saved definition and reconciles its table.
    ///
    /// A definition that fails is logged and reported; the rest still load.
    /// Models that are already registered are only reconciled.
    pub fn restore(&self, conn: &Connection) -> RegistryResult<RestoreReport> {
        self.definitions.create_table(conn)?;
        let mut report = RestoreReport::default();
        for (name, saved) in self.definitions.load_all(conn)? {
            match saved.and_then(|saved| self.restore_one(conn, saved)) {
                Ok(reconciled) => {
                    info!(
                        model = %reconciled.model,
                        table = %reconciled.table,
                        added = reconciled.added_columns.len(),
                        "restored dynamic model"
                    );
                    report.restored.push(reconciled);
                }
                Err(e) => {
                    warn!(model = %name, error = %e, "failed to restore dynamic model");
                    report.failed.push(RestoreFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    fn restore_one(&self, conn: &Connection, saved: SavedDefinition) -> RegistryResult<ReconcileReport> {
        let name = match self.entry(&saved.name)? {
            Some(_) => saved.name,
            None => match saved.source {
                ModelSource::Fields(definition) => self.register_fields(definition)?.name,
                ModelSource::Script(script) => self.register_script(&script)?.name,
            },
        };
        self.reconcile(conn, &name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisoned_registry_reports_len_and_rejects_lookups() {
        let registry = Arc::new(DynamicRegistry::new(RegistryConfig::default()).unwrap());
        let holder = Arc::clone(&registry);
        let _ = std::thread::spawn(move || {
            let _guard = holder.entries.write().unwrap();
            panic!("poison the registry");
        })
        .join();

        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert!(matches!(registry.names(), Err(RegistryError::LockPoisoned)));
    }
}
