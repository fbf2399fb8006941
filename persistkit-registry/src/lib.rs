//! Dynamic model registry for Persistkit.
//!
//! Models are registered at runtime either from a JSON field list or from an
//! entity script run in the [`persistkit_script`] sandbox. Both paths end in
//! an [`EntityDefinition`](persistkit_model::EntityDefinition) plus a
//! [`Store`](persistkit_storage::Store); no Rust types are generated.
//!
//! # Lifecycle
//!
//! 1. `register_fields` / `register_script` validates, compiles, and records
//!    the model under its name
//! 2. `reconcile` creates the table or adds columns the table is missing
//! 3. `save_definition` keeps the source in `model_definitions`, and
//!    `restore` replays every saved source after a restart
//! 4. `unregister` forgets the model; its table and rows stay in place

mod config;
mod definition;
mod error;
mod persist;
mod registry;

pub use config::{RegistryConfig, DEFAULT_API_PREFIX};
pub use definition::{ModelDefinition, ModelSource, RegisteredModel};
pub use error::{RegistryError, RegistryResult};
pub use persist::{DefinitionStore, SavedDefinition, DEFINITIONS_TABLE};
pub use registry::{
    DynamicRegistry, ReconcileReport, RegistrationEntry, RestoreFailure, RestoreReport, SavedModel,
};
