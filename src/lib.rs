// ============================================================================
// fieldstore Library
// ============================================================================

pub mod cache;
pub mod config;
pub mod core;
pub mod display;
pub mod entity;
pub mod field;
pub mod hooks;
pub mod module;
pub mod profile;
pub mod storage;
pub mod sync;
pub mod system;

// Re-export main types for convenience
pub use config::FieldSettings;
pub use core::{Cardinality, DataType, EntityError, EntityId, Result, RevisionId, Value};
pub use display::{DEFAULT_MODE, DisplayComponent, DisplayContext, EntityDisplay};
pub use entity::{ContentEntity, EntityStorage, EntityType, SaveStatus};
pub use field::{
    BaseFieldDefinition, FieldConfig, FieldDefinition, FieldStorageConfig, FieldStorageDefinition,
    FieldTypeDefinition, PurgeReport,
};
pub use module::{ModuleInfo, ModuleProvision};
pub use storage::{SnapshotManager, Store, StoreSnapshot};
pub use sync::{ImporterContext, StorageComparer, SyncStep};
pub use system::{FieldSystem, FieldSystemBuilder};
