//! Field types, field configuration and the deleted-field lifecycle.

pub mod bundle;
pub mod definition;
pub mod field_config;
pub mod field_type;
pub mod ledger;
pub mod manager;
pub mod purge;
pub mod registry;
pub mod repository;
pub mod storage_config;
pub mod sync;

pub use bundle::{DisplayBundleHandler, FieldBundleHandler};
pub use definition::{BaseFieldDefinition, FieldDefinition, FieldStorageDefinition};
pub use field_config::FieldConfig;
pub use field_type::{ColumnDefinition, FieldTypeDefinition, FieldTypeManager};
pub use ledger::{DeletedFieldEntry, DeletedStorageEntry, LifecycleState, PurgeCursor};
pub use manager::FieldConfigManager;
pub use purge::{PurgeCoordinator, PurgeReport};
pub use registry::{EntityFieldManager, FieldDefinitions, FieldMapEntry};
pub use repository::FieldConfigRepository;
pub use storage_config::FieldStorageConfig;
pub use sync::{
    FieldStoragePurger, FieldSyncHandler, active_field_storages_to_purge, field_storages_to_purge,
};
