//! Entity types, bundles and content entity storage.

pub mod bundle;
pub mod content;
pub mod entity_type;
pub mod manager;
pub mod storage;

pub use bundle::{BundleInfo, BundleLabels, BundleRecord};
pub use content::{ContentEntity, FieldValues};
pub use entity_type::{EntityKeys, EntityType};
pub use manager::EntityTypeManager;
pub use storage::{EntityStorage, SaveStatus, StorageContext};
