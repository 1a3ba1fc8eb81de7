pub mod config;
pub mod engine;
pub mod memory;
pub mod persistence;
pub mod schema;
pub mod state;
pub mod store;
pub mod table;

pub use config::ConfigStore;
pub use engine::{StorageEngine, transaction};
pub use memory::InMemoryStorage;
pub use persistence::{SnapshotManager, StoreSnapshot};
pub use schema::{SchemaChange, SchemaManager, StorageSchemaRecord, TableMapping};
pub use state::StateStore;
pub use store::Store;
pub use table::{Column, Condition, Row, Table, TableSchema};
