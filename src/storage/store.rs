use std::sync::Arc;

use super::config::ConfigStore;
use super::engine::StorageEngine;
use super::memory::InMemoryStorage;
use super::persistence::StoreSnapshot;
use super::state::StateStore;
use crate::core::Result;

/// Backing store shared by every service: entity tables, active configuration and state.
#[derive(Clone)]
pub struct Store {
    tables: Arc<dyn StorageEngine>,
    config: Arc<ConfigStore>,
    state: Arc<StateStore>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    pub fn new(tables: Arc<dyn StorageEngine>) -> Self {
        Self {
            tables,
            config: Arc::new(ConfigStore::new()),
            state: Arc::new(StateStore::new()),
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let tables = InMemoryStorage::new();
        tables.restore_tables(snapshot.tables)?;
        Ok(Self {
            tables: Arc::new(tables),
            config: Arc::new(ConfigStore::from_objects(snapshot.config)),
            state: Arc::new(StateStore::from_values(snapshot.state)),
        })
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot::new(
            self.config.export()?,
            self.state.export()?,
            self.tables.export_tables()?,
        ))
    }

    pub fn tables(&self) -> &dyn StorageEngine {
        self.tables.as_ref()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }
}
