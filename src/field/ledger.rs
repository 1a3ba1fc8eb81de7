//! Deleted-field ledgers.
//!
//! Fields and field storages leave active configuration as soon as they are
//! deleted, but their data is purged later. Until then a snapshot of the
//! configuration is kept in state, keyed by uuid, together with the purge
//! progress so a crash between batches loses no work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::field_config::FieldConfig;
use super::storage_config::FieldStorageConfig;

pub const DELETED_FIELDS_KEY: &str = "field.field.deleted";
pub const DELETED_STORAGES_KEY: &str = "field.storage.deleted";

/// Lifecycle of a field or field storage with respect to purging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    MarkedDeleted,
    Purging,
    Gone,
}

/// How far purging of one deleted field has come.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeCursor {
    pub purged_entities: u64,
    pub batches: u32,
    pub last_batch_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedFieldEntry {
    pub field: FieldConfig,
    pub field_storage: FieldStorageConfig,
    pub state: LifecycleState,
    #[serde(default)]
    pub cursor: PurgeCursor,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedFieldEntry {
    pub fn new(field: FieldConfig, field_storage: FieldStorageConfig) -> Self {
        Self {
            field,
            field_storage,
            state: LifecycleState::MarkedDeleted,
            cursor: PurgeCursor::default(),
            deleted_at: Utc::now(),
        }
    }

    /// Records a purge batch that removed data of `entities` entities.
    pub fn advance(&mut self, entities: usize) {
        self.state = LifecycleState::Purging;
        self.cursor.purged_entities += entities as u64;
        self.cursor.batches += 1;
        self.cursor.last_batch_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedStorageEntry {
    pub field_storage: FieldStorageConfig,
    pub state: LifecycleState,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedStorageEntry {
    pub fn new(field_storage: FieldStorageConfig) -> Self {
        Self {
            field_storage,
            state: LifecycleState::MarkedDeleted,
            deleted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_entry_serializes_with_snake_case_state() {
        let storage = Arc::new(FieldStorageConfig::new("node", "field_tags", "string"));
        let mut entry = DeletedFieldEntry::new(FieldConfig::new(&storage, "page"), (*storage).clone());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["state"], "marked_deleted");

        entry.advance(3);
        entry.advance(2);
        assert_eq!(entry.state, LifecycleState::Purging);
        assert_eq!(entry.cursor.purged_entities, 5);
        assert_eq!(entry.cursor.batches, 2);
    }
}
