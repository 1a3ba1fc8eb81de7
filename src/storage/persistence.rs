//! Whole-store snapshots for the maintenance tooling.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;

use super::table::Table;
use crate::core::{EntityError, Result};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub config: BTreeMap<String, JsonValue>,
    pub state: BTreeMap<String, JsonValue>,
    pub tables: BTreeMap<String, Table>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    pub table_count: usize,
    pub config_count: usize,
}

impl StoreSnapshot {
    pub fn new(
        config: BTreeMap<String, JsonValue>,
        state: BTreeMap<String, JsonValue>,
        tables: BTreeMap<String, Table>,
    ) -> Self {
        let metadata = SnapshotMetadata {
            created_at: Utc::now(),
            row_count: tables.values().map(Table::row_count).sum(),
            table_count: tables.len(),
            config_count: config.len(),
        };

        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            config,
            state,
            tables,
            metadata,
        }
    }
}

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Writes the snapshot through a temp file in the same directory, then renames it into place.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let dir = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            EntityError::IoError(format!("Failed to create snapshot directory: {}", e))
        })?;

        let serialized = rmp_serde::to_vec_named(snapshot).map_err(|e| {
            EntityError::Serialization(format!("Failed to serialize snapshot: {}", e))
        })?;

        let temp = NamedTempFile::new_in(&dir)
            .map_err(|e| EntityError::IoError(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer
                .write_all(&serialized)
                .map_err(|e| EntityError::IoError(format!("Failed to write snapshot: {}", e)))?;
            writer
                .flush()
                .map_err(|e| EntityError::IoError(format!("Failed to flush snapshot: {}", e)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| EntityError::IoError(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| EntityError::IoError(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| EntityError::IoError(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| EntityError::IoError(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data).map_err(|e| {
            EntityError::Serialization(format!("Failed to deserialize snapshot: {}", e))
        })?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(EntityError::Serialization(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};
    use crate::storage::table::{Column, Row, TableSchema};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path().join("site.snapshot"));
        assert!(manager.load().unwrap().is_none());

        let mut table = Table::new(TableSchema::new(
            "node",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("bundle", DataType::Text),
            ],
            vec!["id"],
        ));
        let mut row = Row::new();
        row.insert("id".into(), Value::Integer(1));
        row.insert("bundle".into(), "page".into());
        table.insert(row).unwrap();

        let mut tables = BTreeMap::new();
        tables.insert("node".to_string(), table);
        let mut config = BTreeMap::new();
        config.insert("field.settings".to_string(), json!({"purge_batch_size": 10}));

        manager
            .save(&StoreSnapshot::new(config, BTreeMap::new(), tables))
            .unwrap();
        assert!(manager.exists());

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.metadata.table_count, 1);
        assert_eq!(loaded.metadata.row_count, 1);
        assert_eq!(loaded.config["field.settings"]["purge_batch_size"], json!(10));
        assert_eq!(loaded.tables["node"].row_count(), 1);
    }
}
