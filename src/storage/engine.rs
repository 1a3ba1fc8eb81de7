use std::collections::BTreeMap;

use super::table::{Column, Condition, Row, Table, TableSchema};
use crate::core::Result;

/// Storage engine trait - allows pluggable storage backends
pub trait StorageEngine: Send + Sync {
    /// Create a new table with the given schema
    fn create_table(&self, schema: TableSchema) -> Result<()>;

    /// Drop a table and all of its rows
    fn drop_table(&self, name: &str) -> Result<()>;

    /// Rename a table, keeping its rows
    fn rename_table(&self, from: &str, to: &str) -> Result<()>;

    /// Add a nullable column to an existing table
    fn add_column(&self, table: &str, column: Column) -> Result<()>;

    /// Check if a table exists
    fn table_exists(&self, name: &str) -> bool;

    /// Get the schema for a table
    fn get_schema(&self, table: &str) -> Result<TableSchema>;

    /// List all table names
    fn list_tables(&self) -> Vec<String>;

    /// Insert a row, failing on a duplicate primary key
    fn insert_row(&self, table: &str, row: Row) -> Result<()>;

    /// Insert or replace a row by primary key
    fn upsert_row(&self, table: &str, row: Row) -> Result<()>;

    /// Rows matching every condition
    fn select(&self, table: &str, conditions: &[Condition]) -> Result<Vec<Row>>;

    /// Overwrite `values` on matching rows; returns the number of rows touched
    fn update_rows(&self, table: &str, conditions: &[Condition], values: &Row) -> Result<usize>;

    /// Delete matching rows; returns the number removed
    fn delete_rows(&self, table: &str, conditions: &[Condition]) -> Result<usize>;

    /// Count matching rows
    fn count_rows(&self, table: &str, conditions: &[Condition]) -> Result<usize>;

    /// Copy of every table (for snapshots and rollback)
    fn export_tables(&self) -> Result<BTreeMap<String, Table>>;

    /// Replace every table with the given set
    fn restore_tables(&self, tables: BTreeMap<String, Table>) -> Result<()>;
}

/// Runs `work` atomically: on error every table is restored to its prior state.
pub fn transaction<T>(
    engine: &dyn StorageEngine,
    work: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let before = engine.export_tables()?;
    match work() {
        Ok(value) => Ok(value),
        Err(err) => {
            log::debug!("rolling back storage transaction: {}", err);
            engine.restore_tables(before)?;
            Err(err)
        }
    }
}
