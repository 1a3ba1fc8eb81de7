use std::collections::BTreeMap;
use std::sync::RwLock;

use super::engine::StorageEngine;
use super::table::{Column, Condition, Row, Table, TableSchema};
use crate::core::{EntityError, Result};

/// Table storage held in process memory.
pub struct InMemoryStorage {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    fn with_table<T>(&self, name: &str, f: impl FnOnce(&Table) -> T) -> Result<T> {
        let tables = self.tables.read()?;
        let table = tables.get(name).ok_or_else(|| table_not_found(name))?;
        Ok(f(table))
    }

    fn with_table_mut<T>(&self, name: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write()?;
        let table = tables.get_mut(name).ok_or_else(|| table_not_found(name))?;
        f(table)
    }
}

fn table_not_found(name: &str) -> EntityError {
    EntityError::Storage(format!("Table '{}' not found", name))
}

impl StorageEngine for InMemoryStorage {
    fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tables = self.tables.write()?;
        let name = schema.name().to_string();
        if tables.contains_key(&name) {
            return Err(EntityError::Storage(format!("Table '{}' already exists", name)));
        }
        tables.insert(name, Table::new(schema));
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write()?;
        tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| table_not_found(name))
    }

    fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        let mut tables = self.tables.write()?;
        if tables.contains_key(to) {
            return Err(EntityError::Storage(format!("Table '{}' already exists", to)));
        }
        let mut table = tables.remove(from).ok_or_else(|| table_not_found(from))?;
        table.rename(to);
        tables.insert(to.to_string(), table);
        Ok(())
    }

    fn add_column(&self, table: &str, column: Column) -> Result<()> {
        self.with_table_mut(table, |t| t.add_column(column))
    }

    fn table_exists(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(name))
            .unwrap_or(false)
    }

    fn get_schema(&self, table: &str) -> Result<TableSchema> {
        self.with_table(table, |t| t.schema().clone())
    }

    fn list_tables(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn insert_row(&self, table: &str, row: Row) -> Result<()> {
        self.with_table_mut(table, |t| t.insert(row))
    }

    fn upsert_row(&self, table: &str, row: Row) -> Result<()> {
        self.with_table_mut(table, |t| t.upsert(row))
    }

    fn select(&self, table: &str, conditions: &[Condition]) -> Result<Vec<Row>> {
        self.with_table(table, |t| t.select(conditions))
    }

    fn update_rows(&self, table: &str, conditions: &[Condition], values: &Row) -> Result<usize> {
        self.with_table_mut(table, |t| t.update(conditions, values))
    }

    fn delete_rows(&self, table: &str, conditions: &[Condition]) -> Result<usize> {
        self.with_table_mut(table, |t| Ok(t.delete(conditions)))
    }

    fn count_rows(&self, table: &str, conditions: &[Condition]) -> Result<usize> {
        self.with_table(table, |t| t.count(conditions))
    }

    fn export_tables(&self) -> Result<BTreeMap<String, Table>> {
        Ok(self.tables.read()?.clone())
    }

    fn restore_tables(&self, tables: BTreeMap<String, Table>) -> Result<()> {
        *self.tables.write()? = tables;
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
