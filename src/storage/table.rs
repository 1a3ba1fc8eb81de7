use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{DataType, EntityError, Result, Value};

/// A row keyed by column name.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(EntityError::Storage(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(EntityError::Storage(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, primary_key: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn column_names(&self) -> BTreeSet<&str> {
        self.columns.iter().map(|col| col.name.as_str()).collect()
    }
}

/// Conjunctive filter element: `column IN (values)`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub values: Vec<Value>,
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            values: vec![value.into()],
        }
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            values,
        }
    }

    fn matches(&self, row: &Row) -> bool {
        let value = row.get(&self.column).unwrap_or(&Value::Null);
        self.values.iter().any(|candidate| candidate == value)
    }
}

fn matches_all(conditions: &[Condition], row: &Row) -> bool {
    conditions.iter().all(|condition| condition.matches(row))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<Vec<Value>, Row>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rename(&mut self, new_name: impl Into<String>) {
        self.schema.name = new_name.into();
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.schema.has_column(&column.name) {
            return Err(EntityError::Storage(format!(
                "Column '{}' already exists in table '{}'",
                column.name, self.schema.name
            )));
        }
        if !column.nullable && !self.rows.is_empty() {
            return Err(EntityError::Storage(format!(
                "Cannot add NOT NULL column '{}' to non-empty table '{}'",
                column.name, self.schema.name
            )));
        }
        for row in self.rows.values_mut() {
            row.insert(column.name.clone(), Value::Null);
        }
        self.schema.columns.push(column);
        Ok(())
    }

    pub fn insert(&mut self, row: Row) -> Result<()> {
        let row = self.normalize_row(row)?;
        let key = self.key_of(&row);
        if self.rows.contains_key(&key) {
            return Err(EntityError::Storage(format!(
                "Integrity constraint violation: duplicate primary key {:?} in table '{}'",
                key, self.schema.name
            )));
        }
        self.rows.insert(key, row);
        Ok(())
    }

    /// Inserts or replaces the row with the same primary key.
    pub fn upsert(&mut self, row: Row) -> Result<()> {
        let row = self.normalize_row(row)?;
        let key = self.key_of(&row);
        self.rows.insert(key, row);
        Ok(())
    }

    pub fn select(&self, conditions: &[Condition]) -> Vec<Row> {
        self.rows
            .values()
            .filter(|row| matches_all(conditions, row))
            .cloned()
            .collect()
    }

    pub fn count(&self, conditions: &[Condition]) -> usize {
        self.rows
            .values()
            .filter(|row| matches_all(conditions, row))
            .count()
    }

    pub fn delete(&mut self, conditions: &[Condition]) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| !matches_all(conditions, row));
        before - self.rows.len()
    }

    /// Overwrites `values` on every matching row, re-keying rows whose primary key changes.
    pub fn update(&mut self, conditions: &[Condition], values: &Row) -> Result<usize> {
        for (name, value) in values {
            let column = self.schema.get_column(name).ok_or_else(|| {
                EntityError::Storage(format!(
                    "Column '{}' not found in table '{}'",
                    name, self.schema.name
                ))
            })?;
            column.validate(value)?;
        }

        let keys: Vec<Vec<Value>> = self
            .rows
            .iter()
            .filter(|(_, row)| matches_all(conditions, row))
            .map(|(key, _)| key.clone())
            .collect();

        let mut updated = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(mut row) = self.rows.remove(key) {
                for (name, value) in values {
                    row.insert(name.clone(), value.clone());
                }
                updated.push(row);
            }
        }
        for row in updated {
            let key = self.key_of(&row);
            self.rows.insert(key, row);
        }
        Ok(keys.len())
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.schema
            .primary_key
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn normalize_row(&self, mut row: Row) -> Result<Row> {
        if let Some(unknown) = row.keys().find(|name| !self.schema.has_column(name)) {
            return Err(EntityError::Storage(format!(
                "Column '{}' not found in table '{}'",
                unknown, self.schema.name
            )));
        }
        for column in &self.schema.columns {
            let value = row.entry(column.name.clone()).or_insert(Value::Null);
            column.validate(value)?;
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::new(TableSchema::new(
            "node__body",
            vec![
                Column::new("entity_id", DataType::Integer).not_null(),
                Column::new("delta", DataType::Integer).not_null(),
                Column::new("bundle", DataType::Text),
                Column::new("body_value", DataType::Text),
            ],
            vec!["entity_id", "delta"],
        ))
    }

    fn row(id: i64, delta: i64, bundle: &str, value: &str) -> Row {
        let mut row = Row::new();
        row.insert("entity_id".into(), Value::Integer(id));
        row.insert("delta".into(), Value::Integer(delta));
        row.insert("bundle".into(), bundle.into());
        row.insert("body_value".into(), value.into());
        row
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut table = sample_table();
        table.insert(row(1, 0, "page", "a")).unwrap();
        let err = table.insert(row(1, 0, "page", "b")).unwrap_err();
        assert!(err.is_storage_failure());
        table.upsert(row(1, 0, "page", "b")).unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_select_update_delete_with_conditions() {
        let mut table = sample_table();
        table.insert(row(1, 0, "page", "a")).unwrap();
        table.insert(row(1, 1, "page", "b")).unwrap();
        table.insert(row(2, 0, "article", "c")).unwrap();

        assert_eq!(table.select(&[Condition::eq("bundle", "page")]).len(), 2);

        let mut set = Row::new();
        set.insert("bundle".into(), "landing".into());
        assert_eq!(table.update(&[Condition::eq("bundle", "page")], &set).unwrap(), 2);
        assert_eq!(table.count(&[Condition::eq("bundle", "landing")]), 2);

        let removed = table.delete(&[Condition::is_in(
            "entity_id",
            vec![Value::Integer(1), Value::Integer(5)],
        )]);
        assert_eq!(removed, 2);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_add_column_backfills_null() {
        let mut table = sample_table();
        table.insert(row(1, 0, "page", "a")).unwrap();
        table
            .add_column(Column::new("body_format", DataType::Text))
            .unwrap();
        let rows = table.select(&[]);
        assert_eq!(rows[0].get("body_format"), Some(&Value::Null));
        assert!(table
            .add_column(Column::new("strict", DataType::Text).not_null())
            .is_err());
    }

    #[test]
    fn test_not_null_and_type_checks() {
        let mut table = sample_table();
        let mut bad = row(1, 0, "page", "a");
        bad.insert("delta".into(), Value::Null);
        assert!(table.insert(bad).is_err());

        let mut wrong_type = row(1, 0, "page", "a");
        wrong_type.insert("body_value".into(), Value::Integer(3));
        assert!(table.insert(wrong_type).is_err());
    }
}
