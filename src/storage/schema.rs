//! Physical table layout of entity types and field storages.
//!
//! Single-valued base fields live in the shared tables of their entity type
//! (`node`, `node_field_data`, `node_revision`, `node_field_revision`).
//! Configurable and multi-valued fields get dedicated tables
//! (`node__field_tags`, `node_revision__field_tags`) with one row per item.
//! Deleting a field storage renames its dedicated tables to
//! `field_deleted_data_<hash>` / `field_deleted_revision_<hash>` so the data
//! stays purgeable after the storage leaves active configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::engine::transaction;
use super::store::Store;
use super::table::{Column, Condition, Row, TableSchema};
use crate::core::{Cardinality, DataType, EntityError, Result, Value};
use crate::entity::{EntityType, EntityTypeManager};
use crate::field::{ColumnDefinition, FieldStorageDefinition, FieldTypeManager};

/// State key holding one [`StorageSchemaRecord`] per storage definition.
pub const SCHEMA_STATE_KEY: &str = "entity.storage_schema.sql";

pub const COLUMN_BUNDLE: &str = "bundle";
pub const COLUMN_DELETED: &str = "deleted";
pub const COLUMN_ENTITY_ID: &str = "entity_id";
pub const COLUMN_REVISION_ID: &str = "revision_id";
pub const COLUMN_LANGCODE: &str = "langcode";
pub const COLUMN_DELTA: &str = "delta";
pub const COLUMN_DEFAULT_LANGCODE: &str = "default_langcode";
pub const COLUMN_REVISION_CREATED: &str = "revision_created";

/// Installed schema of one storage definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSchemaRecord {
    pub entity_type: String,
    pub field_name: String,
    pub field_type: String,
    pub cardinality: Cardinality,
    pub columns: BTreeMap<String, DataType>,
    pub dedicated: bool,
    pub deleted: bool,
    pub version: u32,
    pub changes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of comparing an installed storage definition with its update.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    None,
    /// New nullable columns on the existing tables
    Additive(Vec<ColumnDefinition>),
    /// Cardinality change that every stored delta still fits
    Cardinality(Cardinality),
    /// Tables are empty and get created again for the new layout
    Recreate,
    /// Would alter stored data; refused
    RequiresMigration(String),
}

impl SchemaChange {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One field property mapped onto a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    pub property: String,
    pub column: String,
    pub data_type: DataType,
}

/// Dedicated table pair of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedicatedTables {
    pub data: String,
    pub revision: Option<String>,
    pub columns: Vec<MappedColumn>,
}

/// Where each field of an entity type is stored.
#[derive(Debug, Clone)]
pub struct TableMapping {
    entity_type_id: String,
    base_table: String,
    data_table: String,
    revision_table: Option<String>,
    revision_data_table: Option<String>,
    langcode_column: String,
    shared: IndexMap<String, Vec<MappedColumn>>,
    dedicated: IndexMap<String, DedicatedTables>,
}

impl TableMapping {
    pub fn new(
        entity_type: &EntityType,
        definitions: &IndexMap<String, Arc<dyn FieldStorageDefinition>>,
        field_types: &FieldTypeManager,
    ) -> Result<Self> {
        let et = entity_type.id();
        let mut mapping = Self {
            entity_type_id: et.to_string(),
            base_table: et.to_string(),
            data_table: format!("{}_field_data", et),
            revision_table: entity_type
                .is_revisionable()
                .then(|| format!("{}_revision", et)),
            revision_data_table: entity_type
                .is_revisionable()
                .then(|| format!("{}_field_revision", et)),
            langcode_column: entity_type
                .langcode_key_name()
                .unwrap_or(COLUMN_LANGCODE)
                .to_string(),
            shared: IndexMap::new(),
            dedicated: IndexMap::new(),
        };

        for (name, definition) in definitions {
            if entity_type.is_key_field(name) || definition.is_deleted() {
                continue;
            }
            let columns = field_types.definition(definition.field_type())?.columns.clone();
            if Self::requires_dedicated_table_storage(definition.as_ref()) {
                let mapped = columns
                    .iter()
                    .map(|column| MappedColumn {
                        property: column.name.clone(),
                        column: Self::dedicated_column_name(name, &column.name),
                        data_type: column.data_type,
                    })
                    .collect();
                mapping.dedicated.insert(
                    name.clone(),
                    DedicatedTables {
                        data: Self::dedicated_data_table_name(definition.as_ref()),
                        revision: entity_type
                            .is_revisionable()
                            .then(|| Self::dedicated_revision_table_name(definition.as_ref())),
                        columns: mapped,
                    },
                );
            } else {
                let count = columns.len();
                let mapped = columns
                    .iter()
                    .map(|column| MappedColumn {
                        property: column.name.clone(),
                        column: Self::shared_column_name(name, &column.name, count),
                        data_type: column.data_type,
                    })
                    .collect();
                mapping.shared.insert(name.clone(), mapped);
            }
        }
        Ok(mapping)
    }

    /// Configurable fields and multi-valued base fields need their own tables.
    pub fn requires_dedicated_table_storage(definition: &dyn FieldStorageDefinition) -> bool {
        !definition.is_base_field() || definition.cardinality().is_multiple()
    }

    pub fn shared_column_name(field_name: &str, property: &str, column_count: usize) -> String {
        if column_count == 1 {
            field_name.to_string()
        } else {
            format!("{}__{}", field_name, property)
        }
    }

    pub fn dedicated_column_name(field_name: &str, property: &str) -> String {
        format!("{}_{}", field_name, property)
    }

    pub fn dedicated_data_table_name(definition: &dyn FieldStorageDefinition) -> String {
        if definition.is_deleted() {
            format!("field_deleted_data_{}", storage_hash(definition))
        } else {
            format!("{}__{}", definition.target_entity_type_id(), definition.name())
        }
    }

    pub fn dedicated_revision_table_name(definition: &dyn FieldStorageDefinition) -> String {
        if definition.is_deleted() {
            format!("field_deleted_revision_{}", storage_hash(definition))
        } else {
            format!(
                "{}_revision__{}",
                definition.target_entity_type_id(),
                definition.name()
            )
        }
    }

    pub fn entity_type_id(&self) -> &str {
        &self.entity_type_id
    }

    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    pub fn data_table(&self) -> &str {
        &self.data_table
    }

    pub fn revision_table(&self) -> Option<&str> {
        self.revision_table.as_deref()
    }

    pub fn revision_data_table(&self) -> Option<&str> {
        self.revision_data_table.as_deref()
    }

    pub fn langcode_column(&self) -> &str {
        &self.langcode_column
    }

    pub fn shared_columns(&self, field_name: &str) -> Option<&[MappedColumn]> {
        self.shared.get(field_name).map(Vec::as_slice)
    }

    pub fn dedicated_tables(&self, field_name: &str) -> Option<&DedicatedTables> {
        self.dedicated.get(field_name)
    }

    pub fn shared_fields(&self) -> impl Iterator<Item = (&String, &Vec<MappedColumn>)> {
        self.shared.iter()
    }

    pub fn dedicated_fields(&self) -> impl Iterator<Item = (&String, &DedicatedTables)> {
        self.dedicated.iter()
    }
}

fn storage_hash(definition: &dyn FieldStorageDefinition) -> String {
    definition
        .unique_storage_identifier()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(10)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Creates and alters the tables behind entity types and field storages.
pub struct SchemaManager {
    store: Store,
    entity_types: Arc<EntityTypeManager>,
    field_types: Arc<FieldTypeManager>,
}

impl SchemaManager {
    pub fn new(
        store: Store,
        entity_types: Arc<EntityTypeManager>,
        field_types: Arc<FieldTypeManager>,
    ) -> Self {
        Self {
            store,
            entity_types,
            field_types,
        }
    }

    pub fn table_mapping(
        &self,
        entity_type: &EntityType,
        definitions: &IndexMap<String, Arc<dyn FieldStorageDefinition>>,
    ) -> Result<TableMapping> {
        TableMapping::new(entity_type, definitions, &self.field_types)
    }

    /// Creates the shared tables of an entity type and the dedicated tables
    /// of its multi-valued base fields. Existing tables only gain missing
    /// columns, so installing twice is harmless.
    pub fn install_entity_type(&self, entity_type: &EntityType) -> Result<()> {
        let mut definitions: IndexMap<String, Arc<dyn FieldStorageDefinition>> = IndexMap::new();
        for (name, definition) in entity_type.base_field_definitions() {
            definitions.insert(
                name.clone(),
                Arc::clone(definition) as Arc<dyn FieldStorageDefinition>,
            );
        }
        let mapping = self.table_mapping(entity_type, &definitions)?;

        transaction(self.store.tables(), || {
            for schema in self.shared_table_schemas(entity_type, &mapping) {
                self.ensure_table(schema)?;
            }
            for (name, tables) in mapping.dedicated_fields() {
                self.ensure_table(dedicated_schema(&tables.data, &tables.columns, false))?;
                if let Some(revision) = &tables.revision {
                    self.ensure_table(dedicated_schema(revision, &tables.columns, true))?;
                }
                log::debug!("dedicated tables ready for base field {}.{}", entity_type.id(), name);
            }
            Ok(())
        })?;

        for definition in definitions.values() {
            if !entity_type.is_key_field(definition.name()) {
                self.record_installed(definition.as_ref(), "installed")?;
            }
        }
        log::info!("installed storage for entity type {}", entity_type.id());
        Ok(())
    }

    /// Creates the dedicated tables of a new field storage.
    pub fn on_field_storage_create(&self, storage: &dyn FieldStorageDefinition) -> Result<()> {
        let entity_type = self.entity_types.definition(storage.target_entity_type_id())?;
        let columns = self.mapped_columns(storage, storage.field_type())?;
        let data = TableMapping::dedicated_data_table_name(storage);
        if self.store.tables().table_exists(&data) {
            return Err(EntityError::Schema(format!(
                "Table '{}' already exists",
                data
            )));
        }

        transaction(self.store.tables(), || {
            self.store
                .tables()
                .create_table(dedicated_schema(&data, &columns, false))?;
            if entity_type.is_revisionable() {
                let revision = TableMapping::dedicated_revision_table_name(storage);
                self.store
                    .tables()
                    .create_table(dedicated_schema(&revision, &columns, true))?;
            }
            Ok(())
        })?;

        self.record_installed(storage, "created")?;
        log::debug!(
            "created dedicated tables for {}.{}",
            storage.target_entity_type_id(),
            storage.name()
        );
        Ok(())
    }

    /// Compares an installed storage definition with its update.
    pub fn plan_change(
        &self,
        original: &dyn FieldStorageDefinition,
        updated: &dyn FieldStorageDefinition,
    ) -> Result<SchemaChange> {
        if original.name() != updated.name()
            || original.target_entity_type_id() != updated.target_entity_type_id()
        {
            return Err(EntityError::Validation(format!(
                "Cannot change the entity type or name of field storage {}.{}",
                original.target_entity_type_id(),
                original.name()
            )));
        }
        let id = format!("{}.{}", original.target_entity_type_id(), original.name());

        let installed: BTreeMap<String, DataType> = match self
            .schema_record(&original.unique_storage_identifier())?
        {
            Some(record) => record.columns,
            None => self
                .field_types
                .definition(original.field_type())?
                .columns
                .iter()
                .map(|column| (column.name.clone(), column.data_type))
                .collect(),
        };
        let wanted = self.field_types.definition(updated.field_type())?.columns.clone();
        let has_data = self.count_field_data(original, true)? > 0;

        if original.field_type() != updated.field_type() {
            return Ok(if has_data {
                SchemaChange::RequiresMigration(format!(
                    "Cannot change the field type of {} while it holds data",
                    id
                ))
            } else {
                SchemaChange::Recreate
            });
        }

        let altered = installed.iter().any(|(name, data_type)| {
            wanted
                .iter()
                .find(|column| &column.name == name)
                .is_none_or(|column| column.data_type != *data_type)
        });
        if altered {
            return Ok(if has_data {
                SchemaChange::RequiresMigration(format!(
                    "Cannot alter existing columns of {} while it holds data",
                    id
                ))
            } else {
                SchemaChange::Recreate
            });
        }

        let added: Vec<ColumnDefinition> = wanted
            .into_iter()
            .filter(|column| !installed.contains_key(&column.name))
            .collect();
        if !added.is_empty() {
            return Ok(SchemaChange::Additive(added));
        }

        if original.cardinality() != updated.cardinality() {
            if let Cardinality::Limited(limit) = updated.cardinality() {
                if let Some(max_delta) = self.max_delta(original)? {
                    if max_delta >= i64::from(limit) {
                        return Ok(SchemaChange::RequiresMigration(format!(
                            "Cannot reduce the cardinality of {} to {}: items with delta {} exist",
                            id, limit, max_delta
                        )));
                    }
                }
            }
            return Ok(SchemaChange::Cardinality(updated.cardinality()));
        }

        Ok(SchemaChange::None)
    }

    /// Applies a planned change atomically and records the new schema version.
    pub fn apply_change(
        &self,
        updated: &dyn FieldStorageDefinition,
        change: &SchemaChange,
    ) -> Result<()> {
        let data = TableMapping::dedicated_data_table_name(updated);
        let revision = TableMapping::dedicated_revision_table_name(updated);
        let has_revision = self.store.tables().table_exists(&revision);

        let summary = match change {
            SchemaChange::None => return Ok(()),
            SchemaChange::RequiresMigration(reason) => {
                return Err(EntityError::Schema(reason.clone()));
            }
            SchemaChange::Additive(columns) => {
                transaction(self.store.tables(), || {
                    for column in columns {
                        let name = TableMapping::dedicated_column_name(updated.name(), &column.name);
                        self.store
                            .tables()
                            .add_column(&data, Column::new(name.clone(), column.data_type))?;
                        if has_revision {
                            self.store
                                .tables()
                                .add_column(&revision, Column::new(name, column.data_type))?;
                        }
                    }
                    Ok(())
                })?;
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                format!("added columns {}", names.join(", "))
            }
            SchemaChange::Cardinality(cardinality) => format!("cardinality set to {}", cardinality),
            SchemaChange::Recreate => {
                let columns = self.mapped_columns(updated, updated.field_type())?;
                transaction(self.store.tables(), || {
                    self.store.tables().drop_table(&data)?;
                    self.store
                        .tables()
                        .create_table(dedicated_schema(&data, &columns, false))?;
                    if has_revision {
                        self.store.tables().drop_table(&revision)?;
                        self.store
                            .tables()
                            .create_table(dedicated_schema(&revision, &columns, true))?;
                    }
                    Ok(())
                })?;
                format!("recreated for type {}", updated.field_type())
            }
        };

        self.update_record(updated, &summary)?;
        log::info!(
            "schema of {}.{} updated: {}",
            updated.target_entity_type_id(),
            updated.name(),
            summary
        );
        Ok(())
    }

    pub fn on_field_storage_update(
        &self,
        original: &dyn FieldStorageDefinition,
        updated: &dyn FieldStorageDefinition,
    ) -> Result<SchemaChange> {
        let change = self.plan_change(original, updated)?;
        self.apply_change(updated, &change)?;
        Ok(change)
    }

    /// Moves the dedicated tables out of the way and flags every row deleted.
    ///
    /// `storage` is the definition as it was before deletion.
    pub fn on_field_storage_delete(&self, storage: &dyn FieldStorageDefinition) -> Result<()> {
        let deleted_data = format!("field_deleted_data_{}", storage_hash(storage));
        let deleted_revision = format!("field_deleted_revision_{}", storage_hash(storage));
        let pairs = [
            (TableMapping::dedicated_data_table_name(storage), deleted_data),
            (TableMapping::dedicated_revision_table_name(storage), deleted_revision),
        ];
        let engine = self.store.tables();

        transaction(engine, || {
            let mut flag = Row::new();
            flag.insert(COLUMN_DELETED.to_string(), Value::Boolean(true));
            for (from, to) in &pairs {
                if engine.table_exists(from) {
                    engine.rename_table(from, to)?;
                    engine.update_rows(to, &[], &flag)?;
                }
            }
            Ok(())
        })?;

        let key = storage.unique_storage_identifier();
        let mut records = self.schema_records()?;
        if let Some(record) = records.get_mut(&key) {
            record.deleted = true;
            record.changes.push("deleted".to_string());
            record.updated_at = Utc::now();
        }
        self.store.state().set(SCHEMA_STATE_KEY, &records)?;
        Ok(())
    }

    /// Flags the rows of one bundle deleted; the storage keeps its tables.
    pub fn on_field_delete(&self, storage: &dyn FieldStorageDefinition, bundle: &str) -> Result<usize> {
        let mut flag = Row::new();
        flag.insert(COLUMN_DELETED.to_string(), Value::Boolean(true));
        let conditions = [Condition::eq(COLUMN_BUNDLE, bundle)];
        let engine = self.store.tables();

        transaction(engine, || {
            let mut flagged = 0;
            for table in self.existing_dedicated_tables(storage) {
                flagged += engine.update_rows(&table, &conditions, &flag)?;
            }
            Ok(flagged)
        })
    }

    /// Removes deleted rows of at most `batch_size` entities of `bundle`.
    ///
    /// Returns the number of entities whose data was removed; zero once the
    /// data is exhausted. Re-running after an interrupted batch only sees
    /// what is left.
    pub fn purge_field_data(
        &self,
        storage: &dyn FieldStorageDefinition,
        bundle: &str,
        batch_size: usize,
    ) -> Result<usize> {
        let tables = self.existing_dedicated_tables(storage);
        if tables.is_empty() {
            return Ok(0);
        }
        let engine = self.store.tables();
        let pending = [
            Condition::eq(COLUMN_BUNDLE, bundle),
            Condition::eq(COLUMN_DELETED, true),
        ];

        // Older revisions may hold values the current one dropped, so the
        // batch is drawn from every dedicated table.
        let mut entity_ids = BTreeSet::new();
        for table in &tables {
            for row in engine.select(table, &pending)? {
                if let Some(id) = row.get(COLUMN_ENTITY_ID) {
                    entity_ids.insert(id.clone());
                }
            }
        }
        let chosen: Vec<Value> = entity_ids.into_iter().take(batch_size).collect();
        if chosen.is_empty() {
            return Ok(0);
        }

        let mut conditions = pending.to_vec();
        conditions.push(Condition::is_in(COLUMN_ENTITY_ID, chosen.clone()));
        transaction(engine, || {
            for table in &tables {
                engine.delete_rows(table, &conditions)?;
            }
            Ok(())
        })?;
        Ok(chosen.len())
    }

    /// Drops the tables of a fully purged storage and forgets its schema.
    pub fn finalize_purge(&self, storage: &dyn FieldStorageDefinition) -> Result<()> {
        let engine = self.store.tables();
        for table in self.existing_dedicated_tables(storage) {
            engine.drop_table(&table)?;
        }
        let mut records = self.schema_records()?;
        records.remove(&storage.unique_storage_identifier());
        self.store.state().set(SCHEMA_STATE_KEY, &records)?;
        log::debug!(
            "dropped tables of purged field storage {}.{}",
            storage.target_entity_type_id(),
            storage.name()
        );
        Ok(())
    }

    /// Number of entities with data in this storage; with `as_bool` the count
    /// stops at the first hit.
    pub fn count_field_data(&self, storage: &dyn FieldStorageDefinition, as_bool: bool) -> Result<usize> {
        let engine = self.store.tables();

        if !TableMapping::requires_dedicated_table_storage(storage) {
            let entity_type = self.entity_types.definition(storage.target_entity_type_id())?;
            let data_table = format!("{}_field_data", entity_type.id());
            if !engine.table_exists(&data_table) {
                return Ok(0);
            }
            let columns = self.field_types.definition(storage.field_type())?.columns.clone();
            let names: Vec<String> = columns
                .iter()
                .map(|c| TableMapping::shared_column_name(storage.name(), &c.name, columns.len()))
                .collect();
            let ids: BTreeSet<Value> = engine
                .select(&data_table, &[])?
                .into_iter()
                .filter(|row| names.iter().any(|n| row.get(n).is_some_and(|v| !v.is_null())))
                .filter_map(|row| row.get(entity_type.id_key_name()).cloned())
                .collect();
            return Ok(if as_bool { ids.len().min(1) } else { ids.len() });
        }

        let data = TableMapping::dedicated_data_table_name(storage);
        if !engine.table_exists(&data) {
            return Ok(0);
        }
        let conditions = [Condition::eq(COLUMN_DELETED, storage.is_deleted())];
        if as_bool {
            return Ok(engine.count_rows(&data, &conditions)?.min(1));
        }
        let ids: BTreeSet<Value> = engine
            .select(&data, &conditions)?
            .into_iter()
            .filter_map(|row| row.get(COLUMN_ENTITY_ID).cloned())
            .collect();
        Ok(ids.len())
    }

    /// Moves stored rows from one bundle to another, in the entity type's
    /// shared tables and in the dedicated tables of `storages`.
    pub fn on_bundle_rename(
        &self,
        entity_type: &EntityType,
        bundle_old: &str,
        bundle_new: &str,
        storages: &[Arc<dyn FieldStorageDefinition>],
    ) -> Result<usize> {
        let engine = self.store.tables();
        transaction(engine, || {
            let mut moved = 0;
            if let Some(bundle_key) = entity_type.bundle_key_name() {
                let mut values = Row::new();
                values.insert(bundle_key.to_string(), Value::from(bundle_new));
                let conditions = [Condition::eq(bundle_key, bundle_old)];
                let et = entity_type.id();
                for table in [et.to_string(), format!("{}_field_data", et)] {
                    if engine.table_exists(&table) && engine.get_schema(&table)?.has_column(bundle_key) {
                        moved += engine.update_rows(&table, &conditions, &values)?;
                    }
                }
            }

            let mut values = Row::new();
            values.insert(COLUMN_BUNDLE.to_string(), Value::from(bundle_new));
            let conditions = [Condition::eq(COLUMN_BUNDLE, bundle_old)];
            for storage in storages {
                if !TableMapping::requires_dedicated_table_storage(storage.as_ref()) {
                    continue;
                }
                for table in self.existing_dedicated_tables(storage.as_ref()) {
                    moved += engine.update_rows(&table, &conditions, &values)?;
                }
            }
            Ok(moved)
        })
    }

    pub fn schema_record(&self, unique_id: &str) -> Result<Option<StorageSchemaRecord>> {
        Ok(self.schema_records()?.remove(unique_id))
    }

    pub fn schema_records(&self) -> Result<BTreeMap<String, StorageSchemaRecord>> {
        self.store.state().get_or_default(SCHEMA_STATE_KEY)
    }

    fn existing_dedicated_tables(&self, storage: &dyn FieldStorageDefinition) -> Vec<String> {
        [
            TableMapping::dedicated_data_table_name(storage),
            TableMapping::dedicated_revision_table_name(storage),
        ]
        .into_iter()
        .filter(|table| self.store.tables().table_exists(table))
        .collect()
    }

    fn max_delta(&self, storage: &dyn FieldStorageDefinition) -> Result<Option<i64>> {
        if !TableMapping::requires_dedicated_table_storage(storage) {
            return Ok(None);
        }
        let data = TableMapping::dedicated_data_table_name(storage);
        if !self.store.tables().table_exists(&data) {
            return Ok(None);
        }
        Ok(self
            .store
            .tables()
            .select(&data, &[Condition::eq(COLUMN_DELETED, false)])?
            .into_iter()
            .filter_map(|row| row.get(COLUMN_DELTA).and_then(Value::as_i64))
            .max())
    }

    fn mapped_columns(
        &self,
        storage: &dyn FieldStorageDefinition,
        field_type: &str,
    ) -> Result<Vec<MappedColumn>> {
        Ok(self
            .field_types
            .definition(field_type)?
            .columns
            .iter()
            .map(|column| MappedColumn {
                property: column.name.clone(),
                column: TableMapping::dedicated_column_name(storage.name(), &column.name),
                data_type: column.data_type,
            })
            .collect())
    }

    fn shared_table_schemas(&self, entity_type: &EntityType, mapping: &TableMapping) -> Vec<TableSchema> {
        let keys = entity_type.keys();
        let id = keys.id.as_str();
        let langcode = mapping.langcode_column();

        let mut base = vec![Column::new(id, DataType::Integer).not_null()];
        if let Some(revision) = &keys.revision {
            base.push(Column::new(revision.as_str(), DataType::Integer));
        }
        if let Some(uuid) = &keys.uuid {
            base.push(Column::new(uuid.as_str(), DataType::Text));
        }
        if let Some(bundle) = &keys.bundle {
            base.push(Column::new(bundle.as_str(), DataType::Text));
        }
        base.push(Column::new(langcode, DataType::Text));

        let mut data = vec![Column::new(id, DataType::Integer).not_null()];
        if let Some(revision) = &keys.revision {
            data.push(Column::new(revision.as_str(), DataType::Integer));
        }
        if let Some(bundle) = &keys.bundle {
            data.push(Column::new(bundle.as_str(), DataType::Text));
        }
        data.push(Column::new(langcode, DataType::Text).not_null());
        data.push(Column::new(COLUMN_DEFAULT_LANGCODE, DataType::Boolean));
        let shared: Vec<Column> = mapping
            .shared_fields()
            .flat_map(|(_, columns)| columns.iter())
            .map(|mapped| Column::new(mapped.column.clone(), mapped.data_type))
            .collect();
        data.extend(shared.iter().cloned());

        let mut schemas = vec![
            TableSchema::new(mapping.base_table(), base, vec![id]),
            TableSchema::new(mapping.data_table(), data, vec![id, langcode]),
        ];

        if let (Some(revision_key), Some(revision_table), Some(revision_data_table)) = (
            keys.revision.as_deref(),
            mapping.revision_table(),
            mapping.revision_data_table(),
        ) {
            let revision = vec![
                Column::new(id, DataType::Integer).not_null(),
                Column::new(revision_key, DataType::Integer).not_null(),
                Column::new(langcode, DataType::Text),
                Column::new(COLUMN_REVISION_CREATED, DataType::Integer),
            ];
            let mut revision_data = vec![
                Column::new(id, DataType::Integer).not_null(),
                Column::new(revision_key, DataType::Integer).not_null(),
                Column::new(langcode, DataType::Text).not_null(),
                Column::new(COLUMN_DEFAULT_LANGCODE, DataType::Boolean),
            ];
            revision_data.extend(shared);
            schemas.push(TableSchema::new(revision_table, revision, vec![revision_key]));
            schemas.push(TableSchema::new(
                revision_data_table,
                revision_data,
                vec![revision_key, langcode],
            ));
        }
        schemas
    }

    fn ensure_table(&self, schema: TableSchema) -> Result<()> {
        let engine = self.store.tables();
        if !engine.table_exists(schema.name()) {
            return engine.create_table(schema);
        }
        let existing = engine.get_schema(schema.name())?;
        for column in schema.columns() {
            if !existing.has_column(&column.name) {
                log::debug!("adding column {} to {}", column.name, schema.name());
                engine.add_column(schema.name(), Column::new(column.name.clone(), column.data_type))?;
            }
        }
        Ok(())
    }

    fn record_installed(&self, storage: &dyn FieldStorageDefinition, change: &str) -> Result<()> {
        let columns = self
            .field_types
            .definition(storage.field_type())?
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.data_type))
            .collect();
        let key = storage.unique_storage_identifier();
        let mut records = self.schema_records()?;
        if records.contains_key(&key) {
            return Ok(());
        }
        records.insert(
            key,
            StorageSchemaRecord {
                entity_type: storage.target_entity_type_id().to_string(),
                field_name: storage.name().to_string(),
                field_type: storage.field_type().to_string(),
                cardinality: storage.cardinality(),
                columns,
                dedicated: TableMapping::requires_dedicated_table_storage(storage),
                deleted: storage.is_deleted(),
                version: 1,
                changes: vec![change.to_string()],
                updated_at: Utc::now(),
            },
        );
        self.store.state().set(SCHEMA_STATE_KEY, &records)
    }

    fn update_record(&self, storage: &dyn FieldStorageDefinition, change: &str) -> Result<()> {
        let key = storage.unique_storage_identifier();
        let mut records = self.schema_records()?;
        let columns = self
            .field_types
            .definition(storage.field_type())?
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.data_type))
            .collect();
        let version = records.get(&key).map_or(1, |record| record.version + 1);
        let mut changes = records.remove(&key).map(|r| r.changes).unwrap_or_default();
        changes.push(change.to_string());
        records.insert(
            key,
            StorageSchemaRecord {
                entity_type: storage.target_entity_type_id().to_string(),
                field_name: storage.name().to_string(),
                field_type: storage.field_type().to_string(),
                cardinality: storage.cardinality(),
                columns,
                dedicated: TableMapping::requires_dedicated_table_storage(storage),
                deleted: storage.is_deleted(),
                version,
                changes,
                updated_at: Utc::now(),
            },
        );
        self.store.state().set(SCHEMA_STATE_KEY, &records)
    }
}

fn dedicated_schema(name: &str, columns: &[MappedColumn], revision: bool) -> TableSchema {
    let mut table_columns = vec![
        Column::new(COLUMN_BUNDLE, DataType::Text).not_null(),
        Column::new(COLUMN_DELETED, DataType::Boolean).not_null(),
        Column::new(COLUMN_ENTITY_ID, DataType::Integer).not_null(),
        Column::new(COLUMN_REVISION_ID, DataType::Integer).not_null(),
        Column::new(COLUMN_LANGCODE, DataType::Text).not_null(),
        Column::new(COLUMN_DELTA, DataType::Integer).not_null(),
    ];
    table_columns.extend(
        columns
            .iter()
            .map(|mapped| Column::new(mapped.column.clone(), mapped.data_type)),
    );
    let primary_key = if revision {
        vec![COLUMN_ENTITY_ID, COLUMN_REVISION_ID, COLUMN_DELETED, COLUMN_DELTA, COLUMN_LANGCODE]
    } else {
        vec![COLUMN_ENTITY_ID, COLUMN_DELETED, COLUMN_DELTA, COLUMN_LANGCODE]
    };
    TableSchema::new(name, table_columns, primary_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{BaseFieldDefinition, FieldStorageConfig, FieldTypeManager};

    fn setup() -> (Store, SchemaManager, Arc<EntityTypeManager>) {
        let mut entity_types = EntityTypeManager::new();
        entity_types
            .register(
                EntityType::new("node")
                    .revision_key("vid")
                    .bundle_key("type")
                    .uuid_key("uuid")
                    .langcode_key("langcode")
                    .base_field("title", BaseFieldDefinition::create("string"))
                    .base_field(
                        "body",
                        BaseFieldDefinition::create("text_long"),
                    )
                    .base_field(
                        "aliases",
                        BaseFieldDefinition::create("string").set_cardinality(Cardinality::Unlimited),
                    ),
            )
            .unwrap();
        let entity_types = Arc::new(entity_types);
        let store = Store::in_memory();
        let schema = SchemaManager::new(
            store.clone(),
            Arc::clone(&entity_types),
            Arc::new(FieldTypeManager::with_core_types()),
        );
        (store, schema, entity_types)
    }

    fn dedicated_row(entity_id: i64, bundle: &str, delta: i64, value: &str) -> Row {
        let mut row = Row::new();
        row.insert(COLUMN_BUNDLE.into(), bundle.into());
        row.insert(COLUMN_DELETED.into(), Value::Boolean(false));
        row.insert(COLUMN_ENTITY_ID.into(), Value::Integer(entity_id));
        row.insert(COLUMN_REVISION_ID.into(), Value::Integer(entity_id));
        row.insert(COLUMN_LANGCODE.into(), "en".into());
        row.insert(COLUMN_DELTA.into(), Value::Integer(delta));
        row.insert("field_tags_value".into(), value.into());
        row
    }

    #[test]
    fn test_install_entity_type_lays_out_shared_and_dedicated_tables() {
        let (store, schema, entity_types) = setup();
        let node = entity_types.definition("node").unwrap();
        schema.install_entity_type(&node).unwrap();
        schema.install_entity_type(&node).unwrap();

        let tables = store.tables().list_tables();
        for name in ["node", "node_field_data", "node_revision", "node_field_revision", "node__aliases"] {
            assert!(tables.contains(&name.to_string()), "missing {}", name);
        }
        let data = store.tables().get_schema("node_field_data").unwrap();
        assert!(data.has_column("title"));
        assert!(data.has_column("body__value"));
        assert!(data.has_column("body__format"));
        assert!(!data.has_column("aliases"));
    }

    #[test]
    fn test_deleted_storage_tables_are_renamed_and_flagged() {
        let (store, schema, _) = setup();
        let storage = FieldStorageConfig::new("node", "field_tags", "string");
        schema.on_field_storage_create(&storage).unwrap();
        store
            .tables()
            .insert_row("node__field_tags", dedicated_row(1, "page", 0, "a"))
            .unwrap();

        schema.on_field_storage_delete(&storage).unwrap();
        assert!(!store.tables().table_exists("node__field_tags"));

        let mut deleted = storage.clone();
        deleted.deleted = true;
        let renamed = TableMapping::dedicated_data_table_name(&deleted);
        assert!(renamed.starts_with("field_deleted_data_"));
        assert_eq!(renamed.len(), "field_deleted_data_".len() + 10);
        let rows = store.tables().select(&renamed, &[]).unwrap();
        assert_eq!(rows[0][COLUMN_DELETED], Value::Boolean(true));
        assert_eq!(schema.count_field_data(&deleted, false).unwrap(), 1);
    }

    #[test]
    fn test_purge_is_batched_per_entity() {
        let (store, schema, _) = setup();
        let storage = FieldStorageConfig::new("node", "field_tags", "string")
            .with_cardinality(Cardinality::Unlimited);
        schema.on_field_storage_create(&storage).unwrap();
        for id in 1..=3 {
            for delta in 0..2 {
                store
                    .tables()
                    .insert_row("node__field_tags", dedicated_row(id, "page", delta, "x"))
                    .unwrap();
            }
        }
        store
            .tables()
            .insert_row("node__field_tags", dedicated_row(9, "article", 0, "y"))
            .unwrap();

        assert_eq!(schema.on_field_delete(&storage, "page").unwrap(), 6);
        assert_eq!(schema.purge_field_data(&storage, "page", 2).unwrap(), 2);
        assert_eq!(schema.purge_field_data(&storage, "page", 2).unwrap(), 1);
        assert_eq!(schema.purge_field_data(&storage, "page", 2).unwrap(), 0);
        assert_eq!(store.tables().count_rows("node__field_tags", &[]).unwrap(), 1);
    }

    #[test]
    fn test_cardinality_decrease_below_stored_delta_is_refused() {
        let (store, schema, _) = setup();
        let storage = FieldStorageConfig::new("node", "field_tags", "string")
            .with_cardinality(Cardinality::Limited(3));
        schema.on_field_storage_create(&storage).unwrap();
        store
            .tables()
            .insert_row("node__field_tags", dedicated_row(1, "page", 2, "c"))
            .unwrap();

        let smaller = storage.clone().with_cardinality(Cardinality::Limited(2));
        let change = schema.plan_change(&storage, &smaller).unwrap();
        assert!(matches!(change, SchemaChange::RequiresMigration(_)));
        assert!(matches!(
            schema.apply_change(&smaller, &change),
            Err(EntityError::Schema(_))
        ));

        let larger = storage.clone().with_cardinality(Cardinality::Unlimited);
        let change = schema.on_field_storage_update(&storage, &larger).unwrap();
        assert_eq!(change, SchemaChange::Cardinality(Cardinality::Unlimited));
        let record = schema.schema_record(&storage.uuid).unwrap().unwrap();
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_type_change_recreates_empty_tables_only() {
        let (store, schema, _) = setup();
        let storage = FieldStorageConfig::new("node", "field_tags", "string");
        schema.on_field_storage_create(&storage).unwrap();

        let mut as_text = storage.clone();
        as_text.field_type = "text".to_string();
        assert_eq!(schema.plan_change(&storage, &as_text).unwrap(), SchemaChange::Recreate);

        store
            .tables()
            .insert_row("node__field_tags", dedicated_row(1, "page", 0, "a"))
            .unwrap();
        assert!(matches!(
            schema.plan_change(&storage, &as_text).unwrap(),
            SchemaChange::RequiresMigration(_)
        ));
    }
}
