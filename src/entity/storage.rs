use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::content::ContentEntity;
use super::entity_type::EntityType;
use crate::cache::CacheBackend;
use crate::core::{
    DataType, EntityError, EntityId, FieldItem, FieldItemList, LANGCODE_NOT_SPECIFIED, Result,
    RevisionId, Value,
};
use crate::field::{EntityFieldManager, FieldDefinitions, FieldTypeManager};
use crate::hooks::{EntityHook, HandlerList};
use crate::storage::schema::{
    COLUMN_BUNDLE, COLUMN_DEFAULT_LANGCODE, COLUMN_DELETED, COLUMN_DELTA, COLUMN_ENTITY_ID,
    COLUMN_LANGCODE, COLUMN_REVISION_CREATED, COLUMN_REVISION_ID, MappedColumn,
};
use crate::storage::{
    Condition, Row, SchemaManager, StorageEngine, Store, TableMapping, transaction,
};

/// Outcome of [`EntityStorage::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    New,
    Updated,
}

/// Dedicated-table rows of one field, per entity.
type DedicatedRows = BTreeMap<String, BTreeMap<EntityId, Vec<Row>>>;

/// Services an [`EntityStorage`] works with.
#[derive(Clone)]
pub struct StorageContext {
    pub store: Store,
    pub fields: Arc<EntityFieldManager>,
    pub schema: Arc<SchemaManager>,
    pub field_types: Arc<FieldTypeManager>,
    pub hooks: Arc<HandlerList<dyn EntityHook>>,
}

/// CRUD, revision and translation storage for one entity type.
pub struct EntityStorage {
    entity_type: Arc<EntityType>,
    context: StorageContext,
    cache: Arc<dyn CacheBackend<ContentEntity>>,
}

impl EntityStorage {
    pub fn new(
        entity_type: Arc<EntityType>,
        context: StorageContext,
        cache: Arc<dyn CacheBackend<ContentEntity>>,
    ) -> Self {
        Self {
            entity_type,
            context,
            cache,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Builds an unsaved entity. The bundle key is taken from `values` as is;
    /// an unknown or missing bundle is not detected here.
    pub fn create(&self, values: JsonValue) -> Result<ContentEntity> {
        let JsonValue::Object(mut values) = values else {
            return Err(EntityError::Validation(
                "Entity values must be an object".to_string(),
            ));
        };
        let entity_type = &self.entity_type;

        let bundle = match entity_type.bundle_key_name() {
            Some(key) => take_string(&mut values, key).unwrap_or_default(),
            None => entity_type.id().to_string(),
        };
        let langcode = entity_type
            .langcode_key_name()
            .and_then(|key| take_string(&mut values, key))
            .unwrap_or_else(|| LANGCODE_NOT_SPECIFIED.to_string());

        let mut entity = ContentEntity::new(
            entity_type.id(),
            &bundle,
            &langcode,
            self.main_properties()?,
        );
        if let Some(key) = entity_type.uuid_key_name() {
            let uuid = take_string(&mut values, key).unwrap_or_else(|| Uuid::new_v4().to_string());
            entity.set_uuid(uuid);
        }
        values.remove(entity_type.id_key_name());
        if let Some(key) = entity_type.revision_key_name() {
            values.remove(key);
        }

        for (name, value) in values {
            entity.set(&name, value);
        }
        if !bundle.is_empty() {
            let definitions = self.context.fields.field_definitions(entity_type.id(), &bundle)?;
            for (name, definition) in definitions.iter() {
                if entity.get(name).is_none() && !definition.default_value().is_empty() {
                    entity.set_items(name, definition.default_value().to_vec());
                }
            }
        }
        Ok(entity)
    }

    pub fn load(&self, id: EntityId, reset: bool) -> Result<Option<ContentEntity>> {
        Ok(self.load_multiple(Some(&[id]), reset)?.remove(&id))
    }

    /// Loads the given entities, or all of them when `ids` is `None`.
    ///
    /// With `reset` the cache entries of exactly the requested ids are
    /// dropped before reading.
    pub fn load_multiple(
        &self,
        ids: Option<&[EntityId]>,
        reset: bool,
    ) -> Result<BTreeMap<EntityId, ContentEntity>> {
        let ids: Vec<EntityId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self.all_ids()?,
        };
        if reset {
            self.reset_cache(Some(&ids));
        }

        let mut entities = BTreeMap::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.cache.get(&id.to_string()) {
                Some(entity) => {
                    entities.insert(id, entity);
                }
                None => missing.push(id),
            }
        }
        if !missing.is_empty() {
            for (id, entity) in self.load_from_store(&missing)? {
                self.cache.set(&id.to_string(), entity.clone());
                entities.insert(id, entity);
            }
        }
        Ok(entities)
    }

    /// Conjunctive equality filter. A list value matches any of its members.
    pub fn load_by_properties(&self, values: JsonValue) -> Result<BTreeMap<EntityId, ContentEntity>> {
        let JsonValue::Object(values) = values else {
            return Err(EntityError::Validation(
                "Entity properties must be an object".to_string(),
            ));
        };
        let mapping = self.table_mapping()?;
        let mut candidates: Option<BTreeSet<EntityId>> = None;

        for (property, value) in &values {
            let matched = self.ids_matching(&mapping, property, value)?;
            candidates = Some(match candidates {
                Some(current) => current.intersection(&matched).copied().collect(),
                None => matched,
            });
            if candidates.as_ref().is_some_and(BTreeSet::is_empty) {
                return Ok(BTreeMap::new());
            }
        }

        let ids: Vec<EntityId> = match candidates {
            Some(ids) => ids.into_iter().collect(),
            None => self.all_ids()?,
        };
        self.load_multiple(Some(&ids), false)
    }

    /// Reads straight from the backing store; the cache is neither read nor filled.
    pub fn load_unchanged(&self, id: EntityId) -> Result<Option<ContentEntity>> {
        Ok(self.load_from_store(&[id])?.remove(&id))
    }

    pub fn load_by_uuid(&self, uuid: &str) -> Result<Option<ContentEntity>> {
        let Some(uuid_key) = self.entity_type.uuid_key_name() else {
            return Err(EntityError::UnsupportedCapability(format!(
                "Entity type '{}' does not support UUIDs",
                self.entity_type.id()
            )));
        };
        let rows = self.tables().select(
            self.entity_type.id(),
            &[Condition::eq(uuid_key, uuid)],
        )?;
        match rows.first().and_then(|row| self.row_id(row)) {
            Some(id) => self.load(id, false),
            None => Ok(None),
        }
    }

    pub fn save(&self, entity: &mut ContentEntity) -> Result<SaveStatus> {
        if entity.entity_type_id() != self.entity_type.id() {
            return Err(EntityError::Validation(format!(
                "Cannot save a '{}' entity with '{}' storage",
                entity.entity_type_id(),
                self.entity_type.id()
            )));
        }
        for hook in self.context.hooks.iter() {
            hook.presave(entity)?;
        }

        let definitions = self
            .context
            .fields
            .field_definitions(self.entity_type.id(), entity.bundle())?;
        let mapping = self.table_mapping()?;
        self.validate_cardinality(entity, &definitions)?;

        let is_new = entity.is_new();
        let (id, revision_id) = transaction(self.tables(), || {
            let (id, revision_id) = self.allocate_ids(entity)?;
            self.write_shared(&mapping, entity, &definitions, id, revision_id)?;
            self.write_dedicated(&mapping, entity, &definitions, id, revision_id)?;
            Ok((id, revision_id))
        })?;

        entity.mark_stored(id, revision_id, true);
        self.cache.invalidate(&[&id.to_string()]);
        log::debug!(
            "saved {} {} (revision {:?})",
            self.entity_type.id(),
            id,
            revision_id
        );
        Ok(if is_new { SaveStatus::New } else { SaveStatus::Updated })
    }

    pub fn revision_load(&self, revision_id: RevisionId) -> Result<Option<ContentEntity>> {
        let (revision_key, revision_table) = self.revision_tables()?;
        let revision_rows = self
            .tables()
            .select(&revision_table, &[Condition::eq(revision_key.as_str(), revision_id)])?;
        let Some(id) = revision_rows.first().and_then(|row| self.row_id(row)) else {
            return Ok(None);
        };
        let Some(base_row) = self.base_row(id)? else {
            return Ok(None);
        };

        let mapping = self.table_mapping()?;
        let data_rows = match mapping.revision_data_table() {
            Some(table) => self
                .tables()
                .select(table, &[Condition::eq(revision_key.as_str(), revision_id)])?,
            None => Vec::new(),
        };
        let mut dedicated = DedicatedRows::new();
        for (name, tables) in mapping.dedicated_fields() {
            let Some(table) = &tables.revision else {
                continue;
            };
            let rows = self.tables().select(
                table,
                &[
                    Condition::eq(COLUMN_ENTITY_ID, id),
                    Condition::eq(COLUMN_REVISION_ID, revision_id),
                    Condition::eq(COLUMN_DELETED, false),
                ],
            )?;
            dedicated.entry(name.clone()).or_default().insert(id, rows);
        }

        let default_revision = self.row_revision_id(&base_row) == Some(revision_id);
        let mut entity = self.build_entity(&mapping, &base_row, &data_rows, &dedicated, id)?;
        entity.mark_stored(id, Some(revision_id), default_revision);
        Ok(Some(entity))
    }

    /// Revision ids of one entity, oldest first.
    pub fn revision_ids(&self, id: EntityId) -> Result<Vec<RevisionId>> {
        let (revision_key, revision_table) = self.revision_tables()?;
        let id_key = self.entity_type.id_key_name();
        Ok(self
            .tables()
            .select(&revision_table, &[Condition::eq(id_key, id)])?
            .iter()
            .filter_map(|row| row.get(&revision_key).and_then(Value::as_u64))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Deletes a non-default revision. Returns `false` for an unknown revision.
    pub fn revision_delete(&self, revision_id: RevisionId) -> Result<bool> {
        let (revision_key, revision_table) = self.revision_tables()?;
        let revision_key = revision_key.as_str();
        let rows = self
            .tables()
            .select(&revision_table, &[Condition::eq(revision_key, revision_id)])?;
        let Some(id) = rows.first().and_then(|row| self.row_id(row)) else {
            return Ok(false);
        };
        let default_revision = self.base_row(id)?.and_then(|row| self.row_revision_id(&row));
        if default_revision == Some(revision_id) {
            return Err(EntityError::Validation(format!(
                "Revision {} is the default revision of {} {} and cannot be deleted",
                revision_id,
                self.entity_type.id(),
                id
            )));
        }

        let mapping = self.table_mapping()?;
        transaction(self.tables(), || {
            let by_revision = [Condition::eq(revision_key, revision_id)];
            self.tables().delete_rows(&revision_table, &by_revision)?;
            if let Some(table) = mapping.revision_data_table() {
                self.tables().delete_rows(table, &by_revision)?;
            }
            for (_, tables) in mapping.dedicated_fields() {
                if let Some(table) = &tables.revision {
                    self.tables().delete_rows(
                        table,
                        &[
                            Condition::eq(COLUMN_ENTITY_ID, id),
                            Condition::eq(COLUMN_REVISION_ID, revision_id),
                            Condition::eq(COLUMN_DELETED, false),
                        ],
                    )?;
                }
            }
            Ok(())
        })?;
        log::debug!("deleted revision {} of {} {}", revision_id, self.entity_type.id(), id);
        Ok(true)
    }

    /// Loads then deletes the given entities; ids that do not resolve are skipped.
    pub fn delete_multiple(&self, ids: &[EntityId]) -> Result<usize> {
        let entities = self.load_multiple(Some(ids), false)?;
        if entities.is_empty() {
            return Ok(0);
        }
        for entity in entities.values() {
            for hook in self.context.hooks.iter() {
                hook.predelete(entity)?;
            }
        }

        let found: Vec<Value> = entities.keys().map(|id| Value::from(*id)).collect();
        let mapping = self.table_mapping()?;
        let id_key = self.entity_type.id_key_name();
        transaction(self.tables(), || {
            let by_id = [Condition::is_in(id_key, found.clone())];
            self.tables().delete_rows(mapping.base_table(), &by_id)?;
            self.tables().delete_rows(mapping.data_table(), &by_id)?;
            if let Some(table) = mapping.revision_table() {
                self.tables().delete_rows(table, &by_id)?;
            }
            if let Some(table) = mapping.revision_data_table() {
                self.tables().delete_rows(table, &by_id)?;
            }
            let live = [
                Condition::is_in(COLUMN_ENTITY_ID, found.clone()),
                Condition::eq(COLUMN_DELETED, false),
            ];
            for (_, tables) in mapping.dedicated_fields() {
                self.tables().delete_rows(&tables.data, &live)?;
                if let Some(table) = &tables.revision {
                    self.tables().delete_rows(table, &live)?;
                }
            }
            Ok(())
        })?;

        let keys: Vec<String> = entities.keys().map(ToString::to_string).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.cache.invalidate(&keys);
        for entity in entities.values() {
            for hook in self.context.hooks.iter() {
                hook.delete(entity)?;
            }
        }
        log::debug!("deleted {} {} entities", entities.len(), self.entity_type.id());
        Ok(entities.len())
    }

    /// Number of entities holding data in the named field.
    pub fn count_field_data(&self, field_name: &str, as_bool: bool) -> Result<usize> {
        let definitions = self
            .context
            .fields
            .field_storage_definitions(self.entity_type.id())?;
        match definitions.get(field_name) {
            Some(definition) => self
                .context
                .schema
                .count_field_data(definition.as_ref(), as_bool),
            None => Ok(0),
        }
    }

    pub fn has_data(&self) -> Result<bool> {
        Ok(self.tables().count_rows(self.entity_type.id(), &[])? > 0)
    }

    /// Drops cached entities: the given ids, or all of them.
    pub fn reset_cache(&self, ids: Option<&[EntityId]>) {
        match ids {
            Some(ids) => {
                let keys: Vec<String> = ids.iter().map(ToString::to_string).collect();
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                self.cache.invalidate(&keys);
            }
            None => self.cache.invalidate_all(),
        }
    }

    fn tables(&self) -> &dyn StorageEngine {
        self.context.store.tables()
    }

    fn table_mapping(&self) -> Result<TableMapping> {
        let definitions = self
            .context
            .fields
            .field_storage_definitions(self.entity_type.id())?;
        self.context.schema.table_mapping(&self.entity_type, &definitions)
    }

    fn main_properties(&self) -> Result<Arc<BTreeMap<String, String>>> {
        let definitions = self
            .context
            .fields
            .field_storage_definitions(self.entity_type.id())?;
        let mut properties = BTreeMap::new();
        for (name, definition) in definitions {
            if let Some(field_type) = self.context.field_types.get_definition(definition.field_type()) {
                properties.insert(name, field_type.main_property.clone());
            }
        }
        Ok(Arc::new(properties))
    }

    fn revision_tables(&self) -> Result<(String, String)> {
        match self.entity_type.revision_key_name() {
            Some(key) => Ok((key.to_string(), format!("{}_revision", self.entity_type.id()))),
            None => Err(EntityError::UnsupportedCapability(format!(
                "Entity type '{}' is not revisionable",
                self.entity_type.id()
            ))),
        }
    }

    fn all_ids(&self) -> Result<Vec<EntityId>> {
        Ok(self
            .tables()
            .select(self.entity_type.id(), &[])?
            .iter()
            .filter_map(|row| self.row_id(row))
            .collect())
    }

    fn base_row(&self, id: EntityId) -> Result<Option<Row>> {
        let id_key = self.entity_type.id_key_name();
        Ok(self
            .tables()
            .select(self.entity_type.id(), &[Condition::eq(id_key, id)])?
            .into_iter()
            .next())
    }

    fn row_id(&self, row: &Row) -> Option<EntityId> {
        row.get(self.entity_type.id_key_name()).and_then(Value::as_u64)
    }

    fn row_revision_id(&self, row: &Row) -> Option<RevisionId> {
        let key = self.entity_type.revision_key_name()?;
        row.get(key).and_then(Value::as_u64)
    }

    fn next_sequence(&self, name: &str) -> Result<u64> {
        let key = format!("entity.{}.{}", name, self.entity_type.id());
        let next = self.context.store.state().get_or_default::<u64>(&key)? + 1;
        self.context.store.state().set(&key, &next)?;
        Ok(next)
    }

    /// Picks the id and revision id to write, checking for a concurrent save.
    fn allocate_ids(&self, entity: &ContentEntity) -> Result<(EntityId, Option<RevisionId>)> {
        let revisionable = self.entity_type.is_revisionable();
        if entity.is_new() {
            let id = self.next_sequence("sequence")?;
            let revision_id = if revisionable {
                Some(self.next_sequence("revision_sequence")?)
            } else {
                None
            };
            return Ok((id, revision_id));
        }

        let id = entity.id().ok_or_else(|| {
            EntityError::Validation("A stored entity must have an id".to_string())
        })?;
        let base_row = self.base_row(id)?.ok_or_else(|| {
            EntityError::ConcurrentModification(format!(
                "{} {} was deleted by another request",
                self.entity_type.id(),
                id
            ))
        })?;
        if !revisionable {
            return Ok((id, None));
        }

        let stored = self.row_revision_id(&base_row);
        if entity.is_default_revision() && stored != entity.loaded_revision_id() {
            return Err(EntityError::ConcurrentModification(format!(
                "{} {} was saved at revision {:?} while this copy was loaded at {:?}",
                self.entity_type.id(),
                id,
                stored,
                entity.loaded_revision_id()
            )));
        }
        if !entity.is_default_revision() && !entity.is_new_revision() {
            return Err(EntityError::Validation(format!(
                "A non-default revision of {} {} can only be saved as a new revision",
                self.entity_type.id(),
                id
            )));
        }
        if entity.is_new_revision() {
            Ok((id, Some(self.next_sequence("revision_sequence")?)))
        } else {
            Ok((id, entity.revision_id()))
        }
    }

    fn validate_cardinality(&self, entity: &ContentEntity, definitions: &FieldDefinitions) -> Result<()> {
        for (langcode, values) in entity.translations() {
            for (name, items) in values {
                let Some(storage) = definitions.get(name).and_then(|d| d.storage_definition()) else {
                    continue;
                };
                if !storage.cardinality().allows(items.len()) {
                    return Err(EntityError::Validation(format!(
                        "Field '{}' ({}) holds {} items but allows {}",
                        name,
                        langcode,
                        items.len(),
                        storage.cardinality()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Values of `field_name` as stored for `langcode`: its own for
    /// translatable fields, the default language's otherwise.
    fn stored_items<'a>(
        &self,
        entity: &'a ContentEntity,
        definitions: &FieldDefinitions,
        langcode: &str,
        field_name: &str,
    ) -> Option<&'a FieldItemList> {
        let translatable = self.entity_type.is_translatable()
            && definitions
                .get(field_name)
                .is_some_and(|definition| definition.is_translatable());
        let source = if translatable { langcode } else { entity.language() };
        entity.get_translated(source, field_name)
    }

    fn write_shared(
        &self,
        mapping: &TableMapping,
        entity: &ContentEntity,
        definitions: &FieldDefinitions,
        id: EntityId,
        revision_id: Option<RevisionId>,
    ) -> Result<()> {
        let entity_type = &self.entity_type;
        let keys = entity_type.keys();
        let langcode_column = mapping.langcode_column();

        let mut base = Row::new();
        base.insert(keys.id.clone(), Value::from(id));
        if let (Some(key), Some(revision_id)) = (&keys.revision, revision_id) {
            base.insert(key.clone(), Value::from(revision_id));
        }
        if let (Some(key), Some(uuid)) = (&keys.uuid, entity.uuid()) {
            base.insert(key.clone(), Value::from(uuid));
        }
        if let Some(key) = &keys.bundle {
            base.insert(key.clone(), Value::from(entity.bundle()));
        }
        base.insert(langcode_column.to_string(), Value::from(entity.language()));
        self.tables().upsert_row(mapping.base_table(), base)?;

        let by_id = [Condition::eq(keys.id.as_str(), id)];
        self.tables().delete_rows(mapping.data_table(), &by_id)?;
        let mut data_rows = Vec::new();
        for langcode in entity.translations().keys() {
            let mut row = Row::new();
            row.insert(keys.id.clone(), Value::from(id));
            if let (Some(key), Some(revision_id)) = (&keys.revision, revision_id) {
                row.insert(key.clone(), Value::from(revision_id));
            }
            if let Some(key) = &keys.bundle {
                row.insert(key.clone(), Value::from(entity.bundle()));
            }
            row.insert(langcode_column.to_string(), Value::from(langcode.as_str()));
            row.insert(
                COLUMN_DEFAULT_LANGCODE.to_string(),
                Value::Boolean(langcode == entity.language()),
            );
            for (name, columns) in mapping.shared_fields() {
                let item = self
                    .stored_items(entity, definitions, langcode, name)
                    .and_then(|items| items.first());
                for mapped in columns {
                    row.insert(mapped.column.clone(), item_value(item, mapped)?);
                }
            }
            self.tables().insert_row(mapping.data_table(), row.clone())?;
            data_rows.push(row);
        }

        if let (Some(revision_key), Some(revision_id), Some(revision_table), Some(revision_data_table)) = (
            keys.revision.as_deref(),
            revision_id,
            mapping.revision_table(),
            mapping.revision_data_table(),
        ) {
            let mut revision = Row::new();
            revision.insert(keys.id.clone(), Value::from(id));
            revision.insert(revision_key.to_string(), Value::from(revision_id));
            revision.insert(langcode_column.to_string(), Value::from(entity.language()));
            revision.insert(
                COLUMN_REVISION_CREATED.to_string(),
                Value::Integer(Utc::now().timestamp()),
            );
            self.tables().upsert_row(revision_table, revision)?;

            self.tables().delete_rows(
                revision_data_table,
                &[Condition::eq(revision_key, revision_id)],
            )?;
            for mut row in data_rows {
                if let Some(bundle_key) = &keys.bundle {
                    row.remove(bundle_key);
                }
                self.tables().insert_row(revision_data_table, row)?;
            }
        }
        Ok(())
    }

    fn write_dedicated(
        &self,
        mapping: &TableMapping,
        entity: &ContentEntity,
        definitions: &FieldDefinitions,
        id: EntityId,
        revision_id: Option<RevisionId>,
    ) -> Result<()> {
        let revision_value = Value::from(revision_id.unwrap_or(id));
        for (name, tables) in mapping.dedicated_fields() {
            if !definitions.contains_key(name.as_str()) {
                continue;
            }
            let live = [
                Condition::eq(COLUMN_ENTITY_ID, id),
                Condition::eq(COLUMN_DELETED, false),
            ];
            self.tables().delete_rows(&tables.data, &live)?;
            if let Some(table) = &tables.revision {
                let mut current = live.to_vec();
                current.push(Condition::is_in(COLUMN_REVISION_ID, vec![revision_value.clone()]));
                self.tables().delete_rows(table, &current)?;
            }

            for langcode in entity.translations().keys() {
                let Some(items) = self.stored_items(entity, definitions, langcode, name) else {
                    continue;
                };
                let mut delta = 0i64;
                for item in items {
                    let mut row = Row::new();
                    row.insert(COLUMN_BUNDLE.to_string(), Value::from(entity.bundle()));
                    row.insert(COLUMN_DELETED.to_string(), Value::Boolean(false));
                    row.insert(COLUMN_ENTITY_ID.to_string(), Value::from(id));
                    row.insert(COLUMN_REVISION_ID.to_string(), revision_value.clone());
                    row.insert(COLUMN_LANGCODE.to_string(), Value::from(langcode.as_str()));
                    row.insert(COLUMN_DELTA.to_string(), Value::Integer(delta));
                    let mut empty = true;
                    for mapped in &tables.columns {
                        let value = item_value(Some(item), mapped)?;
                        empty &= value.is_null();
                        row.insert(mapped.column.clone(), value);
                    }
                    if empty {
                        continue;
                    }
                    self.tables().insert_row(&tables.data, row.clone())?;
                    if let Some(table) = &tables.revision {
                        self.tables().insert_row(table, row)?;
                    }
                    delta += 1;
                }
            }
        }
        Ok(())
    }

    fn load_from_store(&self, ids: &[EntityId]) -> Result<BTreeMap<EntityId, ContentEntity>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mapping = self.table_mapping()?;
        let id_key = self.entity_type.id_key_name();
        let id_values: Vec<Value> = ids.iter().map(|id| Value::from(*id)).collect();

        let base_rows = self
            .tables()
            .select(mapping.base_table(), &[Condition::is_in(id_key, id_values.clone())])?;
        if base_rows.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut data_rows: BTreeMap<EntityId, Vec<Row>> = BTreeMap::new();
        for row in self
            .tables()
            .select(mapping.data_table(), &[Condition::is_in(id_key, id_values.clone())])?
        {
            if let Some(id) = self.row_id(&row) {
                data_rows.entry(id).or_default().push(row);
            }
        }

        let mut dedicated = DedicatedRows::new();
        for (name, tables) in mapping.dedicated_fields() {
            let rows = self.tables().select(
                &tables.data,
                &[
                    Condition::is_in(COLUMN_ENTITY_ID, id_values.clone()),
                    Condition::eq(COLUMN_DELETED, false),
                ],
            )?;
            let by_entity = dedicated.entry(name.clone()).or_default();
            for row in rows {
                if let Some(id) = row.get(COLUMN_ENTITY_ID).and_then(Value::as_u64) {
                    by_entity.entry(id).or_default().push(row);
                }
            }
        }

        let mut entities = BTreeMap::new();
        for base_row in base_rows {
            let Some(id) = self.row_id(&base_row) else {
                continue;
            };
            let rows = data_rows.remove(&id).unwrap_or_default();
            let mut entity = self.build_entity(&mapping, &base_row, &rows, &dedicated, id)?;
            entity.mark_stored(id, self.row_revision_id(&base_row), true);
            entities.insert(id, entity);
        }
        Ok(entities)
    }

    fn build_entity(
        &self,
        mapping: &TableMapping,
        base_row: &Row,
        data_rows: &[Row],
        dedicated: &DedicatedRows,
        id: EntityId,
    ) -> Result<ContentEntity> {
        let keys = self.entity_type.keys();
        let text = |row: &Row, column: &str| row.get(column).and_then(Value::as_str).map(str::to_string);

        let bundle = match &keys.bundle {
            Some(key) => text(base_row, key).unwrap_or_default(),
            None => self.entity_type.id().to_string(),
        };
        let langcode = text(base_row, mapping.langcode_column())
            .unwrap_or_else(|| LANGCODE_NOT_SPECIFIED.to_string());

        let mut entity = ContentEntity::new(
            self.entity_type.id(),
            &bundle,
            &langcode,
            self.main_properties()?,
        );
        if let Some(uuid) = keys.uuid.as_deref().and_then(|key| text(base_row, key)) {
            entity.set_uuid(uuid);
        }

        for row in data_rows {
            let Some(row_langcode) = text(row, mapping.langcode_column()) else {
                continue;
            };
            let values = entity.values_mut(&row_langcode);
            for (name, columns) in mapping.shared_fields() {
                let mut item = FieldItem::new();
                for mapped in columns {
                    if let Some(value) = row.get(&mapped.column).filter(|value| !value.is_null()) {
                        item.insert(mapped.property.clone(), value.to_json());
                    }
                }
                if !item.is_empty() {
                    values.insert(name.clone(), vec![item]);
                }
            }
        }

        for (name, tables) in mapping.dedicated_fields() {
            let Some(rows) = dedicated.get(name).and_then(|by_entity| by_entity.get(&id)) else {
                continue;
            };
            let mut per_language: BTreeMap<String, Vec<(i64, FieldItem)>> = BTreeMap::new();
            for row in rows {
                let Some(row_langcode) = text(row, COLUMN_LANGCODE) else {
                    continue;
                };
                let delta = row.get(COLUMN_DELTA).and_then(Value::as_i64).unwrap_or_default();
                let mut item = FieldItem::new();
                for mapped in &tables.columns {
                    if let Some(value) = row.get(&mapped.column).filter(|value| !value.is_null()) {
                        item.insert(mapped.property.clone(), value.to_json());
                    }
                }
                per_language.entry(row_langcode).or_default().push((delta, item));
            }
            for (row_langcode, mut items) in per_language {
                items.sort_by_key(|(delta, _)| *delta);
                let items: FieldItemList = items.into_iter().map(|(_, item)| item).collect();
                entity.values_mut(&row_langcode).insert(name.clone(), items);
            }
        }
        Ok(entity)
    }

    fn ids_matching(
        &self,
        mapping: &TableMapping,
        property: &str,
        value: &JsonValue,
    ) -> Result<BTreeSet<EntityId>> {
        let wanted: Vec<&JsonValue> = match value {
            JsonValue::Array(values) => values.iter().collect(),
            other => vec![other],
        };
        let (field_name, column_property) = match property.split_once('.') {
            Some((field, column)) => (field, Some(column)),
            None => (property, None),
        };
        let keys = self.entity_type.keys();

        if self.entity_type.is_key_field(field_name) {
            let (table, data_type) = if keys.langcode.as_deref() == Some(field_name) {
                (mapping.data_table(), DataType::Text)
            } else if field_name == keys.id || keys.revision.as_deref() == Some(field_name) {
                (mapping.base_table(), DataType::Integer)
            } else {
                (mapping.base_table(), DataType::Text)
            };
            let values = convert_all(data_type, &wanted)?;
            let rows = self.tables().select(table, &[Condition::is_in(field_name, values)])?;
            return Ok(rows.iter().filter_map(|row| self.row_id(row)).collect());
        }

        if let Some(columns) = mapping.shared_columns(field_name) {
            let mapped = pick_column(columns, column_property, property)?;
            let values = convert_all(mapped.data_type, &wanted)?;
            let rows = self.tables().select(
                mapping.data_table(),
                &[Condition::is_in(mapped.column.as_str(), values)],
            )?;
            return Ok(rows.iter().filter_map(|row| self.row_id(row)).collect());
        }

        if let Some(tables) = mapping.dedicated_tables(field_name) {
            let mapped = pick_column(&tables.columns, column_property, property)?;
            let values = convert_all(mapped.data_type, &wanted)?;
            let rows = self.tables().select(
                &tables.data,
                &[
                    Condition::eq(COLUMN_DELETED, false),
                    Condition::is_in(mapped.column.as_str(), values),
                ],
            )?;
            return Ok(rows
                .iter()
                .filter_map(|row| row.get(COLUMN_ENTITY_ID).and_then(Value::as_u64))
                .collect());
        }

        Err(EntityError::Validation(format!(
            "'{}' is not a property of entity type '{}'",
            property,
            self.entity_type.id()
        )))
    }
}

fn take_string(values: &mut Map<String, JsonValue>, key: &str) -> Option<String> {
    match values.remove(key)? {
        JsonValue::String(s) => Some(s),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn item_value(item: Option<&FieldItem>, mapped: &MappedColumn) -> Result<Value> {
    match item.and_then(|item| item.get(&mapped.property)) {
        Some(json) => mapped.data_type.value_from_json(json),
        None => Ok(Value::Null),
    }
}

fn convert_all(data_type: DataType, values: &[&JsonValue]) -> Result<Vec<Value>> {
    values
        .iter()
        .map(|value| data_type.value_from_json(value))
        .collect()
}

/// Column behind `field.property`; a bare field name means its first column.
fn pick_column<'a>(
    columns: &'a [MappedColumn],
    property: Option<&str>,
    requested: &str,
) -> Result<&'a MappedColumn> {
    let found = match property {
        Some(property) => columns.iter().find(|mapped| mapped.property == property),
        None => columns.first(),
    };
    found.ok_or_else(|| EntityError::Validation(format!("Unknown property '{}'", requested)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_column_defaults_to_first() {
        let columns = vec![
            MappedColumn {
                property: "value".into(),
                column: "body__value".into(),
                data_type: DataType::Text,
            },
            MappedColumn {
                property: "format".into(),
                column: "body__format".into(),
                data_type: DataType::Text,
            },
        ];
        assert_eq!(pick_column(&columns, None, "body").unwrap().column, "body__value");
        assert_eq!(
            pick_column(&columns, Some("format"), "body.format").unwrap().column,
            "body__format"
        );
        assert!(pick_column(&columns, Some("summary"), "body.summary").is_err());
    }

    #[test]
    fn test_take_string_stringifies_scalars() {
        let mut values = Map::new();
        values.insert("type".into(), JsonValue::from("page"));
        values.insert("langcode".into(), JsonValue::from(7));
        assert_eq!(take_string(&mut values, "type").as_deref(), Some("page"));
        assert_eq!(take_string(&mut values, "langcode").as_deref(), Some("7"));
        assert!(values.is_empty());
    }
}
