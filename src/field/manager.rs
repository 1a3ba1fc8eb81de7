use std::sync::Arc;

use super::field_config::FieldConfig;
use super::field_type::FieldTypeManager;
use super::ledger::{DeletedFieldEntry, DeletedStorageEntry};
use super::registry::EntityFieldManager;
use super::repository::FieldConfigRepository;
use super::storage_config::FieldStorageConfig;
use crate::core::{EntityError, Result, validate_machine_name};
use crate::display::DisplayRepository;
use crate::entity::{BundleInfo, EntityType, EntityTypeManager};
use crate::storage::{SchemaChange, SchemaManager};

/// Create, update and delete paths for field storages and fields.
///
/// Every write keeps configuration, schema, ledgers, displays and the
/// definition caches in step.
pub struct FieldConfigManager {
    entity_types: Arc<EntityTypeManager>,
    field_types: Arc<FieldTypeManager>,
    bundle_info: Arc<BundleInfo>,
    repository: FieldConfigRepository,
    fields: Arc<EntityFieldManager>,
    schema: Arc<SchemaManager>,
    displays: Arc<DisplayRepository>,
}

impl FieldConfigManager {
    pub fn new(
        entity_types: Arc<EntityTypeManager>,
        field_types: Arc<FieldTypeManager>,
        bundle_info: Arc<BundleInfo>,
        repository: FieldConfigRepository,
        fields: Arc<EntityFieldManager>,
        schema: Arc<SchemaManager>,
        displays: Arc<DisplayRepository>,
    ) -> Self {
        Self {
            entity_types,
            field_types,
            bundle_info,
            repository,
            fields,
            schema,
            displays,
        }
    }

    pub fn repository(&self) -> &FieldConfigRepository {
        &self.repository
    }

    pub fn create_field_storage(&self, mut storage: FieldStorageConfig) -> Result<Arc<FieldStorageConfig>> {
        validate_machine_name("Field", &storage.field_name)?;
        let entity_type = self.fieldable_entity_type(&storage.entity_type)?;
        storage.module = self.field_types.definition(&storage.field_type)?.provider.clone();
        storage.cardinality.validate()?;
        storage.deleted = false;

        if entity_type.base_field_definitions().contains_key(&storage.field_name) {
            return Err(EntityError::Validation(format!(
                "Field name '{}' is already used by a base field of '{}'",
                storage.field_name, storage.entity_type
            )));
        }
        if self
            .repository
            .load_storage(&storage.entity_type, &storage.field_name)?
            .is_some()
        {
            return Err(EntityError::ConfigExists(storage.config_name()));
        }

        self.schema.on_field_storage_create(&storage)?;
        self.repository.save_storage(&storage)?;
        self.fields.clear_cached_field_definitions();
        log::info!("created field storage {}", storage.id());
        Ok(Arc::new(storage))
    }

    /// Saves changed settings, applying whatever schema change they imply.
    pub fn update_field_storage(&self, mut storage: FieldStorageConfig) -> Result<SchemaChange> {
        let original = self
            .repository
            .load_storage(&storage.entity_type, &storage.field_name)?
            .ok_or_else(|| EntityError::ConfigNotFound(storage.config_name()))?;
        storage.uuid = original.uuid.clone();
        storage.module = self.field_types.definition(&storage.field_type)?.provider.clone();
        storage.cardinality.validate()?;
        storage.deleted = false;

        let change = self.schema.on_field_storage_update(&original, &storage)?;
        self.repository.save_storage(&storage)?;
        if original.field_type != storage.field_type {
            for mut field in self
                .repository
                .fields_for_storage(&storage.entity_type, &storage.field_name)?
            {
                field.field_type = storage.field_type.clone();
                self.repository.save_field(&field)?;
            }
        }
        self.fields.clear_cached_field_definitions();
        log::info!("updated field storage {}", storage.id());
        Ok(change)
    }

    /// Deletes a storage and every field on it. Data stays behind, flagged
    /// deleted, until purged.
    pub fn delete_field_storage(&self, entity_type: &str, field_name: &str) -> Result<bool> {
        let Some(original) = self.repository.load_storage(entity_type, field_name)? else {
            return Ok(false);
        };
        let mut deleted_storage = original.clone();
        deleted_storage.deleted = true;

        for field in self.repository.fields_for_storage(entity_type, field_name)? {
            let mut snapshot = field.clone();
            snapshot.deleted = true;
            self.repository
                .record_deleted_field(DeletedFieldEntry::new(snapshot, deleted_storage.clone()))?;
            self.repository.remove_field(entity_type, &field.bundle, field_name)?;
            self.displays
                .remove_field_components(entity_type, &field.bundle, field_name)?;
        }

        // Fields deleted earlier now find their data in the renamed tables.
        let mut entries = self.repository.deleted_fields()?;
        let mut repointed = false;
        for entry in entries.values_mut() {
            if entry.field_storage.uuid == original.uuid && !entry.field_storage.deleted {
                entry.field_storage = deleted_storage.clone();
                repointed = true;
            }
        }
        if repointed {
            self.repository.set_deleted_fields(&entries)?;
        }

        self.schema.on_field_storage_delete(&original)?;
        self.repository
            .record_deleted_storage(DeletedStorageEntry::new(deleted_storage))?;
        self.repository.remove_storage(entity_type, field_name)?;
        self.fields.clear_cached_field_definitions();
        log::info!("deleted field storage {}", original.id());
        Ok(true)
    }

    pub fn create_field(&self, mut field: FieldConfig) -> Result<FieldConfig> {
        let storage = self.attach_storage(&mut field)?;
        field.deleted = false;
        if self
            .repository
            .load_field(&field.entity_type, &field.bundle, &field.field_name)?
            .is_some()
        {
            return Err(EntityError::ConfigExists(field.config_name()));
        }
        self.repository.save_field(&field)?;
        self.fields.clear_cached_field_definitions();
        log::info!("created field {} on storage {}", field.id(), storage.uuid);
        Ok(field)
    }

    pub fn update_field(&self, mut field: FieldConfig) -> Result<FieldConfig> {
        let original = self
            .repository
            .load_field(&field.entity_type, &field.bundle, &field.field_name)?
            .ok_or_else(|| EntityError::ConfigNotFound(field.config_name()))?;
        field.uuid = original.uuid;
        self.attach_storage(&mut field)?;
        self.repository.save_field(&field)?;
        self.fields.clear_cached_field_definitions();
        Ok(field)
    }

    /// Marks one field deleted. Its rows are flagged and left for purging.
    ///
    /// Deleting the last field of a storage that does not persist without
    /// fields deletes the storage too.
    pub fn delete_field(&self, entity_type: &str, bundle: &str, field_name: &str) -> Result<bool> {
        let Some(field) = self.repository.load_field(entity_type, bundle, field_name)? else {
            return Ok(false);
        };
        let storage = field.field_storage()?;

        let mut snapshot = field.clone();
        snapshot.deleted = true;
        self.repository
            .record_deleted_field(DeletedFieldEntry::new(snapshot, (*storage).clone()))?;
        let flagged = self.schema.on_field_delete(storage.as_ref(), bundle)?;
        self.repository.remove_field(entity_type, bundle, field_name)?;
        self.displays.remove_field_components(entity_type, bundle, field_name)?;
        self.fields.clear_cached_field_definitions();
        log::info!("deleted field {} ({} rows flagged)", field.id(), flagged);

        if !storage.persist_with_no_fields
            && self
                .repository
                .fields_for_storage(entity_type, field_name)?
                .is_empty()
        {
            self.delete_field_storage(entity_type, field_name)?;
        }
        Ok(true)
    }

    /// Re-keys a live field to another bundle through the regular
    /// validation path.
    pub(crate) fn move_field(&self, mut field: FieldConfig, bundle_new: &str) -> Result<FieldConfig> {
        let bundle_old = field.bundle.clone();
        field.rekey_bundle(bundle_new);
        self.attach_storage(&mut field)?;
        self.repository.save_field(&field)?;
        self.repository
            .remove_field(&field.entity_type, &bundle_old, &field.field_name)?;
        Ok(field)
    }

    fn fieldable_entity_type(&self, entity_type_id: &str) -> Result<Arc<EntityType>> {
        let entity_type = self.entity_types.definition(entity_type_id)?;
        if !entity_type.is_fieldable() {
            return Err(EntityError::UnsupportedCapability(format!(
                "Entity type '{}' does not support configurable fields",
                entity_type_id
            )));
        }
        Ok(entity_type)
    }

    /// Checks the field against its storage and bundle and attaches the storage.
    fn attach_storage(&self, field: &mut FieldConfig) -> Result<Arc<FieldStorageConfig>> {
        let entity_type = self.fieldable_entity_type(&field.entity_type)?;
        if entity_type.bundle_key_name().is_none() {
            return Err(EntityError::Validation(format!(
                "Entity type '{}' has no bundles to attach field '{}' to",
                field.entity_type, field.field_name
            )));
        }
        if !self.bundle_info.bundle_exists(&field.entity_type, &field.bundle)? {
            return Err(EntityError::Validation(format!(
                "Bundle '{}' of entity type '{}' does not exist",
                field.bundle, field.entity_type
            )));
        }
        let storage = self
            .repository
            .load_storage(&field.entity_type, &field.field_name)?
            .ok_or_else(|| {
                EntityError::ConfigNotFound(FieldStorageConfig::config_name_for(
                    &field.entity_type,
                    &field.field_name,
                ))
            })?;
        let storage = Arc::new(storage);
        field.field_type = storage.field_type.clone();
        field.attach_storage(Arc::clone(&storage));
        Ok(storage)
    }
}
