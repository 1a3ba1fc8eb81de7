//! Bundle rename and delete cascades for fields, displays and stored rows.

use std::sync::Arc;

use super::definition::FieldStorageDefinition;
use super::manager::FieldConfigManager;
use super::registry::EntityFieldManager;
use crate::core::Result;
use crate::display::DisplayRepository;
use crate::entity::EntityTypeManager;
use crate::hooks::BundleLifecycleHandler;
use crate::storage::SchemaManager;

/// Moves or deletes the fields of a bundle.
pub struct FieldBundleHandler {
    entity_types: Arc<EntityTypeManager>,
    manager: Arc<FieldConfigManager>,
    fields: Arc<EntityFieldManager>,
    schema: Arc<SchemaManager>,
}

impl FieldBundleHandler {
    pub fn new(
        entity_types: Arc<EntityTypeManager>,
        manager: Arc<FieldConfigManager>,
        fields: Arc<EntityFieldManager>,
        schema: Arc<SchemaManager>,
    ) -> Self {
        Self {
            entity_types,
            manager,
            fields,
            schema,
        }
    }
}

impl BundleLifecycleHandler for FieldBundleHandler {
    /// Live fields are saved again under the new bundle. Deleted fields are
    /// re-keyed inside the ledger only, so no save path can bring them back.
    fn on_bundle_rename(&self, entity_type_id: &str, bundle_old: &str, bundle_new: &str) -> Result<()> {
        let entity_type = self.entity_types.definition(entity_type_id)?;
        let repository = self.manager.repository();

        let mut moved = 0;
        for field in repository.fields_for_bundle(entity_type_id, bundle_old)? {
            self.manager.move_field(field, bundle_new)?;
            moved += 1;
        }

        let mut entries = repository.deleted_fields()?;
        let mut storages: Vec<Arc<dyn FieldStorageDefinition>> = self
            .fields
            .field_storage_definitions(entity_type_id)?
            .into_values()
            .collect();
        let mut rekeyed = 0;
        for entry in entries.values_mut() {
            if entry.field.entity_type == entity_type_id && entry.field.bundle == bundle_old {
                entry.field.rekey_bundle(bundle_new);
                if entry.field_storage.deleted {
                    storages.push(Arc::new(entry.field_storage.clone()));
                }
                rekeyed += 1;
            }
        }
        if rekeyed > 0 {
            repository.set_deleted_fields(&entries)?;
        }

        let rows = self
            .schema
            .on_bundle_rename(&entity_type, bundle_old, bundle_new, &storages)?;
        self.fields.clear_cached_field_definitions();
        log::info!(
            "renamed bundle {}.{} to {}: {} fields moved, {} deleted fields re-keyed, {} rows updated",
            entity_type_id,
            bundle_old,
            bundle_new,
            moved,
            rekeyed,
            rows
        );
        Ok(())
    }

    fn on_bundle_delete(&self, entity_type_id: &str, bundle: &str) -> Result<()> {
        let fields = self
            .manager
            .repository()
            .fields_for_bundle(entity_type_id, bundle)?;
        for field in &fields {
            self.manager
                .delete_field(entity_type_id, bundle, &field.field_name)?;
        }
        self.fields.clear_cached_field_definitions();
        log::info!(
            "deleted bundle {}.{}: {} fields marked deleted",
            entity_type_id,
            bundle,
            fields.len()
        );
        Ok(())
    }
}

/// Re-keys or removes the stored displays of a bundle.
pub struct DisplayBundleHandler {
    displays: Arc<DisplayRepository>,
}

impl DisplayBundleHandler {
    pub fn new(displays: Arc<DisplayRepository>) -> Self {
        Self { displays }
    }
}

impl BundleLifecycleHandler for DisplayBundleHandler {
    fn on_bundle_rename(&self, entity_type_id: &str, bundle_old: &str, bundle_new: &str) -> Result<()> {
        let count = self
            .displays
            .rename_bundle(entity_type_id, bundle_old, bundle_new)?;
        log::debug!("re-keyed {} displays of {}.{}", count, entity_type_id, bundle_old);
        Ok(())
    }

    fn on_bundle_delete(&self, entity_type_id: &str, bundle: &str) -> Result<()> {
        let count = self.displays.delete_bundle(entity_type_id, bundle)?;
        log::debug!("deleted {} displays of {}.{}", count, entity_type_id, bundle);
        Ok(())
    }
}
