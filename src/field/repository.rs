use std::collections::BTreeMap;
use std::sync::Arc;

use super::field_config::FieldConfig;
use super::ledger::{
    DELETED_FIELDS_KEY, DELETED_STORAGES_KEY, DeletedFieldEntry, DeletedStorageEntry,
};
use super::storage_config::FieldStorageConfig;
use crate::core::Result;
use crate::storage::Store;

/// Reads and writes field configuration and the deleted-field ledgers.
///
/// Lookups by entity type or bundle are prefix scans over configuration
/// names, which keeps them equivalent to filtering on the `entity_type` and
/// `bundle` properties.
#[derive(Clone)]
pub struct FieldConfigRepository {
    store: Store,
}

impl FieldConfigRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn load_storage(&self, entity_type: &str, field_name: &str) -> Result<Option<FieldStorageConfig>> {
        self.store
            .config()
            .read_as(&FieldStorageConfig::config_name_for(entity_type, field_name))
    }

    /// Storages of one entity type, in configuration name order.
    pub fn storages_for(&self, entity_type: &str) -> Result<Vec<FieldStorageConfig>> {
        self.read_storages(&format!("{}.{}.", FieldStorageConfig::CONFIG_PREFIX, entity_type))
    }

    pub fn all_storages(&self) -> Result<Vec<FieldStorageConfig>> {
        self.read_storages(&format!("{}.", FieldStorageConfig::CONFIG_PREFIX))
    }

    pub(crate) fn save_storage(&self, storage: &FieldStorageConfig) -> Result<()> {
        self.store.config().write(&storage.config_name(), storage)
    }

    pub(crate) fn remove_storage(&self, entity_type: &str, field_name: &str) -> Result<bool> {
        self.store
            .config()
            .delete(&FieldStorageConfig::config_name_for(entity_type, field_name))
    }

    /// Loads one field with its storage attached.
    pub fn load_field(&self, entity_type: &str, bundle: &str, field_name: &str) -> Result<Option<FieldConfig>> {
        let field: Option<FieldConfig> = self
            .store
            .config()
            .read_as(&FieldConfig::config_name_for(entity_type, bundle, field_name))?;
        match field {
            Some(mut field) => {
                if let Some(storage) = self.load_storage(entity_type, field_name)? {
                    field.attach_storage(Arc::new(storage));
                }
                Ok(Some(field))
            }
            None => Ok(None),
        }
    }

    pub fn fields_for_bundle(&self, entity_type: &str, bundle: &str) -> Result<Vec<FieldConfig>> {
        self.read_fields(
            entity_type,
            &format!("{}.{}.{}.", FieldConfig::CONFIG_PREFIX, entity_type, bundle),
        )
    }

    pub fn fields_for_entity_type(&self, entity_type: &str) -> Result<Vec<FieldConfig>> {
        self.read_fields(
            entity_type,
            &format!("{}.{}.", FieldConfig::CONFIG_PREFIX, entity_type),
        )
    }

    /// Every bundle's field on one storage.
    pub fn fields_for_storage(&self, entity_type: &str, field_name: &str) -> Result<Vec<FieldConfig>> {
        Ok(self
            .fields_for_entity_type(entity_type)?
            .into_iter()
            .filter(|field| field.field_name == field_name)
            .collect())
    }

    pub(crate) fn save_field(&self, field: &FieldConfig) -> Result<()> {
        self.store.config().write(&field.config_name(), field)
    }

    pub(crate) fn remove_field(&self, entity_type: &str, bundle: &str, field_name: &str) -> Result<bool> {
        self.store
            .config()
            .delete(&FieldConfig::config_name_for(entity_type, bundle, field_name))
    }

    pub fn deleted_fields(&self) -> Result<BTreeMap<String, DeletedFieldEntry>> {
        self.store.state().get_or_default(DELETED_FIELDS_KEY)
    }

    pub(crate) fn set_deleted_fields(&self, entries: &BTreeMap<String, DeletedFieldEntry>) -> Result<()> {
        self.store.state().set(DELETED_FIELDS_KEY, entries)
    }

    /// Ledger entry of a deleted field, by field uuid.
    pub fn deleted_field(&self, uuid: &str) -> Result<Option<DeletedFieldEntry>> {
        Ok(self.deleted_fields()?.remove(uuid))
    }

    pub(crate) fn record_deleted_field(&self, entry: DeletedFieldEntry) -> Result<()> {
        let mut entries = self.deleted_fields()?;
        entries.insert(entry.field.uuid.clone(), entry);
        self.set_deleted_fields(&entries)
    }

    pub(crate) fn forget_deleted_field(&self, uuid: &str) -> Result<()> {
        let mut entries = self.deleted_fields()?;
        entries.remove(uuid);
        self.set_deleted_fields(&entries)
    }

    pub fn deleted_storages(&self) -> Result<BTreeMap<String, DeletedStorageEntry>> {
        self.store.state().get_or_default(DELETED_STORAGES_KEY)
    }

    pub(crate) fn record_deleted_storage(&self, entry: DeletedStorageEntry) -> Result<()> {
        let mut entries = self.deleted_storages()?;
        entries.insert(entry.field_storage.uuid.clone(), entry);
        self.store.state().set(DELETED_STORAGES_KEY, &entries)
    }

    pub(crate) fn forget_deleted_storage(&self, uuid: &str) -> Result<()> {
        let mut entries = self.deleted_storages()?;
        entries.remove(uuid);
        self.store.state().set(DELETED_STORAGES_KEY, &entries)
    }

    fn read_storages(&self, prefix: &str) -> Result<Vec<FieldStorageConfig>> {
        self.store
            .config()
            .read_prefix(prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(Into::into))
            .collect()
    }

    fn read_fields(&self, entity_type: &str, prefix: &str) -> Result<Vec<FieldConfig>> {
        let storages: BTreeMap<String, Arc<FieldStorageConfig>> = self
            .storages_for(entity_type)?
            .into_iter()
            .map(|storage| (storage.field_name.clone(), Arc::new(storage)))
            .collect();

        let mut fields = Vec::new();
        for (_, value) in self.store.config().read_prefix(prefix)? {
            let mut field: FieldConfig = serde_json::from_value(value)?;
            if let Some(storage) = storages.get(&field.field_name) {
                field.attach_storage(Arc::clone(storage));
            }
            fields.push(field);
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_prefix_scan_attaches_storage() {
        let repository = FieldConfigRepository::new(Store::in_memory());
        let storage = Arc::new(FieldStorageConfig::new("node", "field_tags", "string"));
        repository.save_storage(&storage).unwrap();
        repository.save_field(&FieldConfig::new(&storage, "page")).unwrap();
        repository.save_field(&FieldConfig::new(&storage, "page_two")).unwrap();

        let fields = repository.fields_for_bundle("node", "page").unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_storage().unwrap().uuid, storage.uuid);
        assert_eq!(repository.fields_for_storage("node", "field_tags").unwrap().len(), 2);
    }

    #[test]
    fn test_ledger_round_trip_by_uuid() {
        let repository = FieldConfigRepository::new(Store::in_memory());
        let storage = Arc::new(FieldStorageConfig::new("node", "field_tags", "string"));
        let field = FieldConfig::new(&storage, "page");
        let uuid = field.uuid.clone();

        repository
            .record_deleted_field(DeletedFieldEntry::new(field, (*storage).clone()))
            .unwrap();
        assert!(repository.deleted_field(&uuid).unwrap().is_some());
        repository.forget_deleted_field(&uuid).unwrap();
        assert!(repository.deleted_fields().unwrap().is_empty());
    }
}
