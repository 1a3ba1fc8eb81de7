use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::definition::{BaseFieldDefinition, FieldDefinition, FieldStorageDefinition};
use super::field_config::FieldConfig;
use super::repository::FieldConfigRepository;
use super::storage_config::FieldStorageConfig;
use crate::cache::CacheBackend;
use crate::core::Result;
use crate::entity::{BundleInfo, EntityTypeManager};

/// Base and bundle field definitions of one bundle, keyed by field name.
pub type FieldDefinitions = Arc<IndexMap<String, Arc<dyn FieldDefinition>>>;

/// One entry of the field map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMapEntry {
    #[serde(rename = "type")]
    pub field_type: String,
    pub bundles: BTreeSet<String>,
}

/// Resolves which fields apply to an entity type and bundle.
pub struct EntityFieldManager {
    entity_types: Arc<EntityTypeManager>,
    bundle_info: Arc<BundleInfo>,
    repository: FieldConfigRepository,
    definitions: Arc<dyn CacheBackend<FieldDefinitions>>,
}

impl EntityFieldManager {
    pub fn new(
        entity_types: Arc<EntityTypeManager>,
        bundle_info: Arc<BundleInfo>,
        repository: FieldConfigRepository,
        definitions: Arc<dyn CacheBackend<FieldDefinitions>>,
    ) -> Self {
        Self {
            entity_types,
            bundle_info,
            repository,
            definitions,
        }
    }

    pub fn base_field_definitions(
        &self,
        entity_type_id: &str,
    ) -> Result<IndexMap<String, Arc<BaseFieldDefinition>>> {
        Ok(self
            .entity_types
            .definition(entity_type_id)?
            .base_field_definitions()
            .clone())
    }

    /// Configurable field storages of an entity type. Entity types whose
    /// storage is not fieldable have none.
    pub fn field_storage_configs(
        &self,
        entity_type_id: &str,
    ) -> Result<IndexMap<String, Arc<FieldStorageConfig>>> {
        let entity_type = self.entity_types.definition(entity_type_id)?;
        if !entity_type.is_fieldable() {
            return Ok(IndexMap::new());
        }
        Ok(self
            .repository
            .storages_for(entity_type_id)?
            .into_iter()
            .filter(|storage| !storage.deleted)
            .map(|storage| (storage.field_name.clone(), Arc::new(storage)))
            .collect())
    }

    /// Base storage definitions followed by the configurable ones.
    pub fn field_storage_definitions(
        &self,
        entity_type_id: &str,
    ) -> Result<IndexMap<String, Arc<dyn FieldStorageDefinition>>> {
        let mut definitions: IndexMap<String, Arc<dyn FieldStorageDefinition>> = self
            .base_field_definitions(entity_type_id)?
            .into_iter()
            .map(|(name, definition)| (name, definition as Arc<dyn FieldStorageDefinition>))
            .collect();
        for (name, storage) in self.field_storage_configs(entity_type_id)? {
            definitions
                .entry(name)
                .or_insert(storage as Arc<dyn FieldStorageDefinition>);
        }
        Ok(definitions)
    }

    /// Configurable fields of one bundle.
    ///
    /// Empty for entity types that are not fieldable or have no bundle key.
    /// Fields shadowed by a base field of the same name are skipped.
    pub fn bundle_field_definitions(
        &self,
        entity_type_id: &str,
        bundle: &str,
        base_field_definitions: &IndexMap<String, Arc<BaseFieldDefinition>>,
    ) -> Result<IndexMap<String, Arc<FieldConfig>>> {
        let entity_type = self.entity_types.definition(entity_type_id)?;
        if !entity_type.is_fieldable() || entity_type.bundle_key_name().is_none() {
            return Ok(IndexMap::new());
        }

        let mut fields = IndexMap::new();
        for field in self.repository.fields_for_bundle(entity_type_id, bundle)? {
            if field.deleted || base_field_definitions.contains_key(&field.field_name) {
                continue;
            }
            if field.field_storage().is_err() {
                log::warn!(
                    "field {} has no field storage and is ignored",
                    field.id()
                );
                continue;
            }
            fields.insert(field.field_name.clone(), Arc::new(field));
        }
        Ok(fields)
    }

    /// Base plus bundle field definitions, cached per bundle.
    pub fn field_definitions(&self, entity_type_id: &str, bundle: &str) -> Result<FieldDefinitions> {
        let key = format!("{}:{}", entity_type_id, bundle);
        if let Some(cached) = self.definitions.get(&key) {
            return Ok(cached);
        }

        let base = self.base_field_definitions(entity_type_id)?;
        let mut definitions: IndexMap<String, Arc<dyn FieldDefinition>> = base
            .iter()
            .map(|(name, definition)| {
                (name.clone(), Arc::clone(definition) as Arc<dyn FieldDefinition>)
            })
            .collect();
        for (name, field) in self.bundle_field_definitions(entity_type_id, bundle, &base)? {
            definitions.insert(name, field as Arc<dyn FieldDefinition>);
        }

        let definitions = Arc::new(definitions);
        self.definitions.set(&key, Arc::clone(&definitions));
        Ok(definitions)
    }

    pub fn clear_cached_field_definitions(&self) {
        self.definitions.invalidate_all();
        self.bundle_info.clear_cached_bundles();
    }

    /// Every field of every entity type, with the bundles it appears in.
    pub fn field_map(&self) -> Result<BTreeMap<String, BTreeMap<String, FieldMapEntry>>> {
        let mut map = BTreeMap::new();
        for entity_type in self.entity_types.definitions() {
            let mut fields: BTreeMap<String, FieldMapEntry> = BTreeMap::new();
            let bundles: BTreeSet<String> = self
                .bundle_info
                .bundles(entity_type.id())?
                .keys()
                .cloned()
                .collect();

            for (name, definition) in entity_type.base_field_definitions() {
                fields.insert(
                    name.clone(),
                    FieldMapEntry {
                        field_type: definition.field_type().to_string(),
                        bundles: bundles.clone(),
                    },
                );
            }
            if entity_type.is_fieldable() {
                for field in self.repository.fields_for_entity_type(entity_type.id())? {
                    fields
                        .entry(field.field_name.clone())
                        .or_insert_with(|| FieldMapEntry {
                            field_type: field.field_type.clone(),
                            bundles: BTreeSet::new(),
                        })
                        .bundles
                        .insert(field.bundle.clone());
                }
            }
            map.insert(entity_type.id().to_string(), fields);
        }
        Ok(map)
    }
}
