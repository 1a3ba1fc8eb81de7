use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::manager::EntityTypeManager;
use crate::cache::CacheBackend;
use crate::core::{EntityError, Result, validate_machine_name};
use crate::storage::Store;

/// A bundle as stored in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub entity_type: String,
    pub bundle: String,
    pub label: String,
}

impl BundleRecord {
    pub const CONFIG_PREFIX: &'static str = "core.bundle";

    pub fn config_name(entity_type: &str, bundle: &str) -> String {
        format!("{}.{}.{}", Self::CONFIG_PREFIX, entity_type, bundle)
    }
}

/// Bundle labels keyed by machine name.
pub type BundleLabels = Arc<IndexMap<String, String>>;

/// Bundle-info service with its own cache bin.
pub struct BundleInfo {
    store: Store,
    entity_types: Arc<EntityTypeManager>,
    cache: Arc<dyn CacheBackend<BundleLabels>>,
}

impl BundleInfo {
    pub fn new(
        store: Store,
        entity_types: Arc<EntityTypeManager>,
        cache: Arc<dyn CacheBackend<BundleLabels>>,
    ) -> Self {
        Self {
            store,
            entity_types,
            cache,
        }
    }

    /// Bundles of `entity_type_id`. Types without a bundle key have a single
    /// implicit bundle named after the type.
    pub fn bundles(&self, entity_type_id: &str) -> Result<BundleLabels> {
        if let Some(cached) = self.cache.get(entity_type_id) {
            return Ok(cached);
        }
        let entity_type = self.entity_types.definition(entity_type_id)?;

        let mut bundles = IndexMap::new();
        if entity_type.bundle_key_name().is_none() {
            bundles.insert(
                entity_type.id().to_string(),
                entity_type.get_label().to_string(),
            );
        } else {
            let prefix = format!("{}.{}.", BundleRecord::CONFIG_PREFIX, entity_type_id);
            for (_, value) in self.store.config().read_prefix(&prefix)? {
                let record: BundleRecord = serde_json::from_value(value)?;
                bundles.insert(record.bundle, record.label);
            }
        }

        let bundles = Arc::new(bundles);
        self.cache.set(entity_type_id, Arc::clone(&bundles));
        Ok(bundles)
    }

    pub fn bundle_exists(&self, entity_type_id: &str, bundle: &str) -> Result<bool> {
        Ok(self.bundles(entity_type_id)?.contains_key(bundle))
    }

    pub(crate) fn save(&self, entity_type_id: &str, bundle: &str, label: &str) -> Result<()> {
        let entity_type = self.entity_types.definition(entity_type_id)?;
        if entity_type.bundle_key_name().is_none() {
            return Err(EntityError::Validation(format!(
                "Entity type '{}' does not support bundles",
                entity_type_id
            )));
        }
        validate_machine_name("Bundle", bundle)?;

        let record = BundleRecord {
            entity_type: entity_type_id.to_string(),
            bundle: bundle.to_string(),
            label: label.to_string(),
        };
        self.store
            .config()
            .write(&BundleRecord::config_name(entity_type_id, bundle), &record)?;
        self.cache.invalidate(&[entity_type_id]);
        Ok(())
    }

    pub(crate) fn remove(&self, entity_type_id: &str, bundle: &str) -> Result<bool> {
        let removed = self
            .store
            .config()
            .delete(&BundleRecord::config_name(entity_type_id, bundle))?;
        self.cache.invalidate(&[entity_type_id]);
        Ok(removed)
    }

    pub fn clear_cached_bundles(&self) {
        self.cache.invalidate_all();
    }
}
