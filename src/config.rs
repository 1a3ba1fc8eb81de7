use serde::{Deserialize, Serialize};

use crate::core::{EntityError, Result};
use crate::storage::ConfigStore;

/// Field system settings, stored as the `field.settings` configuration object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSettings {
    /// Maximum number of entities whose deleted field data one purge pass removes
    pub purge_batch_size: usize,

    /// Entities kept in each entity type's static cache
    pub entity_cache_capacity: usize,

    /// (entity type, bundle) pairs kept in the field definition cache
    pub definition_cache_capacity: usize,
}

impl FieldSettings {
    pub const CONFIG_NAME: &'static str = "field.settings";

    pub fn new() -> Self {
        Self {
            purge_batch_size: 50,
            entity_cache_capacity: 1024,
            definition_cache_capacity: 256,
        }
    }

    /// Set the purge batch size
    pub fn purge_batch_size(mut self, size: usize) -> Self {
        self.purge_batch_size = size;
        self
    }

    /// Set the entity cache capacity
    pub fn entity_cache_capacity(mut self, capacity: usize) -> Self {
        self.entity_cache_capacity = capacity;
        self
    }

    /// Set the field definition cache capacity
    pub fn definition_cache_capacity(mut self, capacity: usize) -> Self {
        self.definition_cache_capacity = capacity;
        self
    }

    /// Parse from a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Active settings, or the defaults when none were saved.
    pub fn load(config: &ConfigStore) -> Result<Self> {
        Ok(config
            .read_as::<Self>(Self::CONFIG_NAME)?
            .unwrap_or_default())
    }

    pub fn save(&self, config: &ConfigStore) -> Result<()> {
        self.validate()?;
        config.write(Self::CONFIG_NAME, self)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.purge_batch_size == 0 {
            return Err(EntityError::Validation(
                "purge_batch_size must be > 0".to_string(),
            ));
        }
        if self.entity_cache_capacity == 0 || self.definition_cache_capacity == 0 {
            return Err(EntityError::Validation(
                "cache capacities must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_fills_defaults() {
        let settings = FieldSettings::from_json(r#"{"purge_batch_size": 5}"#).unwrap();
        assert_eq!(settings.purge_batch_size, 5);
        assert_eq!(settings.entity_cache_capacity, 1024);
        assert!(FieldSettings::from_json(r#"{"purge_batch_size": 0}"#).is_err());
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let config = ConfigStore::new();
        assert_eq!(FieldSettings::load(&config).unwrap(), FieldSettings::default());

        FieldSettings::new().purge_batch_size(10).save(&config).unwrap();
        assert_eq!(FieldSettings::load(&config).unwrap().purge_batch_size, 10);
    }
}
