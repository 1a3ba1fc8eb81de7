use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::definition::FieldStorageDefinition;
use crate::core::Cardinality;

/// Configurable field storage shared by every bundle of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStorageConfig {
    pub uuid: String,
    pub entity_type: String,
    pub field_name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    /// Module providing the field type; filled in on creation.
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub settings: Map<String, JsonValue>,
    #[serde(default = "default_true")]
    pub translatable: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub persist_with_no_fields: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_true() -> bool {
    true
}

impl FieldStorageConfig {
    pub const CONFIG_PREFIX: &'static str = "field.storage";

    pub fn new(
        entity_type: impl Into<String>,
        field_name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            field_name: field_name.into(),
            field_type: field_type.into(),
            module: String::new(),
            cardinality: Cardinality::Limited(1),
            settings: Map::new(),
            translatable: true,
            locked: false,
            persist_with_no_fields: false,
            deleted: false,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.settings.insert(name.into(), value);
        self
    }

    pub fn with_translatable(mut self, translatable: bool) -> Self {
        self.translatable = translatable;
        self
    }

    pub fn with_persist_with_no_fields(mut self, persist: bool) -> Self {
        self.persist_with_no_fields = persist;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn id(&self) -> String {
        format!("{}.{}", self.entity_type, self.field_name)
    }

    pub fn config_name(&self) -> String {
        Self::config_name_for(&self.entity_type, &self.field_name)
    }

    pub fn config_name_for(entity_type: &str, field_name: &str) -> String {
        format!("{}.{}.{}", Self::CONFIG_PREFIX, entity_type, field_name)
    }

    /// Field storages are labelled by their machine name.
    pub fn label(&self) -> &str {
        &self.field_name
    }

    pub fn name(&self) -> &str {
        &self.field_name
    }

    pub fn type_provider(&self) -> &str {
        &self.module
    }
}

impl FieldStorageDefinition for FieldStorageConfig {
    fn name(&self) -> &str {
        &self.field_name
    }

    fn target_entity_type_id(&self) -> &str {
        &self.entity_type
    }

    fn field_type(&self) -> &str {
        &self.field_type
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn is_translatable(&self) -> bool {
        self.translatable
    }

    fn is_base_field(&self) -> bool {
        false
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn unique_storage_identifier(&self) -> String {
        self.uuid.clone()
    }
}
