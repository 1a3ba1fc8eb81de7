use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::definition::{FieldDefinition, FieldStorageDefinition};
use super::storage_config::FieldStorageConfig;
use crate::core::{EntityError, FieldItem, FieldItemList, Result};

/// Attachment of a field storage to one bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub uuid: String,
    pub entity_type: String,
    pub bundle: String,
    pub field_name: String,
    pub field_type: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub translatable: bool,
    #[serde(default)]
    pub default_value: FieldItemList,
    #[serde(default)]
    pub settings: Map<String, JsonValue>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(skip)]
    field_storage: Option<Arc<FieldStorageConfig>>,
}

fn default_true() -> bool {
    true
}

impl FieldConfig {
    pub const CONFIG_PREFIX: &'static str = "field.field";

    pub fn new(field_storage: &Arc<FieldStorageConfig>, bundle: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            entity_type: field_storage.entity_type.clone(),
            bundle: bundle.into(),
            field_name: field_storage.field_name.clone(),
            field_type: field_storage.field_type.clone(),
            label: field_storage.field_name.clone(),
            description: String::new(),
            required: false,
            translatable: true,
            default_value: Vec::new(),
            settings: Map::new(),
            deleted: false,
            field_storage: Some(Arc::clone(field_storage)),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_translatable(mut self, translatable: bool) -> Self {
        self.translatable = translatable;
        self
    }

    pub fn with_default_value(mut self, items: FieldItemList) -> Self {
        self.default_value = items;
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.settings.insert(name.into(), value);
        self
    }

    pub fn id(&self) -> String {
        format!("{}.{}.{}", self.entity_type, self.bundle, self.field_name)
    }

    pub fn config_name(&self) -> String {
        Self::config_name_for(&self.entity_type, &self.bundle, &self.field_name)
    }

    pub fn config_name_for(entity_type: &str, bundle: &str, field_name: &str) -> String {
        format!("{}.{}.{}.{}", Self::CONFIG_PREFIX, entity_type, bundle, field_name)
    }

    pub fn name(&self) -> &str {
        &self.field_name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn field_storage(&self) -> Result<Arc<FieldStorageConfig>> {
        self.field_storage.clone().ok_or_else(|| {
            EntityError::ConfigNotFound(FieldStorageConfig::config_name_for(
                &self.entity_type,
                &self.field_name,
            ))
        })
    }

    pub(crate) fn attach_storage(&mut self, field_storage: Arc<FieldStorageConfig>) {
        self.field_storage = Some(field_storage);
    }

    /// Moves the field to another bundle, keeping its uuid and settings.
    pub(crate) fn rekey_bundle(&mut self, bundle: &str) {
        self.bundle = bundle.to_string();
    }
}

impl FieldDefinition for FieldConfig {
    fn name(&self) -> &str {
        &self.field_name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn target_entity_type_id(&self) -> &str {
        &self.entity_type
    }

    fn target_bundle(&self) -> Option<&str> {
        Some(&self.bundle)
    }

    fn field_type(&self) -> &str {
        &self.field_type
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn is_translatable(&self) -> bool {
        self.translatable
            && self
                .field_storage
                .as_ref()
                .is_some_and(|storage| storage.translatable)
    }

    fn default_value(&self) -> &[FieldItem] {
        &self.default_value
    }

    fn storage_definition(&self) -> Option<Arc<dyn FieldStorageDefinition>> {
        self.field_storage
            .clone()
            .map(|storage| storage as Arc<dyn FieldStorageDefinition>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Cardinality;

    #[test]
    fn test_field_config_ids_and_storage_link() {
        let storage = Arc::new(
            FieldStorageConfig::new("node", "field_subtitle", "string")
                .with_cardinality(Cardinality::Limited(1)),
        );
        let field = FieldConfig::new(&storage, "page").with_label("Subtitle");
        assert_eq!(field.id(), "node.page.field_subtitle");
        assert_eq!(field.config_name(), "field.field.node.page.field_subtitle");
        assert_eq!(field.field_storage().unwrap().uuid, storage.uuid);
        assert!(FieldDefinition::is_translatable(&field));
    }

    #[test]
    fn test_storage_is_not_serialized() {
        let storage = Arc::new(FieldStorageConfig::new("node", "field_tags", "entity_reference"));
        let field = FieldConfig::new(&storage, "article");
        let json = serde_json::to_value(&field).unwrap();
        assert!(json.get("field_storage").is_none());
        let restored: FieldConfig = serde_json::from_value(json).unwrap();
        assert!(restored.field_storage().is_err());
        assert_eq!(restored.uuid, field.uuid);
    }
}
