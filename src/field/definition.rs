use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::core::{Cardinality, FieldItem, FieldItemList};

/// Entity-type-wide storage side of a field: type, cardinality, translatability.
pub trait FieldStorageDefinition: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn target_entity_type_id(&self) -> &str;

    fn field_type(&self) -> &str;

    fn cardinality(&self) -> Cardinality;

    fn is_translatable(&self) -> bool;

    fn is_revisionable(&self) -> bool {
        true
    }

    /// Base fields are defined in code by the entity type itself.
    fn is_base_field(&self) -> bool;

    fn is_deleted(&self) -> bool {
        false
    }

    /// Identifier that survives deletion; deleted tables are named after it.
    fn unique_storage_identifier(&self) -> String;
}

/// Bundle-facing side of a field: label, requiredness, defaults.
pub trait FieldDefinition: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn label(&self) -> &str;

    fn target_entity_type_id(&self) -> &str;

    /// `None` for base fields, which apply to every bundle.
    fn target_bundle(&self) -> Option<&str>;

    fn field_type(&self) -> &str;

    fn is_required(&self) -> bool;

    fn is_translatable(&self) -> bool;

    fn default_value(&self) -> &[FieldItem];

    fn storage_definition(&self) -> Option<Arc<dyn FieldStorageDefinition>>;
}

/// A field defined in code by its entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseFieldDefinition {
    name: String,
    entity_type_id: String,
    field_type: String,
    label: String,
    cardinality: Cardinality,
    translatable: bool,
    revisionable: bool,
    required: bool,
    default_value: FieldItemList,
    settings: Map<String, JsonValue>,
}

impl BaseFieldDefinition {
    pub fn create(field_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            entity_type_id: String::new(),
            field_type: field_type.into(),
            label: String::new(),
            cardinality: Cardinality::Limited(1),
            translatable: false,
            revisionable: false,
            required: false,
            default_value: Vec::new(),
            settings: Map::new(),
        }
    }

    pub fn set_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn set_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn set_translatable(mut self, translatable: bool) -> Self {
        self.translatable = translatable;
        self
    }

    pub fn set_revisionable(mut self, revisionable: bool) -> Self {
        self.revisionable = revisionable;
        self
    }

    pub fn set_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn set_default_value(mut self, items: FieldItemList) -> Self {
        self.default_value = items;
        self
    }

    pub fn set_setting(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.settings.insert(name.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn field_type(&self) -> &str {
        &self.field_type
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn settings(&self) -> &Map<String, JsonValue> {
        &self.settings
    }

    /// Binds the definition to its entity type and name; done on registration.
    pub(crate) fn bind(mut self, entity_type_id: &str, name: &str) -> Self {
        self.entity_type_id = entity_type_id.to_string();
        self.name = name.to_string();
        if self.label.is_empty() {
            self.label = name.to_string();
        }
        self
    }
}

impl FieldStorageDefinition for BaseFieldDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_entity_type_id(&self) -> &str {
        &self.entity_type_id
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

    fn is_revisionable(&self) -> bool {
        self.revisionable
    }

    fn is_base_field(&self) -> bool {
        true
    }

    fn unique_storage_identifier(&self) -> String {
        format!("{}-{}", self.entity_type_id, self.name)
    }
}

impl FieldDefinition for BaseFieldDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn target_entity_type_id(&self) -> &str {
        &self.entity_type_id
    }

    fn target_bundle(&self) -> Option<&str> {
        None
    }

    fn field_type(&self) -> &str {
        &self.field_type
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn is_translatable(&self) -> bool {
        self.translatable
    }

    fn default_value(&self) -> &[FieldItem] {
        &self.default_value
    }

    fn storage_definition(&self) -> Option<Arc<dyn FieldStorageDefinition>> {
        Some(Arc::new(self.clone()))
    }
}
