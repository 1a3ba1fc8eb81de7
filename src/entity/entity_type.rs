use std::sync::Arc;

use indexmap::IndexMap;

use crate::core::{Result, validate_machine_name};
use crate::field::BaseFieldDefinition;

/// Names of the fields that carry an entity's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKeys {
    pub id: String,
    pub revision: Option<String>,
    pub bundle: Option<String>,
    pub uuid: Option<String>,
    pub langcode: Option<String>,
    pub label: Option<String>,
}

impl Default for EntityKeys {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            revision: None,
            bundle: None,
            uuid: None,
            langcode: None,
            label: None,
        }
    }
}

/// Definition of a content entity type, fixed after discovery.
#[derive(Debug, Clone)]
pub struct EntityType {
    id: String,
    label: String,
    provider: String,
    keys: EntityKeys,
    translatable: bool,
    fieldable: bool,
    base_fields: IndexMap<String, Arc<BaseFieldDefinition>>,
}

impl EntityType {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            provider: "core".to_string(),
            keys: EntityKeys::default(),
            translatable: false,
            fieldable: true,
            base_fields: IndexMap::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn id_key(mut self, key: impl Into<String>) -> Self {
        self.keys.id = key.into();
        self
    }

    pub fn revision_key(mut self, key: impl Into<String>) -> Self {
        self.keys.revision = Some(key.into());
        self
    }

    pub fn bundle_key(mut self, key: impl Into<String>) -> Self {
        self.keys.bundle = Some(key.into());
        self
    }

    pub fn uuid_key(mut self, key: impl Into<String>) -> Self {
        self.keys.uuid = Some(key.into());
        self
    }

    pub fn langcode_key(mut self, key: impl Into<String>) -> Self {
        self.keys.langcode = Some(key.into());
        self
    }

    pub fn label_key(mut self, key: impl Into<String>) -> Self {
        self.keys.label = Some(key.into());
        self
    }

    pub fn translatable(mut self, translatable: bool) -> Self {
        self.translatable = translatable;
        self
    }

    /// Whether the storage accepts configurable fields.
    pub fn fieldable(mut self, fieldable: bool) -> Self {
        self.fieldable = fieldable;
        self
    }

    pub fn base_field(mut self, name: impl Into<String>, definition: BaseFieldDefinition) -> Self {
        let name = name.into();
        let definition = definition.bind(&self.id, &name);
        self.base_fields.insert(name, Arc::new(definition));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get_label(&self) -> &str {
        &self.label
    }

    pub fn get_provider(&self) -> &str {
        &self.provider
    }

    pub fn keys(&self) -> &EntityKeys {
        &self.keys
    }

    pub fn id_key_name(&self) -> &str {
        &self.keys.id
    }

    pub fn has_key(&self, key: &str) -> bool {
        match key {
            "id" => true,
            "revision" => self.keys.revision.is_some(),
            "bundle" => self.keys.bundle.is_some(),
            "uuid" => self.keys.uuid.is_some(),
            "langcode" => self.keys.langcode.is_some(),
            "label" => self.keys.label.is_some(),
            _ => false,
        }
    }

    pub fn bundle_key_name(&self) -> Option<&str> {
        self.keys.bundle.as_deref()
    }

    pub fn revision_key_name(&self) -> Option<&str> {
        self.keys.revision.as_deref()
    }

    pub fn uuid_key_name(&self) -> Option<&str> {
        self.keys.uuid.as_deref()
    }

    pub fn langcode_key_name(&self) -> Option<&str> {
        self.keys.langcode.as_deref()
    }

    pub fn is_revisionable(&self) -> bool {
        self.keys.revision.is_some()
    }

    pub fn is_translatable(&self) -> bool {
        self.translatable && self.keys.langcode.is_some()
    }

    pub fn is_fieldable(&self) -> bool {
        self.fieldable
    }

    /// Whether `name` is one of the entity keys (id, revision, bundle, uuid, langcode).
    pub fn is_key_field(&self, name: &str) -> bool {
        name == self.keys.id
            || [
                &self.keys.revision,
                &self.keys.bundle,
                &self.keys.uuid,
                &self.keys.langcode,
            ]
            .into_iter()
            .any(|key| key.as_deref() == Some(name))
    }

    /// Base fields, key fields first.
    pub fn base_field_definitions(&self) -> &IndexMap<String, Arc<BaseFieldDefinition>> {
        &self.base_fields
    }

    /// Validates the definition and adds base fields for the entity keys.
    pub(crate) fn finalize(mut self) -> Result<Self> {
        validate_machine_name("Entity type", &self.id)?;

        let mut keyed = IndexMap::new();
        let mut add_key = |name: &str, field_type: &str, label: &str| {
            let definition = BaseFieldDefinition::create(field_type)
                .set_label(label)
                .bind(&self.id, name);
            keyed.insert(name.to_string(), Arc::new(definition));
        };
        add_key(&self.keys.id, "integer", "ID");
        if let Some(key) = &self.keys.uuid {
            add_key(key, "uuid", "UUID");
        }
        if let Some(key) = &self.keys.revision {
            add_key(key, "integer", "Revision ID");
        }
        if let Some(key) = &self.keys.bundle {
            add_key(key, "string", "Bundle");
        }
        if let Some(key) = &self.keys.langcode {
            add_key(key, "language", "Language");
        }

        for (name, definition) in self.base_fields.drain(..) {
            keyed.entry(name).or_insert(definition);
        }
        self.base_fields = keyed;
        Ok(self)
    }
}
