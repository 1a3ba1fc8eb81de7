use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::core::{EntityError, EntityId, FieldItemList, Result, RevisionId, normalize_items};

/// Field values of one translation, keyed by field name.
pub type FieldValues = IndexMap<String, FieldItemList>;

/// A loaded or newly created content entity.
///
/// Values are held per language; the default language is always present.
/// Entity keys (id, revision, uuid, bundle, langcode) live on the struct and
/// not among the field values.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntity {
    entity_type_id: String,
    id: Option<EntityId>,
    revision_id: Option<RevisionId>,
    loaded_revision_id: Option<RevisionId>,
    uuid: Option<String>,
    bundle: String,
    default_langcode: String,
    translations: BTreeMap<String, FieldValues>,
    is_new: bool,
    new_revision: bool,
    default_revision: bool,
    main_properties: Arc<BTreeMap<String, String>>,
}

impl ContentEntity {
    pub(crate) fn new(
        entity_type_id: &str,
        bundle: &str,
        default_langcode: &str,
        main_properties: Arc<BTreeMap<String, String>>,
    ) -> Self {
        let mut translations = BTreeMap::new();
        translations.insert(default_langcode.to_string(), FieldValues::new());
        Self {
            entity_type_id: entity_type_id.to_string(),
            id: None,
            revision_id: None,
            loaded_revision_id: None,
            uuid: None,
            bundle: bundle.to_string(),
            default_langcode: default_langcode.to_string(),
            translations,
            is_new: true,
            new_revision: false,
            default_revision: true,
            main_properties,
        }
    }

    pub fn entity_type_id(&self) -> &str {
        &self.entity_type_id
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn revision_id(&self) -> Option<RevisionId> {
        self.revision_id
    }

    /// Revision the entity was loaded at; compared against the stored
    /// default revision on save.
    pub fn loaded_revision_id(&self) -> Option<RevisionId> {
        self.loaded_revision_id
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn language(&self) -> &str {
        &self.default_langcode
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_new_revision(&self) -> bool {
        self.new_revision
    }

    /// Request a new revision on the next save.
    pub fn set_new_revision(&mut self, new_revision: bool) -> &mut Self {
        self.new_revision = new_revision;
        self
    }

    pub fn is_default_revision(&self) -> bool {
        self.default_revision
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldItemList> {
        self.translations
            .get(&self.default_langcode)
            .and_then(|values| values.get(field_name))
    }

    /// Main property of the first item, e.g. `value` or `target_id`.
    pub fn get_value(&self, field_name: &str) -> Option<&JsonValue> {
        let property = self.main_property(field_name);
        self.get(field_name)?.first()?.get(property)
    }

    pub fn set(&mut self, field_name: &str, value: impl Into<JsonValue>) -> &mut Self {
        let items = normalize_items(self.main_property(field_name), value.into());
        self.set_items(field_name, items)
    }

    pub fn set_items(&mut self, field_name: &str, items: FieldItemList) -> &mut Self {
        self.translations
            .entry(self.default_langcode.clone())
            .or_default()
            .insert(field_name.to_string(), items);
        self
    }

    /// Field names with values in the default language.
    pub fn field_names(&self) -> Vec<&str> {
        self.translations
            .get(&self.default_langcode)
            .map(|values| values.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_translation(&self, langcode: &str) -> bool {
        self.translations.contains_key(langcode)
    }

    pub fn translation_languages(&self) -> Vec<&str> {
        self.translations.keys().map(String::as_str).collect()
    }

    /// Adds a translation seeded with the default language's values.
    pub fn add_translation(&mut self, langcode: &str) -> Result<()> {
        if self.translations.contains_key(langcode) {
            return Err(EntityError::Validation(format!(
                "Translation '{}' already exists",
                langcode
            )));
        }
        let seed = self
            .translations
            .get(&self.default_langcode)
            .cloned()
            .unwrap_or_default();
        self.translations.insert(langcode.to_string(), seed);
        Ok(())
    }

    pub fn remove_translation(&mut self, langcode: &str) -> Result<()> {
        if langcode == self.default_langcode {
            return Err(EntityError::Validation(
                "The default translation cannot be removed".to_string(),
            ));
        }
        self.translations.remove(langcode);
        Ok(())
    }

    pub fn get_translated(&self, langcode: &str, field_name: &str) -> Option<&FieldItemList> {
        self.translations.get(langcode)?.get(field_name)
    }

    pub fn set_translated(
        &mut self,
        langcode: &str,
        field_name: &str,
        value: impl Into<JsonValue>,
    ) -> Result<()> {
        let items = normalize_items(self.main_property(field_name), value.into());
        let values = self.translations.get_mut(langcode).ok_or_else(|| {
            EntityError::Validation(format!("Translation '{}' does not exist", langcode))
        })?;
        values.insert(field_name.to_string(), items);
        Ok(())
    }

    fn main_property(&self, field_name: &str) -> &str {
        self.main_properties
            .get(field_name)
            .map(String::as_str)
            .unwrap_or("value")
    }

    pub(crate) fn translations(&self) -> &BTreeMap<String, FieldValues> {
        &self.translations
    }

    pub(crate) fn values_mut(&mut self, langcode: &str) -> &mut FieldValues {
        self.translations.entry(langcode.to_string()).or_default()
    }

    pub(crate) fn set_uuid(&mut self, uuid: String) {
        self.uuid = Some(uuid);
    }

    /// Stamps identity after a load or a successful save.
    pub(crate) fn mark_stored(
        &mut self,
        id: EntityId,
        revision_id: Option<RevisionId>,
        default_revision: bool,
    ) {
        self.id = Some(id);
        self.revision_id = revision_id;
        self.loaded_revision_id = revision_id;
        self.is_new = false;
        self.new_revision = false;
        self.default_revision = default_revision;
    }
}
