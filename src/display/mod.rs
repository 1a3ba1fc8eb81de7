//! View and form display configuration.
//!
//! A display is only stored once someone customizes it. Until then the
//! repository hands out a synthesized default that reads exactly like a
//! stored one but does not show up in listings.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::core::{EntityError, Result};
use crate::field::{EntityFieldManager, FieldTypeManager};
use crate::storage::Store;

pub const DEFAULT_MODE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayContext {
    View,
    Form,
}

impl DisplayContext {
    pub fn config_prefix(&self) -> &'static str {
        match self {
            Self::View => "core.entity_view_display",
            Self::Form => "core.entity_form_display",
        }
    }
}

impl fmt::Display for DisplayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => f.write_str("view"),
            Self::Form => f.write_str("form"),
        }
    }
}

/// How one field is rendered (formatter) or edited (widget).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayComponent {
    #[serde(rename = "type")]
    pub plugin: String,
    #[serde(default)]
    pub settings: Map<String, JsonValue>,
    #[serde(default)]
    pub weight: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "content".to_string()
}

impl DisplayComponent {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            settings: Map::new(),
            weight: 0,
            label: None,
            region: default_region(),
        }
    }

    pub fn weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.settings.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDisplay {
    pub target_entity_type: String,
    pub bundle: String,
    pub mode: String,
    pub context: DisplayContext,
    pub status: bool,
    #[serde(default)]
    pub content: IndexMap<String, DisplayComponent>,
    #[serde(default)]
    pub hidden: BTreeSet<String>,
    #[serde(skip)]
    is_new: bool,
}

impl EntityDisplay {
    pub fn new(context: DisplayContext, entity_type: &str, bundle: &str, mode: &str) -> Self {
        Self {
            target_entity_type: entity_type.to_string(),
            bundle: bundle.to_string(),
            mode: mode.to_string(),
            context,
            status: true,
            content: IndexMap::new(),
            hidden: BTreeSet::new(),
            is_new: true,
        }
    }

    pub fn id(&self) -> String {
        format!("{}.{}.{}", self.target_entity_type, self.bundle, self.mode)
    }

    pub fn config_name(&self) -> String {
        Self::config_name_for(self.context, &self.target_entity_type, &self.bundle, &self.mode)
    }

    pub fn config_name_for(context: DisplayContext, entity_type: &str, bundle: &str, mode: &str) -> String {
        format!("{}.{}.{}.{}", context.config_prefix(), entity_type, bundle, mode)
    }

    /// Whether the display has never been saved.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get_component(&self, field_name: &str) -> Option<&DisplayComponent> {
        self.content.get(field_name)
    }

    pub fn set_component(&mut self, field_name: &str, component: DisplayComponent) -> &mut Self {
        self.hidden.remove(field_name);
        self.content.insert(field_name.to_string(), component);
        self
    }

    /// Hides the field; it stays known to the display.
    pub fn remove_component(&mut self, field_name: &str) -> &mut Self {
        self.content.shift_remove(field_name);
        self.hidden.insert(field_name.to_string());
        self
    }

    /// Visible components ordered by weight, ties in insertion order.
    pub fn components(&self) -> Vec<(&str, &DisplayComponent)> {
        let mut components: Vec<(&str, &DisplayComponent)> = self
            .content
            .iter()
            .map(|(name, component)| (name.as_str(), component))
            .collect();
        components.sort_by_key(|(_, component)| component.weight);
        components
    }

    fn forget_field(&mut self, field_name: &str) -> bool {
        let removed = self.content.shift_remove(field_name).is_some();
        removed | self.hidden.remove(field_name)
    }
}

/// Loads, synthesizes and stores displays.
pub struct DisplayRepository {
    store: Store,
    fields: Arc<EntityFieldManager>,
    field_types: Arc<FieldTypeManager>,
}

impl DisplayRepository {
    pub fn new(store: Store, fields: Arc<EntityFieldManager>, field_types: Arc<FieldTypeManager>) -> Self {
        Self {
            store,
            fields,
            field_types,
        }
    }

    pub fn view_display(&self, entity_type: &str, bundle: &str, mode: &str) -> Result<EntityDisplay> {
        self.display(DisplayContext::View, entity_type, bundle, mode)
    }

    pub fn form_display(&self, entity_type: &str, bundle: &str, mode: &str) -> Result<EntityDisplay> {
        self.display(DisplayContext::Form, entity_type, bundle, mode)
    }

    /// The stored display, or a default one that is not persisted.
    pub fn display(
        &self,
        context: DisplayContext,
        entity_type: &str,
        bundle: &str,
        mode: &str,
    ) -> Result<EntityDisplay> {
        if let Some(display) = self.load(context, entity_type, bundle, mode)? {
            return Ok(display);
        }
        self.synthesize(context, entity_type, bundle, mode)
    }

    pub fn load(
        &self,
        context: DisplayContext,
        entity_type: &str,
        bundle: &str,
        mode: &str,
    ) -> Result<Option<EntityDisplay>> {
        self.store
            .config()
            .read_as(&EntityDisplay::config_name_for(context, entity_type, bundle, mode))
    }

    /// Persists the display after checking every component names a field of its bundle.
    pub fn save(&self, display: &mut EntityDisplay) -> Result<()> {
        let definitions = self
            .fields
            .field_definitions(&display.target_entity_type, &display.bundle)?;
        if let Some(unknown) = display
            .content
            .keys()
            .chain(display.hidden.iter())
            .find(|name| !definitions.contains_key(name.as_str()))
        {
            return Err(EntityError::Validation(format!(
                "Display {} references unknown field '{}'",
                display.id(),
                unknown
            )));
        }
        self.store.config().write(&display.config_name(), display)?;
        display.is_new = false;
        log::debug!("saved {} display {}", display.context, display.id());
        Ok(())
    }

    pub fn delete(
        &self,
        context: DisplayContext,
        entity_type: &str,
        bundle: &str,
        mode: &str,
    ) -> Result<bool> {
        self.store
            .config()
            .delete(&EntityDisplay::config_name_for(context, entity_type, bundle, mode))
    }

    /// Ids of stored displays, optionally restricted to one entity type.
    pub fn list(&self, context: DisplayContext, entity_type: Option<&str>) -> Result<Vec<String>> {
        let prefix = match entity_type {
            Some(entity_type) => format!("{}.{}.", context.config_prefix(), entity_type),
            None => format!("{}.", context.config_prefix()),
        };
        let strip = context.config_prefix().len() + 1;
        Ok(self
            .store
            .config()
            .list(&prefix)?
            .into_iter()
            .map(|name| name[strip..].to_string())
            .collect())
    }

    /// Sets or hides one field's component, creating the display if needed.
    pub fn set_field_component(
        &self,
        context: DisplayContext,
        entity_type: &str,
        bundle: &str,
        mode: &str,
        field_name: &str,
        component: Option<DisplayComponent>,
    ) -> Result<EntityDisplay> {
        let mut display = self.display(context, entity_type, bundle, mode)?;
        match component {
            Some(component) => display.set_component(field_name, component),
            None => display.remove_component(field_name),
        };
        self.save(&mut display)?;
        Ok(display)
    }

    /// Drops a deleted field from every stored display of its bundle.
    pub fn remove_field_components(&self, entity_type: &str, bundle: &str, field_name: &str) -> Result<usize> {
        let mut changed = 0;
        for mut display in self.bundle_displays(entity_type, bundle)? {
            if display.forget_field(field_name) {
                self.store.config().write(&display.config_name(), &display)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub fn rename_bundle(&self, entity_type: &str, bundle_old: &str, bundle_new: &str) -> Result<usize> {
        let displays = self.bundle_displays(entity_type, bundle_old)?;
        for mut display in displays.iter().cloned() {
            let old_name = display.config_name();
            display.bundle = bundle_new.to_string();
            self.store.config().write(&display.config_name(), &display)?;
            self.store.config().delete(&old_name)?;
        }
        Ok(displays.len())
    }

    pub fn delete_bundle(&self, entity_type: &str, bundle: &str) -> Result<usize> {
        let displays = self.bundle_displays(entity_type, bundle)?;
        for display in &displays {
            self.store.config().delete(&display.config_name())?;
        }
        Ok(displays.len())
    }

    fn bundle_displays(&self, entity_type: &str, bundle: &str) -> Result<Vec<EntityDisplay>> {
        let mut displays = Vec::new();
        for context in [DisplayContext::View, DisplayContext::Form] {
            let prefix = format!("{}.{}.{}.", context.config_prefix(), entity_type, bundle);
            for (_, value) in self.store.config().read_prefix(&prefix)? {
                displays.push(serde_json::from_value(value)?);
            }
        }
        Ok(displays)
    }

    fn synthesize(
        &self,
        context: DisplayContext,
        entity_type: &str,
        bundle: &str,
        mode: &str,
    ) -> Result<EntityDisplay> {
        let mut display = EntityDisplay::new(context, entity_type, bundle, mode);
        let base = self.fields.base_field_definitions(entity_type)?;
        let fields = self.fields.bundle_field_definitions(entity_type, bundle, &base)?;
        for (weight, (name, field)) in (0i32..).zip(fields.iter()) {
            let Some(field_type) = self.field_types.get_definition(&field.field_type) else {
                continue;
            };
            let plugin = match context {
                DisplayContext::View => &field_type.default_formatter,
                DisplayContext::Form => &field_type.default_widget,
            };
            let mut component = DisplayComponent::new(plugin.clone()).weight(weight);
            if context == DisplayContext::View {
                component = component.label("above");
            }
            display.content.insert(name.clone(), component);
        }
        Ok(display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_sorted_by_weight() {
        let mut display = EntityDisplay::new(DisplayContext::View, "node", "page", DEFAULT_MODE);
        display
            .set_component("body", DisplayComponent::new("text_default").weight(5))
            .set_component("field_tags", DisplayComponent::new("entity_reference_label").weight(-1));
        let order: Vec<&str> = display.components().into_iter().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["field_tags", "body"]);

        display.remove_component("body");
        assert!(display.get_component("body").is_none());
        assert!(display.hidden.contains("body"));
        assert_eq!(display.config_name(), "core.entity_view_display.node.page.default");
    }

    #[test]
    fn test_deserialized_display_is_not_new() {
        let display = EntityDisplay::new(DisplayContext::Form, "node", "page", DEFAULT_MODE);
        assert!(display.is_new());
        let restored: EntityDisplay =
            serde_json::from_value(serde_json::to_value(&display).unwrap()).unwrap();
        assert!(!restored.is_new());
    }
}
