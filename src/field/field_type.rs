use std::collections::BTreeMap;

use crate::core::{DataType, EntityError, Result};

/// One storage column contributed by a field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A field type plugin: its columns and the module that provides it.
#[derive(Debug, Clone)]
pub struct FieldTypeDefinition {
    pub id: String,
    pub label: String,
    pub provider: String,
    pub columns: Vec<ColumnDefinition>,
    pub main_property: String,
    pub default_widget: String,
    pub default_formatter: String,
}

impl FieldTypeDefinition {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            default_widget: format!("{}_default", id),
            default_formatter: format!("{}_default", id),
            id,
            provider: provider.into(),
            columns: Vec::new(),
            main_property: "value".to_string(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnDefinition::new(name, data_type));
        self
    }

    pub fn main_property(mut self, name: impl Into<String>) -> Self {
        self.main_property = name.into();
        self
    }

    pub fn widget(mut self, widget: impl Into<String>) -> Self {
        self.default_widget = widget.into();
        self
    }

    pub fn formatter(mut self, formatter: impl Into<String>) -> Self {
        self.default_formatter = formatter.into();
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Registry of field type plugins, fixed once discovery is done.
#[derive(Debug, Clone, Default)]
pub struct FieldTypeManager {
    definitions: BTreeMap<String, FieldTypeDefinition>,
}

impl FieldTypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field types shipped by core and the text, options and datetime modules.
    pub fn with_core_types() -> Self {
        let mut manager = Self::new();
        let core_types = [
            FieldTypeDefinition::new("string", "core")
                .label("Text (plain)")
                .column("value", DataType::Text)
                .widget("string_textfield")
                .formatter("string"),
            FieldTypeDefinition::new("string_long", "core")
                .label("Text (plain, long)")
                .column("value", DataType::Text)
                .widget("string_textarea")
                .formatter("basic_string"),
            FieldTypeDefinition::new("integer", "core")
                .label("Number (integer)")
                .column("value", DataType::Integer)
                .widget("number")
                .formatter("number_integer"),
            FieldTypeDefinition::new("decimal", "core")
                .label("Number (decimal)")
                .column("value", DataType::Float)
                .widget("number")
                .formatter("number_decimal"),
            FieldTypeDefinition::new("boolean", "core")
                .label("Boolean")
                .column("value", DataType::Boolean)
                .widget("boolean_checkbox")
                .formatter("boolean"),
            FieldTypeDefinition::new("entity_reference", "core")
                .label("Entity reference")
                .column("target_id", DataType::Integer)
                .main_property("target_id")
                .widget("entity_reference_autocomplete")
                .formatter("entity_reference_label"),
            FieldTypeDefinition::new("uuid", "core")
                .column("value", DataType::Text),
            FieldTypeDefinition::new("language", "core")
                .column("value", DataType::Text)
                .widget("language_select")
                .formatter("language"),
            FieldTypeDefinition::new("created", "core")
                .column("value", DataType::Integer)
                .widget("datetime_timestamp")
                .formatter("timestamp"),
            FieldTypeDefinition::new("text", "text")
                .label("Text (formatted)")
                .column("value", DataType::Text)
                .column("format", DataType::Text)
                .widget("text_textfield"),
            FieldTypeDefinition::new("text_long", "text")
                .label("Text (formatted, long)")
                .column("value", DataType::Text)
                .column("format", DataType::Text)
                .widget("text_textarea"),
            FieldTypeDefinition::new("list_string", "options")
                .label("List (text)")
                .column("value", DataType::Text)
                .widget("options_select")
                .formatter("list_default"),
            FieldTypeDefinition::new("list_integer", "options")
                .label("List (integer)")
                .column("value", DataType::Integer)
                .widget("options_select")
                .formatter("list_default"),
            FieldTypeDefinition::new("datetime", "datetime")
                .label("Date")
                .column("value", DataType::Text)
                .formatter("datetime_default"),
        ];
        for definition in core_types {
            manager.definitions.insert(definition.id.clone(), definition);
        }
        manager
    }

    pub fn register(&mut self, definition: FieldTypeDefinition) -> Result<()> {
        if definition.columns.is_empty() {
            return Err(EntityError::Validation(format!(
                "Field type '{}' must declare at least one column",
                definition.id
            )));
        }
        if definition.get_column(&definition.main_property).is_none() {
            return Err(EntityError::Validation(format!(
                "Field type '{}' main property '{}' is not one of its columns",
                definition.id, definition.main_property
            )));
        }
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn get_definition(&self, id: &str) -> Option<&FieldTypeDefinition> {
        self.definitions.get(id)
    }

    pub fn definition(&self, id: &str) -> Result<&FieldTypeDefinition> {
        self.get_definition(id).ok_or_else(|| {
            EntityError::Validation(format!("Field type '{}' does not exist", id))
        })
    }

    pub fn has_definition(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &FieldTypeDefinition> {
        self.definitions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_types_have_providers_and_columns() {
        let manager = FieldTypeManager::with_core_types();
        let text = manager.definition("text").unwrap();
        assert_eq!(text.provider, "text");
        assert_eq!(text.columns.len(), 2);
        assert_eq!(
            manager.definition("entity_reference").unwrap().main_property,
            "target_id"
        );
        assert!(manager.definition("missing").is_err());
    }

    #[test]
    fn test_register_rejects_unknown_main_property() {
        let mut manager = FieldTypeManager::new();
        let bad = FieldTypeDefinition::new("link", "link")
            .column("uri", DataType::Text)
            .main_property("url");
        assert!(manager.register(bad).is_err());

        let good = FieldTypeDefinition::new("link", "link")
            .column("uri", DataType::Text)
            .column("title", DataType::Text)
            .main_property("uri");
        manager.register(good).unwrap();
        assert!(manager.has_definition("link"));
    }
}
