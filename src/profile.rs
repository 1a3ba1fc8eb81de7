//! The standard install: common entity types and the fields the standard
//! profile ships on them.

use std::sync::Arc;

use serde_json::json;

use crate::core::Cardinality;
use crate::display::{DEFAULT_MODE, DisplayComponent, DisplayContext};
use crate::entity::EntityType;
use crate::field::{BaseFieldDefinition, FieldConfig, FieldStorageConfig};
use crate::module::{DisplayProvision, ModuleProvision};

/// Node, user, comment and taxonomy term entity types.
pub fn standard_entity_types() -> Vec<EntityType> {
    vec![
        EntityType::new("node")
            .label("Content")
            .provider("node")
            .id_key("nid")
            .revision_key("vid")
            .bundle_key("type")
            .uuid_key("uuid")
            .langcode_key("langcode")
            .label_key("title")
            .translatable(true)
            .base_field(
                "title",
                BaseFieldDefinition::create("string")
                    .set_label("Title")
                    .set_required(true)
                    .set_translatable(true),
            )
            .base_field(
                "status",
                BaseFieldDefinition::create("boolean")
                    .set_label("Published")
                    .set_default_value(vec![item("value", json!(true))]),
            )
            .base_field(
                "created",
                BaseFieldDefinition::create("created")
                    .set_label("Authored on")
                    .set_translatable(false),
            )
            .base_field(
                "uid",
                BaseFieldDefinition::create("entity_reference")
                    .set_label("Authored by")
                    .set_setting("target_type", json!("user"))
                    .set_translatable(false),
            ),
        EntityType::new("user")
            .label("User")
            .provider("user")
            .id_key("uid")
            .uuid_key("uuid")
            .langcode_key("langcode")
            .label_key("name")
            .base_field(
                "name",
                BaseFieldDefinition::create("string")
                    .set_label("Name")
                    .set_required(true),
            )
            .base_field(
                "roles",
                BaseFieldDefinition::create("entity_reference")
                    .set_label("Roles")
                    .set_cardinality(Cardinality::Unlimited),
            ),
        EntityType::new("comment")
            .label("Comment")
            .provider("comment")
            .id_key("cid")
            .bundle_key("comment_type")
            .uuid_key("uuid")
            .langcode_key("langcode")
            .label_key("subject")
            .base_field("subject", BaseFieldDefinition::create("string").set_label("Subject"))
            .base_field(
                "entity_id",
                BaseFieldDefinition::create("entity_reference").set_label("Entity ID"),
            ),
        EntityType::new("taxonomy_term")
            .label("Taxonomy term")
            .provider("taxonomy")
            .id_key("tid")
            .revision_key("revision_id")
            .bundle_key("vid")
            .uuid_key("uuid")
            .langcode_key("langcode")
            .label_key("name")
            .translatable(true)
            .base_field(
                "name",
                BaseFieldDefinition::create("string")
                    .set_label("Name")
                    .set_required(true),
            )
            .base_field("weight", BaseFieldDefinition::create("integer").set_label("Weight")),
    ]
}

/// Article and basic page content types with the body and tags fields.
pub fn standard_provision() -> ModuleProvision {
    let body = Arc::new(
        FieldStorageConfig::new("node", "body", "text_long").with_persist_with_no_fields(true),
    );
    let tags = Arc::new(
        FieldStorageConfig::new("node", "field_tags", "entity_reference")
            .with_cardinality(Cardinality::Unlimited)
            .with_setting("target_type", json!("taxonomy_term")),
    );

    let mut provision = ModuleProvision::new("standard")
        .bundle("node", "article", "Article")
        .bundle("node", "page", "Basic page")
        .bundle("taxonomy_term", "tags", "Tags")
        .bundle("comment", "comment", "Default comments")
        .field_storage((*body).clone())
        .field_storage((*tags).clone())
        .field(FieldConfig::new(&body, "article").with_label("Body"))
        .field(FieldConfig::new(&body, "page").with_label("Body"))
        .field(
            FieldConfig::new(&tags, "article")
                .with_label("Tags")
                .with_setting("handler", json!("default:taxonomy_term")),
        );

    for (weight, (bundle, field_name, formatter)) in [
        ("article", "body", "text_default"),
        ("page", "body", "text_default"),
        ("article", "field_tags", "entity_reference_label"),
    ]
    .into_iter()
    .enumerate()
    {
        provision = provision.display(DisplayProvision {
            context: DisplayContext::View,
            entity_type: "node".to_string(),
            bundle: bundle.to_string(),
            mode: DEFAULT_MODE.to_string(),
            field_name: field_name.to_string(),
            component: DisplayComponent::new(formatter)
                .weight(weight as i32)
                .label("hidden"),
        });
    }
    provision
}

fn item(property: &str, value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let mut item = serde_json::Map::new();
    item.insert(property.to_string(), value);
    item
}
