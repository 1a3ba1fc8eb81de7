//! Field definition lookups, storage and field creation rules

mod common;

use std::sync::Arc;

use fieldstore::{Cardinality, EntityError, EntityType, FieldConfig, FieldStorageConfig, FieldSystem};

fn article_system() -> FieldSystem {
    let system = FieldSystem::builder()
        .entity_type(EntityType::new("article").id_key("id").bundle_key("type"))
        .build()
        .unwrap();
    system.create_bundle("article", "page", "Page").unwrap();
    system.create_bundle("article", "news", "News").unwrap();
    system
}

#[test]
fn test_subtitle_only_on_instanced_bundle() {
    let system = article_system();
    let storage = system
        .create_field_storage(
            FieldStorageConfig::new("article", "subtitle", "text")
                .with_cardinality(Cardinality::Limited(1)),
        )
        .unwrap();
    system
        .create_field(FieldConfig::new(&storage, "page").with_label("Subtitle"))
        .unwrap();

    let fields = system.field_manager();
    let base = fields.base_field_definitions("article").unwrap();
    let page = fields.bundle_field_definitions("article", "page", &base).unwrap();
    assert!(page.contains_key("subtitle"));
    assert_eq!(page["subtitle"].label, "Subtitle");

    let news = fields.bundle_field_definitions("article", "news", &base).unwrap();
    assert!(!news.contains_key("subtitle"));
    assert!(!system.field_manager().field_definitions("article", "news").unwrap().contains_key("subtitle"));
}

#[test]
fn test_types_without_bundle_key_have_no_bundle_fields() {
    let system = common::standard_system();
    let fields = system.field_manager();
    let base = fields.base_field_definitions("user").unwrap();
    for bundle in ["user", "article", "anything"] {
        assert!(fields.bundle_field_definitions("user", bundle, &base).unwrap().is_empty());
    }
    assert!(fields.field_definitions("user", "user").unwrap().contains_key("name"));
}

#[test]
fn test_field_on_type_without_bundles_is_rejected() {
    let system = common::standard_system();
    let storage = system
        .create_field_storage(FieldStorageConfig::new("user", "field_bio", "string_long"))
        .unwrap();
    let err = system
        .create_field(FieldConfig::new(&storage, "user"))
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));
}

#[test]
fn test_non_fieldable_type_has_no_storages() {
    let system = FieldSystem::builder()
        .entity_type(EntityType::new("path_alias").fieldable(false))
        .build()
        .unwrap();
    assert!(system.field_manager().field_storage_configs("path_alias").unwrap().is_empty());

    let err = system
        .create_field_storage(FieldStorageConfig::new("path_alias", "field_note", "string"))
        .unwrap_err();
    assert!(matches!(err, EntityError::UnsupportedCapability(_)));
}

#[test]
fn test_storage_creation_checks() {
    let system = common::standard_system();

    let duplicate = system
        .create_field_storage(FieldStorageConfig::new("node", "body", "text_long"))
        .unwrap_err();
    assert!(matches!(duplicate, EntityError::ConfigExists(_)));

    let base_clash = system
        .create_field_storage(FieldStorageConfig::new("node", "title", "string"))
        .unwrap_err();
    assert!(matches!(base_clash, EntityError::Validation(_)));

    let bad_name = system
        .create_field_storage(FieldStorageConfig::new("node", "Field Name", "string"))
        .unwrap_err();
    assert!(matches!(bad_name, EntityError::Validation(_)));

    let unknown_type = system
        .create_field_storage(FieldStorageConfig::new("node", "field_x", "no_such_type"))
        .unwrap_err();
    assert!(!matches!(unknown_type, EntityError::Storage(_)));
}

#[test]
fn test_field_creation_needs_storage_and_bundle() {
    let system = common::standard_system();

    let orphan = Arc::new(FieldStorageConfig::new("node", "field_missing", "string"));
    let err = system.create_field(FieldConfig::new(&orphan, "article")).unwrap_err();
    assert!(matches!(err, EntityError::ConfigNotFound(_)));

    let storage = system
        .create_field_storage(FieldStorageConfig::new("node", "field_rating", "integer"))
        .unwrap();
    let err = system.create_field(FieldConfig::new(&storage, "blog")).unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));

    system.create_field(FieldConfig::new(&storage, "page")).unwrap();
    let again = system.create_field(FieldConfig::new(&storage, "page")).unwrap_err();
    assert!(matches!(again, EntityError::ConfigExists(_)));
}

#[test]
fn test_field_map_lists_bundles() {
    let system = common::standard_system();
    let map = system.field_manager().field_map().unwrap();
    let node = &map["node"];
    assert_eq!(node["body"].field_type, "text_long");
    assert_eq!(
        node["body"].bundles.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["article", "page"]
    );
    assert_eq!(
        node["field_tags"].bundles.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["article"]
    );
    assert!(node["title"].bundles.contains("page"));
}

#[test]
fn test_storage_type_change_updates_fields() {
    let system = common::standard_system();
    let storage = system
        .create_field_storage(FieldStorageConfig::new("node", "field_note", "string"))
        .unwrap();
    system.create_field(FieldConfig::new(&storage, "page")).unwrap();

    let mut updated = (*storage).clone();
    updated.field_type = "string_long".to_string();
    system.update_field_storage(updated).unwrap();

    let field = system
        .field_config_repository()
        .load_field("node", "page", "field_note")
        .unwrap()
        .unwrap();
    assert_eq!(field.field_type, "string_long");
    let stored = system
        .field_config_repository()
        .load_storage("node", "field_note")
        .unwrap()
        .unwrap();
    assert_eq!(stored.uuid, storage.uuid);
}

#[test]
fn test_deleting_last_field_deletes_storage() {
    let system = common::standard_system();
    assert!(system.delete_field("node", "article", "field_tags").unwrap());
    assert!(
        system
            .field_config_repository()
            .load_storage("node", "field_tags")
            .unwrap()
            .is_none()
    );
    assert_eq!(system.field_config_repository().deleted_storages().unwrap().len(), 1);

    // body persists without fields
    system.delete_field("node", "page", "body").unwrap();
    system.delete_field("node", "article", "body").unwrap();
    assert!(
        system
            .field_config_repository()
            .load_storage("node", "body")
            .unwrap()
            .is_some()
    );
    assert!(!system.delete_field("node", "article", "body").unwrap());
}
