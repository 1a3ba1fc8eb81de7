//! Bundle create, rename and delete cascades

mod common;

use std::sync::{Arc, Mutex};

use fieldstore::hooks::BundleLifecycleHandler;
use fieldstore::profile::{standard_entity_types, standard_provision};
use fieldstore::{DEFAULT_MODE, EntityError, FieldConfig, FieldStorageConfig, FieldSystem, Result};

#[test]
fn test_delete_bundle_marks_fields_deleted() {
    let system = common::standard_system();
    let article = common::save_article(&system, "Doomed", "body", &[7]);
    let page = common::save_page(&system, "Survivor", "page body");

    let repository = system.field_config_repository();
    let before = repository.fields_for_bundle("node", "article").unwrap();
    assert_eq!(before.len(), 2);

    system.delete_bundle("node", "article").unwrap();

    let fields = system.field_manager();
    let base = fields.base_field_definitions("node").unwrap();
    assert!(fields.bundle_field_definitions("node", "article", &base).unwrap().is_empty());
    assert!(!system.bundle_info().bundle_exists("node", "article").unwrap());

    for field in &before {
        let entry = repository.deleted_field(&field.uuid).unwrap().unwrap();
        assert!(entry.field.deleted);
        assert_eq!(entry.field.bundle, "article");
        assert_eq!(entry.field.field_name, field.field_name);
    }
    // field_tags lost its only field, so its storage went too
    assert!(repository.load_storage("node", "field_tags").unwrap().is_none());
    assert!(repository.load_storage("node", "body").unwrap().is_some());

    let loaded = system.load("node", article, false).unwrap().unwrap();
    assert!(loaded.get("body").is_none());
    assert!(loaded.get("field_tags").is_none());
    let survivor = system.load("node", page, false).unwrap().unwrap();
    assert_eq!(common::body_of(&survivor).as_deref(), Some("page body"));

    assert!(system.display_repository().list(fieldstore::DisplayContext::View, Some("node")).unwrap()
        .iter()
        .all(|id| !id.starts_with("node.article.")));
}

#[test]
fn test_rename_moves_live_fields_and_rekeys_deleted_ones() {
    let system = common::standard_system();
    let id = common::save_article(&system, "Moving", "keep me", &[1, 2]);

    let note = system
        .create_field_storage(FieldStorageConfig::new("node", "field_note", "string"))
        .unwrap();
    system
        .create_field(FieldConfig::new(&note, "article").with_label("Note"))
        .unwrap();
    system.create_field(FieldConfig::new(&note, "page")).unwrap();
    let deleted_uuid = system
        .field_config_repository()
        .load_field("node", "article", "field_note")
        .unwrap()
        .unwrap()
        .uuid;
    system.delete_field("node", "article", "field_note").unwrap();

    let repository = system.field_config_repository();
    let live_before = repository.fields_for_bundle("node", "article").unwrap();
    system.rename_bundle("node", "article", "blog").unwrap();

    assert!(repository.fields_for_bundle("node", "article").unwrap().is_empty());
    for field in live_before {
        let moved = repository
            .load_field("node", "blog", &field.field_name)
            .unwrap()
            .unwrap();
        assert_eq!(moved.uuid, field.uuid);
        assert_eq!(moved.label, field.label);
        assert_eq!(moved.settings, field.settings);
        assert_eq!(moved.required, field.required);
    }

    assert!(repository.load_field("node", "blog", "field_note").unwrap().is_none());
    let entry = repository.deleted_field(&deleted_uuid).unwrap().unwrap();
    assert_eq!(entry.field.bundle, "blog");
    assert!(entry.field.deleted);

    let bundles = system.bundle_info().bundles("node").unwrap();
    assert_eq!(bundles.get("blog").map(String::as_str), Some("Article"));
    assert!(!bundles.contains_key("article"));

    let entity = system.load("node", id, false).unwrap().unwrap();
    assert_eq!(entity.bundle(), "blog");
    assert_eq!(common::body_of(&entity).as_deref(), Some("keep me"));
    assert_eq!(
        system
            .load_by_properties("node", serde_json::json!({"type": "blog"}))
            .unwrap()
            .len(),
        1
    );

    let display = system.get_display("node", "blog", DEFAULT_MODE).unwrap();
    assert!(!display.is_new());
    assert!(display.get_component("body").is_some());
    assert!(system.get_display("node", "article", DEFAULT_MODE).unwrap().is_new());
}

#[test]
fn test_rename_and_create_validate_bundle_names() {
    let system = common::standard_system();
    let err = system.rename_bundle("node", "missing", "other").unwrap_err();
    assert!(matches!(err, EntityError::ConfigNotFound(_)));
    let err = system.rename_bundle("node", "article", "page").unwrap_err();
    assert!(matches!(err, EntityError::ConfigExists(_)));
    let err = system.create_bundle("node", "page", "Again").unwrap_err();
    assert!(matches!(err, EntityError::ConfigExists(_)));
    let err = system.delete_bundle("node", "missing").unwrap_err();
    assert!(matches!(err, EntityError::ConfigNotFound(_)));
}

#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<String>>,
}

impl BundleLifecycleHandler for RecordingHandler {
    fn on_bundle_create(&self, entity_type_id: &str, bundle: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {}.{}", entity_type_id, bundle));
        Ok(())
    }

    fn on_bundle_rename(&self, entity_type_id: &str, bundle_old: &str, bundle_new: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("rename {}.{} {}", entity_type_id, bundle_old, bundle_new));
        Ok(())
    }

    fn on_bundle_delete(&self, entity_type_id: &str, bundle: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {}.{}", entity_type_id, bundle));
        Ok(())
    }
}

#[test]
fn test_registered_handlers_see_bundle_events() {
    let handler = Arc::new(RecordingHandler::default());
    let system = FieldSystem::builder()
        .entity_types(standard_entity_types())
        .bundle_handler(handler.clone(), 0)
        .build()
        .unwrap();
    system.install_module(&standard_provision()).unwrap();

    system.create_bundle("node", "event", "Event").unwrap();
    system.rename_bundle("node", "event", "meetup").unwrap();
    system.delete_bundle("node", "meetup").unwrap();

    assert_eq!(
        *handler.calls.lock().unwrap(),
        vec![
            "create node.event".to_string(),
            "rename node.event meetup".to_string(),
            "delete node.meetup".to_string(),
        ]
    );
}
