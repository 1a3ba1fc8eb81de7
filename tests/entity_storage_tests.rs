//! Entity CRUD through the storage facade

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fieldstore::hooks::EntityHook;
use fieldstore::profile::{standard_entity_types, standard_provision};
use fieldstore::storage::{Condition, Row, StorageEngine};
use fieldstore::{ContentEntity, EntityError, EntityType, FieldSystem, Result, SaveStatus, Value};
use serde_json::json;

#[test]
fn test_load_matches_load_unchanged() {
    let system = common::standard_system();
    let id = common::save_article(&system, "First", "Body text", &[3, 5]);

    let loaded = system.load("node", id, false).unwrap().unwrap();
    let unchanged = system.load_unchanged("node", id).unwrap().unwrap();
    assert_eq!(loaded, unchanged);
    assert_eq!(loaded.get_value("title"), Some(&json!("First")));
    assert_eq!(common::body_of(&loaded).as_deref(), Some("Body text"));
    let tags: Vec<u64> = loaded
        .get("field_tags")
        .unwrap()
        .iter()
        .filter_map(|item| item.get("target_id").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(tags, vec![3, 5]);
    assert_eq!(loaded.get_value("status"), Some(&json!(true)));
}

#[test]
fn test_missing_ids_are_absent_not_errors() {
    let system = common::standard_system();
    let first = common::save_page(&system, "One", "a");
    let second = common::save_page(&system, "Two", "b");

    assert!(system.load("node", 999, false).unwrap().is_none());
    let found = system.load_multiple("node", Some(&[first, 999, second]), false).unwrap();
    assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![first, second]);

    let all = system.load_multiple("node", None, false).unwrap();
    assert_eq!(all.len(), 2);

    assert_eq!(system.delete_multiple("node", &[first, 12345]).unwrap(), 1);
    assert!(system.load("node", first, false).unwrap().is_none());
    assert_eq!(system.delete_multiple("node", &[12345]).unwrap(), 0);
}

#[test]
fn test_load_by_properties_is_conjunctive() {
    let system = common::standard_system();
    let a = common::save_article(&system, "Alpha", "shared", &[1]);
    let b = common::save_article(&system, "Beta", "other", &[1, 2]);
    let c = common::save_page(&system, "Alpha", "shared");

    let articles = system.load_by_properties("node", json!({"type": "article"})).unwrap();
    assert_eq!(articles.keys().copied().collect::<Vec<_>>(), vec![a, b]);

    let alpha_articles = system
        .load_by_properties("node", json!({"type": "article", "title": "Alpha"}))
        .unwrap();
    assert_eq!(alpha_articles.keys().copied().collect::<Vec<_>>(), vec![a]);

    let any_title = system
        .load_by_properties("node", json!({"title": ["Alpha", "Beta"]}))
        .unwrap();
    assert_eq!(any_title.len(), 3);

    let by_body = system.load_by_properties("node", json!({"body": "shared"})).unwrap();
    assert_eq!(by_body.keys().copied().collect::<Vec<_>>(), vec![a, c]);

    let by_tag = system
        .load_by_properties("node", json!({"field_tags.target_id": 2}))
        .unwrap();
    assert_eq!(by_tag.keys().copied().collect::<Vec<_>>(), vec![b]);

    assert!(
        system
            .load_by_properties("node", json!({"title": "Nobody"}))
            .unwrap()
            .is_empty()
    );

    let err = system
        .load_by_properties("node", json!({"no_such_field": 1}))
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));
}

#[test]
fn test_reset_invalidates_only_requested_ids() {
    let system = common::standard_system();
    let first = common::save_page(&system, "One", "a");
    let second = common::save_page(&system, "Two", "b");
    system.load_multiple("node", Some(&[first, second]), false).unwrap();

    let mut title = Row::new();
    title.insert("title".to_string(), Value::from("Changed"));
    for id in [first, second] {
        system
            .store()
            .tables()
            .update_rows("node_field_data", &[Condition::eq("nid", id)], &title)
            .unwrap();
    }

    let reloaded = system.load("node", first, true).unwrap().unwrap();
    assert_eq!(reloaded.get_value("title"), Some(&json!("Changed")));

    let cached = system.load("node", second, false).unwrap().unwrap();
    assert_eq!(cached.get_value("title"), Some(&json!("Two")));
    let fresh = system.load_unchanged("node", second).unwrap().unwrap();
    assert_eq!(fresh.get_value("title"), Some(&json!("Changed")));
    let reset = system.load_multiple("node", Some(&[second]), true).unwrap();
    assert_eq!(reset[&second].get_value("title"), Some(&json!("Changed")));
    let cached = system.load("node", second, false).unwrap().unwrap();
    assert_eq!(cached.get_value("title"), Some(&json!("Changed")));
}

#[test]
fn test_revisions() {
    let system = common::standard_system();
    let id = common::save_page(&system, "v1", "first");

    let mut entity = system.load("node", id, false).unwrap().unwrap();
    let first_revision = entity.revision_id().unwrap();
    entity.set("title", "v2").set_new_revision(true);
    assert_eq!(system.save(&mut entity).unwrap(), SaveStatus::Updated);
    let second_revision = entity.revision_id().unwrap();
    assert!(second_revision > first_revision);

    let storage = system.storage("node").unwrap();
    assert_eq!(storage.revision_ids(id).unwrap(), vec![first_revision, second_revision]);

    let old = system.revision_load("node", first_revision).unwrap().unwrap();
    assert_eq!(old.get_value("title"), Some(&json!("v1")));
    assert!(!old.is_default_revision());
    assert_eq!(common::body_of(&old).as_deref(), Some("first"));

    let err = system.revision_delete("node", second_revision).unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));
    assert!(system.revision_delete("node", first_revision).unwrap());
    assert!(!system.revision_delete("node", first_revision).unwrap());
    assert!(system.revision_load("node", first_revision).unwrap().is_none());

    let current = system.load("node", id, false).unwrap().unwrap();
    assert_eq!(current.get_value("title"), Some(&json!("v2")));
}

#[test]
fn test_revision_operations_need_revisionable_type() {
    let system = common::standard_system();
    let err = system.revision_load("user", 1).unwrap_err();
    assert!(matches!(err, EntityError::UnsupportedCapability(_)));
    let err = system.revision_delete("comment", 1).unwrap_err();
    assert!(matches!(err, EntityError::UnsupportedCapability(_)));
}

#[test]
fn test_stale_copy_is_a_concurrent_modification() {
    let system = common::standard_system();
    let id = common::save_page(&system, "Shared", "x");

    let mut first = system.load("node", id, false).unwrap().unwrap();
    let mut second = system.load("node", id, false).unwrap().unwrap();
    first.set("title", "First wins").set_new_revision(true);
    system.save(&mut first).unwrap();

    second.set("title", "Second loses");
    let err = system.save(&mut second).unwrap_err();
    assert!(matches!(err, EntityError::ConcurrentModification(_)));
    assert_eq!(
        system.load("node", id, false).unwrap().unwrap().get_value("title"),
        Some(&json!("First wins"))
    );
}

#[test]
fn test_cardinality_is_enforced_on_save() {
    let system = common::standard_system();
    let mut entity = system
        .create("node", json!({"type": "page", "title": "Too much", "body": ["a", "b"]}))
        .unwrap();
    let err = system.save(&mut entity).unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));
    assert!(entity.is_new());
    assert!(system.load_multiple("node", None, false).unwrap().is_empty());
}

#[test]
fn test_uuid_lookup() {
    let system = FieldSystem::builder()
        .entity_types(standard_entity_types())
        .entity_type(EntityType::new("log_entry").id_key("lid"))
        .build()
        .unwrap();
    system.install_module(&standard_provision()).unwrap();

    let id = common::save_page(&system, "By uuid", "x");
    let entity = system.load("node", id, false).unwrap().unwrap();
    let uuid = entity.uuid().unwrap().to_string();
    let storage = system.storage("node").unwrap();
    assert_eq!(storage.load_by_uuid(&uuid).unwrap().unwrap().id(), Some(id));
    assert!(storage.load_by_uuid("00000000-0000-0000-0000-000000000000").unwrap().is_none());

    let err = system.storage("log_entry").unwrap().load_by_uuid(&uuid).unwrap_err();
    assert!(matches!(err, EntityError::UnsupportedCapability(_)));
}

#[test]
fn test_unknown_entity_type() {
    let system = common::standard_system();
    let err = system.load("widget", 1, false).unwrap_err();
    assert!(matches!(err, EntityError::EntityTypeNotFound(_)));
}

#[test]
fn test_translations_round_trip() {
    let system = common::standard_system();
    let mut entity = system
        .create(
            "node",
            json!({"type": "page", "langcode": "en", "title": "Hello", "body": "Body"}),
        )
        .unwrap();
    entity.add_translation("fr").unwrap();
    entity.set_translated("fr", "title", "Bonjour").unwrap();
    system.save(&mut entity).unwrap();

    let loaded = system.load("node", entity.id().unwrap(), false).unwrap().unwrap();
    assert_eq!(loaded.language(), "en");
    assert!(loaded.has_translation("fr"));
    assert_eq!(
        loaded.get_translated("fr", "title").unwrap()[0].get("value"),
        Some(&json!("Bonjour"))
    );
    assert_eq!(loaded.get_value("title"), Some(&json!("Hello")));
}

#[derive(Default)]
struct CountingHook {
    deleted: AtomicUsize,
}

impl EntityHook for CountingHook {
    fn presave(&self, entity: &mut ContentEntity) -> Result<()> {
        if entity.get("title").is_none() {
            entity.set("title", "Untitled");
        }
        Ok(())
    }

    fn delete(&self, _entity: &ContentEntity) -> Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_entity_hooks_run() {
    let hook = Arc::new(CountingHook::default());
    let system = FieldSystem::builder()
        .entity_types(standard_entity_types())
        .entity_hook(hook.clone())
        .build()
        .unwrap();
    system.install_module(&standard_provision()).unwrap();

    let mut entity = system.create("node", json!({"type": "page"})).unwrap();
    system.save(&mut entity).unwrap();
    let id = entity.id().unwrap();
    assert_eq!(
        system.load("node", id, false).unwrap().unwrap().get_value("title"),
        Some(&json!("Untitled"))
    );

    system.delete_multiple("node", &[id]).unwrap();
    assert_eq!(hook.deleted.load(Ordering::SeqCst), 1);
}
