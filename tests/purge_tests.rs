//! Batched purging of deleted field data

mod common;

use std::sync::{Arc, Mutex};

use fieldstore::hooks::FieldPurgeListener;
use fieldstore::profile::{standard_entity_types, standard_provision};
use fieldstore::storage::{Condition, StorageEngine};
use fieldstore::{EntityId, FieldConfig, FieldSettings, FieldStorageConfig, FieldSystem};
use serde_json::{Value as JsonValue, json};

#[test]
fn test_purge_runs_in_bounded_batches() {
    let system = common::standard_system();
    for n in 0..3 {
        common::save_article(&system, &format!("a{}", n), "text", &[]);
    }
    let page = common::save_page(&system, "page", "kept");
    let uuid = system
        .field_config_repository()
        .load_field("node", "article", "body")
        .unwrap()
        .unwrap()
        .uuid;
    system.delete_field("node", "article", "body").unwrap();
    assert_eq!(system.storage("node").unwrap().count_field_data("body", false).unwrap(), 1);

    let first = system.purge_batch(2).unwrap();
    assert_eq!(first.entities_purged, 2);
    assert!(first.fields_purged.is_empty());
    let entry = system
        .field_config_repository()
        .deleted_field(&uuid)
        .unwrap()
        .unwrap();
    assert_eq!(entry.cursor.purged_entities, 2);
    assert_eq!(entry.cursor.batches, 1);

    let second = system.purge_batch(2).unwrap();
    assert_eq!(second.entities_purged, 1);
    assert_eq!(second.fields_purged, vec![uuid.clone()]);
    assert!(system.field_config_repository().deleted_field(&uuid).unwrap().is_none());
    assert!(!system.purge_coordinator().has_pending().unwrap());

    let page = system.load("node", page, false).unwrap().unwrap();
    assert_eq!(common::body_of(&page).as_deref(), Some("kept"));
}

#[test]
fn test_purge_is_idempotent_once_done() {
    let system = common::standard_system();
    common::save_article(&system, "x", "y", &[1]);
    system.delete_bundle("node", "article").unwrap();

    let report = system.purge_batch(50).unwrap();
    assert!(!report.is_empty());
    let before = system.snapshot().unwrap();

    let again = system.purge_batch(50).unwrap();
    assert!(again.is_empty());
    assert_eq!(again.entities_purged, 0);
    let after = system.snapshot().unwrap();
    assert_eq!(after.config, before.config);
    assert_eq!(after.state, before.state);
    assert_eq!(after.tables.keys().collect::<Vec<_>>(), before.tables.keys().collect::<Vec<_>>());
}

#[derive(Default)]
struct PurgeLog {
    fields: Mutex<Vec<String>>,
    storages: Mutex<Vec<String>>,
}

impl FieldPurgeListener for PurgeLog {
    fn field_purged(&self, field: &FieldConfig) {
        self.fields.lock().unwrap().push(field.id());
    }

    fn field_storage_purged(&self, storage: &FieldStorageConfig) {
        self.storages.lock().unwrap().push(storage.id());
    }
}

#[test]
fn test_deleted_storage_tables_dropped_after_last_field() {
    let listener = Arc::new(PurgeLog::default());
    let system = FieldSystem::builder()
        .entity_types(standard_entity_types())
        .purge_listener(listener.clone())
        .build()
        .unwrap();
    system.install_module(&standard_provision()).unwrap();
    common::save_article(&system, "one", "b", &[1, 2]);
    common::save_article(&system, "two", "b", &[3]);

    system.delete_field("node", "article", "field_tags").unwrap();
    let tables = system.store().tables().list_tables();
    assert!(!tables.iter().any(|t| t == "node__field_tags"));
    assert!(tables.iter().any(|t| t.starts_with("field_deleted_data_")));

    let report = system.purge_batch(10).unwrap();
    assert_eq!(report.entities_purged, 2);
    assert_eq!(report.fields_purged.len(), 1);
    assert_eq!(report.storages_purged.len(), 1);

    let tables = system.store().tables().list_tables();
    assert!(!tables.iter().any(|t| t.starts_with("field_deleted_")));
    assert!(system.field_config_repository().deleted_storages().unwrap().is_empty());
    assert_eq!(*listener.fields.lock().unwrap(), vec!["node.article.field_tags".to_string()]);
    assert_eq!(*listener.storages.lock().unwrap(), vec!["node.field_tags".to_string()]);
}

#[test]
fn test_purge_can_target_one_storage() {
    let system = common::standard_system();
    common::save_article(&system, "one", "b", &[1]);
    let tags_uuid = system
        .field_config_repository()
        .load_storage("node", "field_tags")
        .unwrap()
        .unwrap()
        .uuid;
    system.delete_bundle("node", "article").unwrap();
    assert_eq!(system.field_config_repository().deleted_fields().unwrap().len(), 2);

    let report = system
        .purge_coordinator()
        .purge_batch(10, Some(tags_uuid.as_str()))
        .unwrap();
    assert_eq!(report.storages_purged, vec![tags_uuid]);
    let left = system.field_config_repository().deleted_fields().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left.values().next().unwrap().field.field_name, "body");
}

#[test]
fn test_cron_uses_configured_batch_size() {
    let system = common::standard_system_with(FieldSettings::new().purge_batch_size(1));
    for n in 0..3 {
        common::save_page(&system, &format!("p{}", n), "text");
    }
    system.delete_field("node", "page", "body").unwrap();

    system.cron();
    let entries = system.field_config_repository().deleted_fields().unwrap();
    assert_eq!(entries.values().next().unwrap().cursor.purged_entities, 1);

    system.save_settings(&FieldSettings::new().purge_batch_size(10)).unwrap();
    system.cron();
    assert!(system.field_config_repository().deleted_fields().unwrap().is_empty());
    system.cron();
    assert!(!system.purge_coordinator().has_pending().unwrap());
}

fn deleted_rows(system: &FieldSystem, table: &str) -> usize {
    system
        .store()
        .tables()
        .select(table, &[Condition::eq("deleted", true)])
        .unwrap()
        .len()
}

/// Saves a new revision of `id` with the given body; `null` empties it.
fn save_body_revision(system: &FieldSystem, id: EntityId, body: JsonValue) {
    let mut entity = system.load("node", id, false).unwrap().unwrap();
    entity.set("body", body).set_new_revision(true);
    system.save(&mut entity).unwrap();
}

#[test]
fn test_purge_reaches_rows_only_left_in_older_revisions() {
    let system = common::standard_system();
    let emptied = common::save_article(&system, "a", "old body", &[]);
    save_body_revision(&system, emptied, JsonValue::Null);
    common::save_article(&system, "b", "body", &[]);
    let page = common::save_page(&system, "p", "page body");

    system.delete_field("node", "article", "body").unwrap();
    assert_eq!(deleted_rows(&system, "node__body"), 1);
    assert_eq!(deleted_rows(&system, "node_revision__body"), 2);

    let report = system.purge_batch(50).unwrap();
    assert_eq!(report.entities_purged, 2);
    assert_eq!(report.fields_purged.len(), 1);
    assert_eq!(deleted_rows(&system, "node__body"), 0);
    assert_eq!(deleted_rows(&system, "node_revision__body"), 0);
    assert!(!system.purge_coordinator().has_pending().unwrap());

    let page = system.load("node", page, false).unwrap().unwrap();
    assert_eq!(common::body_of(&page).as_deref(), Some("page body"));
}

#[test]
fn test_field_reported_purged_only_after_every_revision_is_clean() {
    let system = common::standard_system();
    for n in 0..3 {
        let id = common::save_article(&system, &format!("a{}", n), "v1", &[]);
        save_body_revision(&system, id, json!(format!("v2 of {}", n)));
        if n % 2 == 0 {
            save_body_revision(&system, id, JsonValue::Null);
        }
    }
    system.delete_field("node", "article", "body").unwrap();
    assert_eq!(deleted_rows(&system, "node__body"), 1);
    assert_eq!(deleted_rows(&system, "node_revision__body"), 6);

    let mut purged = 0;
    let mut calls = 0;
    loop {
        let report = system.purge_batch(1).unwrap();
        calls += 1;
        purged += report.entities_purged;
        if !report.fields_purged.is_empty() {
            assert_eq!(deleted_rows(&system, "node__body"), 0);
            assert_eq!(deleted_rows(&system, "node_revision__body"), 0);
            break;
        }
        assert!(calls < 10, "field never finished purging");
    }
    assert_eq!(purged, 3);
    assert_eq!(calls, 4);
    assert!(system.field_config_repository().deleted_fields().unwrap().is_empty());
}
