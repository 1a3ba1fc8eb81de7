//! Field purging during configuration synchronization

mod common;

use std::collections::BTreeMap;

use fieldstore::sync::{Changelist, EXTENSION_CONFIG, ExtensionList};
use fieldstore::{
    FieldConfig, FieldSettings, FieldStorageConfig, FieldSystem, ImporterContext, StorageComparer,
    SyncStep,
};
use serde_json::json;

/// A comparer whose source keeps only `modules` installed and deletes `deletes`.
fn comparer(modules: &[&str], deletes: &[&str]) -> StorageComparer {
    let mut source = BTreeMap::new();
    source.insert(
        EXTENSION_CONFIG.to_string(),
        serde_json::to_value(ExtensionList::new(modules.iter().copied())).unwrap(),
    );
    let changelist = Changelist {
        delete: deletes.iter().map(|name| name.to_string()).collect(),
        ..Changelist::default()
    };
    StorageComparer::with_changelist(source, changelist)
}

fn add_choice_field(system: &FieldSystem) {
    let storage = system
        .create_field_storage(FieldStorageConfig::new("node", "field_choice", "list_string"))
        .unwrap();
    system
        .create_field(FieldConfig::new(&storage, "page").with_label("Choice"))
        .unwrap();
}

#[test]
fn test_purge_step_injected_before_module_removal() {
    let system = common::standard_system();
    let context = ImporterContext::new(comparer(
        &["node", "standard"],
        &["field.storage.node.body", "field.field.node.article.body", "field.field.node.page.body"],
    ));

    let mut steps = SyncStep::default_steps();
    system.compute_step_alterations(&mut steps, &context).unwrap();
    assert_eq!(steps[0], SyncStep::FieldPurge);
    let purge = steps.iter().position(|s| *s == SyncStep::FieldPurge).unwrap();
    let removal = steps.iter().position(SyncStep::removes_modules).unwrap();
    assert!(purge < removal);

    system.compute_step_alterations(&mut steps, &context).unwrap();
    assert_eq!(steps.iter().filter(|s| **s == SyncStep::FieldPurge).count(), 1);

    let warnings = system.compute_warnings(context.storage_comparer()).unwrap();
    assert_eq!(
        warnings,
        vec!["This synchronization will delete data from the field body.".to_string()]
    );
}

#[test]
fn test_warning_lists_several_fields() {
    let system = common::standard_system();
    add_choice_field(&system);
    let comparer = comparer(
        &["node"],
        &["field.storage.node.body", "field.storage.node.field_choice"],
    );
    let warnings = system.compute_warnings(&comparer).unwrap();
    assert_eq!(
        warnings,
        vec!["This synchronization will delete data from the fields: body, field_choice.".to_string()]
    );
}

#[test]
fn test_no_step_when_providers_stay() {
    let system = common::standard_system();
    let context = ImporterContext::new(comparer(
        &["node", "text"],
        &["field.storage.node.body"],
    ));
    let mut steps = SyncStep::default_steps();
    system.compute_step_alterations(&mut steps, &context).unwrap();
    assert_eq!(steps, SyncStep::default_steps());
    assert!(system.compute_warnings(context.storage_comparer()).unwrap().is_empty());
}

#[test]
fn test_already_deleted_storage_produces_no_warning() {
    let system = common::standard_system();
    add_choice_field(&system);
    system.delete_field_storage("node", "field_choice").unwrap();
    assert_eq!(system.field_config_repository().deleted_storages().unwrap().len(), 1);

    // options provides list_string and is being uninstalled
    let context = ImporterContext::new(comparer(&["node", "text"], &["field.storage.node.field_choice"]));
    assert!(system.compute_warnings(context.storage_comparer()).unwrap().is_empty());

    let mut steps = SyncStep::default_steps();
    system.compute_step_alterations(&mut steps, &context).unwrap();
    assert_eq!(steps[0], SyncStep::FieldPurge);
}

#[test]
fn test_entity_reference_storage_is_never_purged() {
    let system = common::standard_system();
    // entity_reference comes from core, which is always installed
    let comparer = comparer(&[], &["field.storage.node.field_tags"]);
    let warnings = system.compute_warnings(&comparer).unwrap();
    assert!(warnings.iter().all(|w| !w.contains("field_tags")));
}

#[test]
fn test_field_purge_step_runs_to_completion() {
    let system = common::standard_system_with(FieldSettings::new().purge_batch_size(1));
    common::save_article(&system, "a", "one", &[]);
    common::save_article(&system, "b", "two", &[]);
    common::save_page(&system, "c", "three");

    let mut context = ImporterContext::new(comparer(&["node"], &["field.storage.node.body"]));
    let mut calls = 0;
    loop {
        let progress = system.process_field_purge(&mut context).unwrap();
        calls += 1;
        if progress.is_finished() {
            break;
        }
        assert!(progress.finished < 1.0);
        assert_eq!(progress.message.as_deref(), Some("Purging field body"));
        assert!(calls < 20, "purge step did not finish");
    }
    assert_eq!(calls, 4);

    let repository = system.field_config_repository();
    assert!(repository.load_storage("node", "body").unwrap().is_none());
    assert!(repository.deleted_fields().unwrap().is_empty());
    assert!(repository.deleted_storages().unwrap().is_empty());
    let sandbox = context.sandbox("field").unwrap();
    assert_eq!(sandbox["steps_to_delete"], json!(4));

    let done = system.process_field_purge(&mut context).unwrap();
    assert!(done.is_finished());
}
