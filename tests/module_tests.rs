//! Module install, uninstall guards and snapshots

mod common;

use fieldstore::profile::{standard_entity_types, standard_provision};
use fieldstore::{EntityError, FieldSystem, SnapshotManager, Store};
use tempfile::TempDir;

#[test]
fn test_install_is_repeatable() {
    let system = common::standard_system();
    system.install_module(&standard_provision()).unwrap();
    assert!(system.installed_modules().unwrap().contains("standard"));
    assert_eq!(
        system
            .field_config_repository()
            .fields_for_entity_type("node")
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn test_modules_with_field_types_in_use_are_required() {
    let system = common::standard_system();

    let text = system.module_info("text").unwrap();
    assert!(text.required);
    assert_eq!(text.explanation.as_deref(), Some("Fields type(s) in use"));
    assert_eq!(
        text.details,
        vec!["Field type: Text (formatted, long) is used in: body".to_string()]
    );

    let core = system.module_info("core").unwrap();
    assert!(core.required);
    assert_eq!(
        core.details,
        vec!["Field type: Entity reference is used in: field_tags".to_string()]
    );

    assert!(!system.module_info("options").unwrap().required);
}

#[test]
fn test_pending_deletion_keeps_module_required() {
    let system = common::standard_system();
    common::save_page(&system, "p", "body");
    system.delete_field_storage("node", "body").unwrap();

    let text = system.module_info("text").unwrap();
    assert!(text.required);
    assert_eq!(text.explanation.as_deref(), Some("Fields pending deletion"));
    assert!(text.details.is_empty());

    while !system.purge_batch(10).unwrap().is_empty() {}
    assert!(!system.module_info("text").unwrap().required);
}

#[test]
fn test_uninstall_refuses_required_modules() {
    let system = common::standard_system();
    let err = system.uninstall_module("text").unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));
    assert!(system.uninstall_module("standard").unwrap());
    assert!(!system.installed_modules().unwrap().contains("standard"));
    assert!(!system.uninstall_module("standard").unwrap());
}

#[test]
fn test_snapshot_round_trip() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let snapshots = SnapshotManager::new(dir.path().join("site.snapshot"));

    let system = common::standard_system();
    let id = common::save_article(&system, "Persisted", "stored body", &[4]);
    system.delete_field("node", "page", "body")?;
    snapshots.save(&system.snapshot()?)?;
    assert!(snapshots.exists());

    let snapshot = snapshots.load()?.expect("snapshot written");
    let restored = FieldSystem::builder()
        .store(Store::from_snapshot(snapshot)?)
        .entity_types(standard_entity_types())
        .build()?;
    let entity = restored.load("node", id, false)?.expect("entity restored");
    assert_eq!(common::body_of(&entity).as_deref(), Some("stored body"));
    assert_eq!(restored.field_config_repository().deleted_fields()?.len(), 1);
    assert!(restored.installed_modules()?.contains("standard"));

    let mut next = restored.create("node", serde_json::json!({"type": "page", "title": "Next"}))?;
    restored.save(&mut next)?;
    assert!(next.id().unwrap() > id);
    Ok(())
}
