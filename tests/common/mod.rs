#![allow(dead_code)]

use fieldstore::profile::{standard_entity_types, standard_provision};
use fieldstore::{ContentEntity, EntityId, FieldSettings, FieldSystem};
use serde_json::json;

/// Standard entity types with the standard profile installed.
pub fn standard_system() -> FieldSystem {
    standard_system_with(FieldSettings::new())
}

pub fn standard_system_with(settings: FieldSettings) -> FieldSystem {
    let system = FieldSystem::builder()
        .entity_types(standard_entity_types())
        .settings(settings)
        .build()
        .unwrap();
    system.install_module(&standard_provision()).unwrap();
    system
}

/// Saves an article with a body and the given tag ids.
pub fn save_article(system: &FieldSystem, title: &str, body: &str, tags: &[u64]) -> EntityId {
    let mut entity = system
        .create(
            "node",
            json!({"type": "article", "title": title, "body": body, "field_tags": tags}),
        )
        .unwrap();
    system.save(&mut entity).unwrap();
    entity.id().unwrap()
}

pub fn save_page(system: &FieldSystem, title: &str, body: &str) -> EntityId {
    let mut entity = system
        .create("node", json!({"type": "page", "title": title, "body": body}))
        .unwrap();
    system.save(&mut entity).unwrap();
    entity.id().unwrap()
}

pub fn body_of(entity: &ContentEntity) -> Option<String> {
    entity
        .get_value("body")
        .and_then(|value| value.as_str())
        .map(str::to_string)
}
