use std::collections::BTreeMap;
use std::sync::Arc;

use super::entity_type::EntityType;
use crate::core::{EntityError, Result};

/// Registry of discovered entity types.
///
/// Types are registered while the system is assembled; once the manager is
/// shared behind an `Arc` there is no way to mutate it.
#[derive(Debug, Clone, Default)]
pub struct EntityTypeManager {
    definitions: BTreeMap<String, Arc<EntityType>>,
}

impl EntityTypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: EntityType) -> Result<()> {
        if self.definitions.contains_key(entity_type.id()) {
            return Err(EntityError::Validation(format!(
                "Entity type '{}' is already registered",
                entity_type.id()
            )));
        }
        let entity_type = entity_type.finalize()?;
        log::debug!("registered entity type {}", entity_type.id());
        self.definitions
            .insert(entity_type.id().to_string(), Arc::new(entity_type));
        Ok(())
    }

    pub fn get_definition(&self, id: &str) -> Option<Arc<EntityType>> {
        self.definitions.get(id).cloned()
    }

    pub fn definition(&self, id: &str) -> Result<Arc<EntityType>> {
        self.get_definition(id)
            .ok_or_else(|| EntityError::EntityTypeNotFound(id.to_string()))
    }

    pub fn has_definition(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.definitions.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }
}
