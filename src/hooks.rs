//! Extension points.
//!
//! Each extension point is a narrow trait; implementations are registered in
//! a [`HandlerList`] and run by descending priority, then registration order.

use std::sync::Arc;

use crate::core::Result;
use crate::entity::ContentEntity;
use crate::field::{FieldConfig, FieldStorageConfig};
use crate::module::ModuleInfo;
use crate::sync::{ImporterContext, StorageComparer, SyncStep};

pub const DEFAULT_PRIORITY: i32 = 0;

struct Registered<T: ?Sized> {
    priority: i32,
    sequence: usize,
    handler: Arc<T>,
}

/// Ordered handlers for one extension point.
pub struct HandlerList<T: ?Sized> {
    handlers: Vec<Registered<T>>,
    next_sequence: usize,
}

impl<T: ?Sized> HandlerList<T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_sequence: 0,
        }
    }

    pub fn register(&mut self, handler: Arc<T>) {
        self.register_with_priority(handler, DEFAULT_PRIORITY);
    }

    /// Higher priorities run first; equal priorities keep registration order.
    pub fn register_with_priority(&mut self, handler: Arc<T>, priority: i32) {
        self.handlers.push(Registered {
            priority,
            sequence: self.next_sequence,
            handler,
        });
        self.next_sequence += 1;
        self.handlers
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.handlers.iter().map(|registered| &registered.handler)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<T: ?Sized> Default for HandlerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reacts to bundles being created, renamed or deleted.
pub trait BundleLifecycleHandler: Send + Sync {
    fn on_bundle_create(&self, _entity_type_id: &str, _bundle: &str) -> Result<()> {
        Ok(())
    }

    fn on_bundle_rename(&self, entity_type_id: &str, bundle_old: &str, bundle_new: &str) -> Result<()>;

    fn on_bundle_delete(&self, entity_type_id: &str, bundle: &str) -> Result<()>;
}

/// Alters the module list's view of one module.
pub trait SystemInfoAlterHandler: Send + Sync {
    fn system_info_alter(&self, info: &mut ModuleInfo) -> Result<()>;
}

/// Alters the step list of a configuration import.
pub trait SyncStepAlterHandler: Send + Sync {
    fn alter_steps(&self, steps: &mut Vec<SyncStep>, importer: &ImporterContext) -> Result<()>;
}

/// Contributes warnings to the configuration import preview.
pub trait SyncWarningHandler: Send + Sync {
    fn warnings(&self, comparer: &StorageComparer) -> Result<Vec<String>>;
}

/// Periodic maintenance work.
pub trait MaintenanceHandler: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> Result<()>;
}

/// Entity storage events.
pub trait EntityHook: Send + Sync {
    fn presave(&self, _entity: &mut ContentEntity) -> Result<()> {
        Ok(())
    }

    fn predelete(&self, _entity: &ContentEntity) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _entity: &ContentEntity) -> Result<()> {
        Ok(())
    }
}

/// Notified as deleted fields finish purging.
pub trait FieldPurgeListener: Send + Sync {
    fn field_purged(&self, _field: &FieldConfig) {}

    fn field_storage_purged(&self, _storage: &FieldStorageConfig) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Handler(&'static str);

    impl Named for Handler {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_priority_then_registration_order() {
        let mut list: HandlerList<dyn Named> = HandlerList::new();
        list.register(Arc::new(Handler("first")));
        list.register_with_priority(Arc::new(Handler("urgent")), 10);
        list.register(Arc::new(Handler("second")));
        list.register_with_priority(Arc::new(Handler("late")), -5);

        let names: Vec<&str> = list.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["urgent", "first", "second", "late"]);
        assert_eq!(list.len(), 4);
    }
}
