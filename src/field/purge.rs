//! Deferred removal of deleted field data.

use std::sync::Arc;

use serde::Serialize;
use tracing::{Level, event, info_span};

use super::repository::FieldConfigRepository;
use crate::core::Result;
use crate::entity::EntityTypeManager;
use crate::hooks::{FieldPurgeListener, HandlerList};
use crate::storage::SchemaManager;

/// What one purge batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Entities whose deleted field data was removed.
    pub entities_purged: usize,
    /// Uuids of deleted fields that reached `Gone`.
    pub fields_purged: Vec<String>,
    /// Uuids of deleted field storages that reached `Gone`.
    pub storages_purged: Vec<String>,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.entities_purged == 0 && self.fields_purged.is_empty() && self.storages_purged.is_empty()
    }
}

/// Drives deleted fields and storages from `MarkedDeleted` through `Purging` to `Gone`.
pub struct PurgeCoordinator {
    entity_types: Arc<EntityTypeManager>,
    repository: FieldConfigRepository,
    schema: Arc<SchemaManager>,
    listeners: Arc<HandlerList<dyn FieldPurgeListener>>,
}

impl PurgeCoordinator {
    pub fn new(
        entity_types: Arc<EntityTypeManager>,
        repository: FieldConfigRepository,
        schema: Arc<SchemaManager>,
        listeners: Arc<HandlerList<dyn FieldPurgeListener>>,
    ) -> Self {
        Self {
            entity_types,
            repository,
            schema,
            listeners,
        }
    }

    /// Purges data of at most `batch_size` entities, optionally only for
    /// the storage with the given uuid.
    ///
    /// Progress is written to the ledger after every field, so an
    /// interrupted batch resumes where it stopped. Once nothing is left a
    /// call changes nothing and reports nothing.
    pub fn purge_batch(&self, batch_size: usize, storage_uuid: Option<&str>) -> Result<PurgeReport> {
        let span = info_span!(
            "field.purge.batch",
            batch_size = batch_size,
            storage = storage_uuid.unwrap_or("*")
        );
        let _enter = span.enter();

        let mut report = PurgeReport::default();
        let mut remaining = batch_size;

        for (uuid, mut entry) in self.repository.deleted_fields()? {
            if remaining == 0 {
                break;
            }
            if storage_uuid.is_some_and(|wanted| wanted != entry.field_storage.uuid) {
                continue;
            }
            if !self.entity_types.has_definition(&entry.field.entity_type) {
                log::warn!(
                    "skipping purge of field {}: entity type '{}' is not defined",
                    entry.field.id(),
                    entry.field.entity_type
                );
                continue;
            }

            let count = self.schema.purge_field_data(
                &entry.field_storage,
                &entry.field.bundle,
                remaining,
            )?;
            if count > 0 {
                entry.advance(count);
                self.repository.record_deleted_field(entry.clone())?;
                report.entities_purged += count;
            }
            if count < remaining || count == 0 {
                self.repository.forget_deleted_field(&uuid)?;
                for listener in self.listeners.iter() {
                    listener.field_purged(&entry.field);
                }
                event!(Level::INFO, field = %entry.field.id(), "field purged");
                report.fields_purged.push(uuid);
            }
            remaining = remaining.saturating_sub(count);
        }

        let pending = self.repository.deleted_fields()?;
        for (uuid, entry) in self.repository.deleted_storages()? {
            if storage_uuid.is_some_and(|wanted| wanted != uuid) {
                continue;
            }
            if pending.values().any(|field| field.field_storage.uuid == uuid) {
                continue;
            }
            if !self.entity_types.has_definition(&entry.field_storage.entity_type) {
                log::warn!(
                    "skipping purge of field storage {}: entity type '{}' is not defined",
                    entry.field_storage.id(),
                    entry.field_storage.entity_type
                );
                continue;
            }
            self.schema.finalize_purge(&entry.field_storage)?;
            self.repository.forget_deleted_storage(&uuid)?;
            for listener in self.listeners.iter() {
                listener.field_storage_purged(&entry.field_storage);
            }
            event!(Level::INFO, storage = %entry.field_storage.id(), "field storage purged");
            report.storages_purged.push(uuid);
        }

        if !report.is_empty() {
            event!(
                Level::DEBUG,
                entities = report.entities_purged,
                fields = report.fields_purged.len(),
                storages = report.storages_purged.len(),
                "purge batch finished"
            );
        }
        Ok(report)
    }

    /// Whether any deleted field or storage still waits for purging.
    pub fn has_pending(&self) -> Result<bool> {
        Ok(!self.repository.deleted_fields()?.is_empty()
            || !self.repository.deleted_storages()?.is_empty())
    }
}
