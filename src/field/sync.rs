//! Field purging ahead of configuration imports that uninstall modules.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{Level, event, info_span};

use super::manager::FieldConfigManager;
use super::purge::PurgeCoordinator;
use super::repository::FieldConfigRepository;
use super::storage_config::FieldStorageConfig;
use crate::config::FieldSettings;
use crate::core::Result;
use crate::hooks::{SyncStepAlterHandler, SyncWarningHandler};
use crate::storage::{SchemaManager, Store};
use crate::sync::{ChangeOp, ExtensionList, ImporterContext, StepProgress, StorageComparer, SyncStep};

/// Active field storages deleted by an import whose providing module is
/// not in `extensions`.
pub fn active_field_storages_to_purge(
    repository: &FieldConfigRepository,
    extensions: &ExtensionList,
    deletes: &[String],
) -> Result<Vec<FieldStorageConfig>> {
    Ok(active_storages(repository, &extensions.providers(), deletes)?
        .into_values()
        .collect())
}

/// Field storages an import would orphan.
///
/// These are the active storages from [`active_field_storages_to_purge`],
/// plus already deleted storages awaiting purge whose provider is not in
/// `extensions` either.
pub fn field_storages_to_purge(
    repository: &FieldConfigRepository,
    extensions: &ExtensionList,
    deletes: &[String],
) -> Result<Vec<FieldStorageConfig>> {
    let providers = extensions.providers();
    let mut storages = active_storages(repository, &providers, deletes)?;
    for (uuid, entry) in repository.deleted_storages()? {
        if !providers.contains(entry.field_storage.type_provider()) {
            storages.insert(uuid, entry.field_storage);
        }
    }
    Ok(storages.into_values().collect())
}

fn active_storages(
    repository: &FieldConfigRepository,
    providers: &BTreeSet<String>,
    deletes: &[String],
) -> Result<IndexMap<String, FieldStorageConfig>> {
    let prefix = format!("{}.", FieldStorageConfig::CONFIG_PREFIX);
    let mut storages = IndexMap::new();
    for config_name in deletes {
        let Some((entity_type, field_name)) = config_name
            .strip_prefix(&prefix)
            .and_then(|id| id.split_once('.'))
        else {
            continue;
        };
        if let Some(storage) = repository.load_storage(entity_type, field_name)? {
            if !providers.contains(storage.type_provider()) {
                storages.insert(storage.uuid.clone(), storage);
            }
        }
    }
    Ok(storages)
}

/// Puts the field purge step first and warns about fields losing data.
pub struct FieldSyncHandler {
    repository: FieldConfigRepository,
}

impl FieldSyncHandler {
    pub fn new(repository: FieldConfigRepository) -> Self {
        Self { repository }
    }
}

impl SyncStepAlterHandler for FieldSyncHandler {
    fn alter_steps(&self, steps: &mut Vec<SyncStep>, importer: &ImporterContext) -> Result<()> {
        let comparer = importer.storage_comparer();
        let storages = field_storages_to_purge(
            &self.repository,
            &comparer.source_extensions()?,
            comparer.changelist(ChangeOp::Delete),
        )?;
        if !storages.is_empty() && !steps.contains(&SyncStep::FieldPurge) {
            steps.insert(0, SyncStep::FieldPurge);
        }
        Ok(())
    }
}

impl SyncWarningHandler for FieldSyncHandler {
    fn warnings(&self, comparer: &StorageComparer) -> Result<Vec<String>> {
        let storages = active_field_storages_to_purge(
            &self.repository,
            &comparer.source_extensions()?,
            comparer.changelist(ChangeOp::Delete),
        )?;
        if storages.is_empty() {
            return Ok(Vec::new());
        }
        let labels: Vec<&str> = storages.iter().map(FieldStorageConfig::label).collect();
        let warning = if labels.len() == 1 {
            format!("This synchronization will delete data from the field {}.", labels[0])
        } else {
            format!(
                "This synchronization will delete data from the fields: {}.",
                labels.join(", ")
            )
        };
        Ok(vec![warning])
    }
}

const SANDBOX_KEY: &str = "field";

/// Resumable state of the purge step, kept in the importer sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PurgeSandbox {
    purge_batch_size: usize,
    extensions: ExtensionList,
    steps_to_delete: u64,
    current_progress: u64,
    current_storage_id: Option<String>,
}

/// The `FieldPurge` import step.
pub struct FieldStoragePurger {
    store: Store,
    repository: FieldConfigRepository,
    manager: Arc<FieldConfigManager>,
    coordinator: Arc<PurgeCoordinator>,
    schema: Arc<SchemaManager>,
}

impl FieldStoragePurger {
    pub fn new(
        store: Store,
        repository: FieldConfigRepository,
        manager: Arc<FieldConfigManager>,
        coordinator: Arc<PurgeCoordinator>,
        schema: Arc<SchemaManager>,
    ) -> Self {
        Self {
            store,
            repository,
            manager,
            coordinator,
            schema,
        }
    }

    /// Runs one purge batch for the first storage still to purge.
    ///
    /// Call repeatedly until the returned progress is finished. A storage
    /// whose deletion is only staged is deleted on its first visit.
    pub fn process(&self, context: &mut ImporterContext) -> Result<StepProgress> {
        let mut sandbox = match context.sandbox(SANDBOX_KEY) {
            Some(value) => serde_json::from_value::<PurgeSandbox>(value.clone())?,
            None => self.initialize_sandbox(context)?,
        };
        let span = info_span!("field.sync.purge", progress = sandbox.current_progress);
        let _enter = span.enter();

        let deletes = context.unprocessed(ChangeOp::Delete);
        let storages = field_storages_to_purge(&self.repository, &sandbox.extensions, &deletes)?;
        let Some(storage) = storages.into_iter().next() else {
            context.set_sandbox(SANDBOX_KEY, serde_json::to_value(&sandbox)?);
            return Ok(StepProgress {
                finished: 1.0,
                message: None,
            });
        };

        if sandbox.current_storage_id.as_deref() != Some(storage.uuid.as_str()) {
            sandbox.current_storage_id = Some(storage.uuid.clone());
            if !storage.deleted {
                self.manager
                    .delete_field_storage(&storage.entity_type, &storage.field_name)?;
            }
        }
        self.coordinator
            .purge_batch(sandbox.purge_batch_size, Some(storage.uuid.as_str()))?;
        sandbox.current_progress += 1;

        let left = field_storages_to_purge(&self.repository, &sandbox.extensions, &deletes)?.len();
        let progress = if left == 0 {
            StepProgress {
                finished: 1.0,
                message: None,
            }
        } else {
            StepProgress {
                finished: (sandbox.current_progress as f64 / sandbox.steps_to_delete.max(1) as f64)
                    .min(0.99),
                message: Some(format!("Purging field {}", storage.label())),
            }
        };
        event!(
            Level::DEBUG,
            storage = %storage.id(),
            finished = progress.finished,
            "field purge step advanced"
        );
        context.set_sandbox(SANDBOX_KEY, serde_json::to_value(&sandbox)?);
        Ok(progress)
    }

    /// Estimates the number of batches: one per `purge_batch_size` entities
    /// with data, plus a final one per storage.
    fn initialize_sandbox(&self, context: &ImporterContext) -> Result<PurgeSandbox> {
        let purge_batch_size = FieldSettings::load(self.store.config())?.purge_batch_size;
        let extensions = context.storage_comparer().source_extensions()?;
        let storages = field_storages_to_purge(
            &self.repository,
            &extensions,
            &context.unprocessed(ChangeOp::Delete),
        )?;

        let mut steps_to_delete = 0u64;
        for storage in &storages {
            let rows = self.schema.count_field_data(storage, false)?;
            if rows > 0 {
                steps_to_delete += rows.div_ceil(purge_batch_size.max(1)) as u64;
            }
        }
        steps_to_delete += storages.len() as u64;

        Ok(PurgeSandbox {
            purge_batch_size,
            extensions,
            steps_to_delete,
            current_progress: 0,
            current_storage_id: None,
        })
    }
}
