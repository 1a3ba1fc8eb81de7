//! The assembled field system and its outward-facing entry points.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::cache::LruCacheBackend;
use crate::config::FieldSettings;
use crate::core::{EntityError, EntityId, Result, RevisionId};
use crate::display::{DisplayRepository, EntityDisplay};
use crate::entity::{
    BundleInfo, ContentEntity, EntityStorage, EntityType, EntityTypeManager, SaveStatus,
    StorageContext,
};
use crate::field::{
    DisplayBundleHandler, EntityFieldManager, FieldBundleHandler, FieldConfig, FieldConfigManager,
    FieldConfigRepository, FieldStorageConfig, FieldStoragePurger, FieldSyncHandler,
    FieldTypeDefinition, FieldTypeManager, PurgeCoordinator, PurgeReport,
};
use crate::hooks::{
    BundleLifecycleHandler, DEFAULT_PRIORITY, EntityHook, FieldPurgeListener, HandlerList,
    MaintenanceHandler, SyncStepAlterHandler, SyncWarningHandler, SystemInfoAlterHandler,
};
use crate::module::{FieldModuleInfoHandler, FieldProvisioner, ModuleInfo, ModuleProvision};
use crate::storage::{SchemaChange, SchemaManager, Store, StoreSnapshot};
use crate::sync::{ExtensionList, ImporterContext, StepProgress, StorageComparer, SyncStep};

/// Priority of the built-in field handlers; extensions registered with the
/// default priority run after them.
const FIELD_HANDLER_PRIORITY: i32 = 100;

/// Builder for [`FieldSystem`].
pub struct FieldSystemBuilder {
    store: Option<Store>,
    settings: Option<FieldSettings>,
    entity_types: Vec<EntityType>,
    field_types: FieldTypeManager,
    entity_hooks: HandlerList<dyn EntityHook>,
    purge_listeners: HandlerList<dyn FieldPurgeListener>,
    bundle_handlers: HandlerList<dyn BundleLifecycleHandler>,
    info_handlers: HandlerList<dyn SystemInfoAlterHandler>,
    step_handlers: HandlerList<dyn SyncStepAlterHandler>,
    warning_handlers: HandlerList<dyn SyncWarningHandler>,
    maintenance: HandlerList<dyn MaintenanceHandler>,
}

impl FieldSystemBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            settings: None,
            entity_types: Vec::new(),
            field_types: FieldTypeManager::with_core_types(),
            entity_hooks: HandlerList::new(),
            purge_listeners: HandlerList::new(),
            bundle_handlers: HandlerList::new(),
            info_handlers: HandlerList::new(),
            step_handlers: HandlerList::new(),
            warning_handlers: HandlerList::new(),
            maintenance: HandlerList::new(),
        }
    }

    /// Backing store to use; an empty in-memory store by default.
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Settings to save into the store; otherwise the stored ones are used.
    pub fn settings(mut self, settings: FieldSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    pub fn entity_types(mut self, entity_types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types.extend(entity_types);
        self
    }

    pub fn field_type(mut self, definition: FieldTypeDefinition) -> Result<Self> {
        self.field_types.register(definition)?;
        Ok(self)
    }

    pub fn entity_hook(mut self, hook: Arc<dyn EntityHook>) -> Self {
        self.entity_hooks.register(hook);
        self
    }

    pub fn purge_listener(mut self, listener: Arc<dyn FieldPurgeListener>) -> Self {
        self.purge_listeners.register(listener);
        self
    }

    pub fn bundle_handler(mut self, handler: Arc<dyn BundleLifecycleHandler>, priority: i32) -> Self {
        self.bundle_handlers.register_with_priority(handler, priority);
        self
    }

    pub fn system_info_handler(mut self, handler: Arc<dyn SystemInfoAlterHandler>) -> Self {
        self.info_handlers.register(handler);
        self
    }

    pub fn sync_step_handler(mut self, handler: Arc<dyn SyncStepAlterHandler>, priority: i32) -> Self {
        self.step_handlers.register_with_priority(handler, priority);
        self
    }

    pub fn sync_warning_handler(mut self, handler: Arc<dyn SyncWarningHandler>) -> Self {
        self.warning_handlers.register(handler);
        self
    }

    pub fn maintenance_handler(mut self, handler: Arc<dyn MaintenanceHandler>) -> Self {
        self.maintenance.register(handler);
        self
    }

    /// Registers entity types, installs their tables and wires the services.
    pub fn build(self) -> Result<FieldSystem> {
        let store = self.store.unwrap_or_else(Store::in_memory);
        let settings = match self.settings {
            Some(settings) => {
                settings.save(store.config())?;
                settings
            }
            None => FieldSettings::load(store.config())?,
        };
        settings.validate()?;

        let mut entity_type_manager = EntityTypeManager::new();
        for entity_type in self.entity_types {
            entity_type_manager.register(entity_type)?;
        }
        let entity_types = Arc::new(entity_type_manager);
        let field_types = Arc::new(self.field_types);

        let bundle_info = Arc::new(BundleInfo::new(
            store.clone(),
            Arc::clone(&entity_types),
            Arc::new(LruCacheBackend::new(settings.definition_cache_capacity)),
        ));
        let repository = FieldConfigRepository::new(store.clone());
        let fields = Arc::new(EntityFieldManager::new(
            Arc::clone(&entity_types),
            Arc::clone(&bundle_info),
            repository.clone(),
            Arc::new(LruCacheBackend::new(settings.definition_cache_capacity)),
        ));
        let schema = Arc::new(SchemaManager::new(
            store.clone(),
            Arc::clone(&entity_types),
            Arc::clone(&field_types),
        ));
        for entity_type in entity_types.definitions() {
            schema.install_entity_type(entity_type)?;
        }

        let displays = Arc::new(DisplayRepository::new(
            store.clone(),
            Arc::clone(&fields),
            Arc::clone(&field_types),
        ));
        let field_configs = Arc::new(FieldConfigManager::new(
            Arc::clone(&entity_types),
            Arc::clone(&field_types),
            Arc::clone(&bundle_info),
            repository.clone(),
            Arc::clone(&fields),
            Arc::clone(&schema),
            Arc::clone(&displays),
        ));
        let coordinator = Arc::new(PurgeCoordinator::new(
            Arc::clone(&entity_types),
            repository.clone(),
            Arc::clone(&schema),
            Arc::new(self.purge_listeners),
        ));
        let purger = FieldStoragePurger::new(
            store.clone(),
            repository.clone(),
            Arc::clone(&field_configs),
            Arc::clone(&coordinator),
            Arc::clone(&schema),
        );
        let provisioner = FieldProvisioner::new(
            store.clone(),
            Arc::clone(&bundle_info),
            Arc::clone(&field_configs),
            Arc::clone(&displays),
        );

        let context = StorageContext {
            store: store.clone(),
            fields: Arc::clone(&fields),
            schema: Arc::clone(&schema),
            field_types: Arc::clone(&field_types),
            hooks: Arc::new(self.entity_hooks),
        };
        let storages = entity_types
            .definitions()
            .map(|entity_type| {
                let storage = EntityStorage::new(
                    Arc::clone(entity_type),
                    context.clone(),
                    Arc::new(LruCacheBackend::new(settings.entity_cache_capacity)),
                );
                (entity_type.id().to_string(), Arc::new(storage))
            })
            .collect();

        let mut bundle_handlers = self.bundle_handlers;
        bundle_handlers.register_with_priority(
            Arc::new(FieldBundleHandler::new(
                Arc::clone(&entity_types),
                Arc::clone(&field_configs),
                Arc::clone(&fields),
                Arc::clone(&schema),
            )),
            FIELD_HANDLER_PRIORITY,
        );
        bundle_handlers.register_with_priority(
            Arc::new(DisplayBundleHandler::new(Arc::clone(&displays))),
            FIELD_HANDLER_PRIORITY - 1,
        );

        let mut info_handlers = self.info_handlers;
        info_handlers.register_with_priority(
            Arc::new(FieldModuleInfoHandler::new(
                repository.clone(),
                Arc::clone(&field_types),
            )),
            FIELD_HANDLER_PRIORITY,
        );

        let sync_handler = Arc::new(FieldSyncHandler::new(repository.clone()));
        let mut step_handlers = self.step_handlers;
        step_handlers.register_with_priority(sync_handler.clone(), FIELD_HANDLER_PRIORITY);
        let mut warning_handlers = self.warning_handlers;
        warning_handlers.register_with_priority(sync_handler, FIELD_HANDLER_PRIORITY);

        let mut maintenance = self.maintenance;
        maintenance.register_with_priority(
            Arc::new(FieldPurgeTask {
                store: store.clone(),
                coordinator: Arc::clone(&coordinator),
            }),
            DEFAULT_PRIORITY,
        );

        log::info!(
            "field system ready: {} entity types, {} field types",
            entity_types.ids().len(),
            field_types.definitions().count()
        );
        Ok(FieldSystem {
            store,
            entity_types,
            field_types,
            bundle_info,
            repository,
            fields,
            schema,
            displays,
            field_configs,
            coordinator,
            purger,
            provisioner,
            storages,
            bundle_handlers,
            info_handlers,
            step_handlers,
            warning_handlers,
            maintenance,
        })
    }
}

impl Default for FieldSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a purge batch sized by the stored `purge_batch_size`.
struct FieldPurgeTask {
    store: Store,
    coordinator: Arc<PurgeCoordinator>,
}

impl MaintenanceHandler for FieldPurgeTask {
    fn name(&self) -> &str {
        "field_purge"
    }

    fn run(&self) -> Result<()> {
        let settings = FieldSettings::load(self.store.config())?;
        let report = self.coordinator.purge_batch(settings.purge_batch_size, None)?;
        if !report.is_empty() {
            log::info!(
                "cron purged data of {} entities, {} fields, {} storages",
                report.entities_purged,
                report.fields_purged.len(),
                report.storages_purged.len()
            );
        }
        Ok(())
    }
}

/// Entity types, fields, storage and displays wired over one [`Store`].
pub struct FieldSystem {
    store: Store,
    entity_types: Arc<EntityTypeManager>,
    field_types: Arc<FieldTypeManager>,
    bundle_info: Arc<BundleInfo>,
    repository: FieldConfigRepository,
    fields: Arc<EntityFieldManager>,
    schema: Arc<SchemaManager>,
    displays: Arc<DisplayRepository>,
    field_configs: Arc<FieldConfigManager>,
    coordinator: Arc<PurgeCoordinator>,
    purger: FieldStoragePurger,
    provisioner: FieldProvisioner,
    storages: BTreeMap<String, Arc<EntityStorage>>,
    bundle_handlers: HandlerList<dyn BundleLifecycleHandler>,
    info_handlers: HandlerList<dyn SystemInfoAlterHandler>,
    step_handlers: HandlerList<dyn SyncStepAlterHandler>,
    warning_handlers: HandlerList<dyn SyncWarningHandler>,
    maintenance: HandlerList<dyn MaintenanceHandler>,
}

impl FieldSystem {
    pub fn builder() -> FieldSystemBuilder {
        FieldSystemBuilder::new()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> Result<FieldSettings> {
        FieldSettings::load(self.store.config())
    }

    pub fn save_settings(&self, settings: &FieldSettings) -> Result<()> {
        settings.save(self.store.config())
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        self.store.snapshot()
    }

    pub fn entity_type_manager(&self) -> &Arc<EntityTypeManager> {
        &self.entity_types
    }

    pub fn field_type_manager(&self) -> &Arc<FieldTypeManager> {
        &self.field_types
    }

    pub fn bundle_info(&self) -> &Arc<BundleInfo> {
        &self.bundle_info
    }

    pub fn field_manager(&self) -> &Arc<EntityFieldManager> {
        &self.fields
    }

    pub fn field_config_repository(&self) -> &FieldConfigRepository {
        &self.repository
    }

    pub fn schema_manager(&self) -> &Arc<SchemaManager> {
        &self.schema
    }

    pub fn display_repository(&self) -> &Arc<DisplayRepository> {
        &self.displays
    }

    pub fn purge_coordinator(&self) -> &Arc<PurgeCoordinator> {
        &self.coordinator
    }

    pub fn storage(&self, entity_type_id: &str) -> Result<&Arc<EntityStorage>> {
        self.storages
            .get(entity_type_id)
            .ok_or_else(|| EntityError::EntityTypeNotFound(entity_type_id.to_string()))
    }

    /// Loads one entity; `reset` drops its cached copy first.
    pub fn load(&self, entity_type_id: &str, id: EntityId, reset: bool) -> Result<Option<ContentEntity>> {
        self.storage(entity_type_id)?.load(id, reset)
    }

    pub fn load_multiple(
        &self,
        entity_type_id: &str,
        ids: Option<&[EntityId]>,
        reset: bool,
    ) -> Result<BTreeMap<EntityId, ContentEntity>> {
        self.storage(entity_type_id)?.load_multiple(ids, reset)
    }

    pub fn load_by_properties(
        &self,
        entity_type_id: &str,
        values: JsonValue,
    ) -> Result<BTreeMap<EntityId, ContentEntity>> {
        self.storage(entity_type_id)?.load_by_properties(values)
    }

    pub fn load_unchanged(&self, entity_type_id: &str, id: EntityId) -> Result<Option<ContentEntity>> {
        self.storage(entity_type_id)?.load_unchanged(id)
    }

    pub fn create(&self, entity_type_id: &str, values: JsonValue) -> Result<ContentEntity> {
        self.storage(entity_type_id)?.create(values)
    }

    pub fn save(&self, entity: &mut ContentEntity) -> Result<SaveStatus> {
        self.storage(entity.entity_type_id())?.save(entity)
    }

    pub fn delete_multiple(&self, entity_type_id: &str, ids: &[EntityId]) -> Result<usize> {
        self.storage(entity_type_id)?.delete_multiple(ids)
    }

    pub fn revision_load(&self, entity_type_id: &str, revision_id: RevisionId) -> Result<Option<ContentEntity>> {
        self.storage(entity_type_id)?.revision_load(revision_id)
    }

    pub fn revision_delete(&self, entity_type_id: &str, revision_id: RevisionId) -> Result<bool> {
        self.storage(entity_type_id)?.revision_delete(revision_id)
    }

    pub fn get_display(&self, entity_type_id: &str, bundle: &str, mode: &str) -> Result<EntityDisplay> {
        self.displays.view_display(entity_type_id, bundle, mode)
    }

    pub fn get_form_display(&self, entity_type_id: &str, bundle: &str, mode: &str) -> Result<EntityDisplay> {
        self.displays.form_display(entity_type_id, bundle, mode)
    }

    pub fn save_display(&self, display: &mut EntityDisplay) -> Result<()> {
        self.displays.save(display)
    }

    pub fn create_field_storage(&self, storage: FieldStorageConfig) -> Result<Arc<FieldStorageConfig>> {
        let storage = self.field_configs.create_field_storage(storage)?;
        self.reset_entity_caches();
        Ok(storage)
    }

    pub fn update_field_storage(&self, storage: FieldStorageConfig) -> Result<SchemaChange> {
        let change = self.field_configs.update_field_storage(storage)?;
        self.reset_entity_caches();
        Ok(change)
    }

    pub fn delete_field_storage(&self, entity_type_id: &str, field_name: &str) -> Result<bool> {
        let deleted = self.field_configs.delete_field_storage(entity_type_id, field_name)?;
        self.reset_entity_caches();
        Ok(deleted)
    }

    pub fn create_field(&self, field: FieldConfig) -> Result<FieldConfig> {
        let field = self.field_configs.create_field(field)?;
        self.reset_entity_caches();
        Ok(field)
    }

    pub fn update_field(&self, field: FieldConfig) -> Result<FieldConfig> {
        let field = self.field_configs.update_field(field)?;
        self.reset_entity_caches();
        Ok(field)
    }

    pub fn delete_field(&self, entity_type_id: &str, bundle: &str, field_name: &str) -> Result<bool> {
        let deleted = self.field_configs.delete_field(entity_type_id, bundle, field_name)?;
        self.reset_entity_caches();
        Ok(deleted)
    }

    pub fn create_bundle(&self, entity_type_id: &str, bundle: &str, label: &str) -> Result<()> {
        if self.bundle_info.bundle_exists(entity_type_id, bundle)? {
            return Err(EntityError::ConfigExists(format!("{}.{}", entity_type_id, bundle)));
        }
        self.bundle_info.save(entity_type_id, bundle, label)?;
        for handler in self.bundle_handlers.iter() {
            handler.on_bundle_create(entity_type_id, bundle)?;
        }
        self.fields.clear_cached_field_definitions();
        Ok(())
    }

    /// Renames a bundle, cascading to fields, deleted-field ledger entries,
    /// displays and stored rows.
    pub fn rename_bundle(&self, entity_type_id: &str, bundle_old: &str, bundle_new: &str) -> Result<()> {
        let bundles = self.bundle_info.bundles(entity_type_id)?;
        let Some(label) = bundles.get(bundle_old) else {
            return Err(EntityError::ConfigNotFound(format!("{}.{}", entity_type_id, bundle_old)));
        };
        if bundles.contains_key(bundle_new) {
            return Err(EntityError::ConfigExists(format!("{}.{}", entity_type_id, bundle_new)));
        }

        self.bundle_info.save(entity_type_id, bundle_new, label)?;
        for handler in self.bundle_handlers.iter() {
            handler.on_bundle_rename(entity_type_id, bundle_old, bundle_new)?;
        }
        self.bundle_info.remove(entity_type_id, bundle_old)?;
        self.fields.clear_cached_field_definitions();
        self.storage(entity_type_id)?.reset_cache(None);
        Ok(())
    }

    /// Deletes a bundle. Its fields are marked deleted and purged later.
    pub fn delete_bundle(&self, entity_type_id: &str, bundle: &str) -> Result<()> {
        if !self.bundle_info.bundle_exists(entity_type_id, bundle)? {
            return Err(EntityError::ConfigNotFound(format!("{}.{}", entity_type_id, bundle)));
        }
        for handler in self.bundle_handlers.iter() {
            handler.on_bundle_delete(entity_type_id, bundle)?;
        }
        self.bundle_info.remove(entity_type_id, bundle)?;
        self.fields.clear_cached_field_definitions();
        self.reset_entity_caches();
        Ok(())
    }

    pub fn install_module(&self, provision: &ModuleProvision) -> Result<()> {
        self.provisioner.install(provision)?;
        self.fields.clear_cached_field_definitions();
        self.reset_entity_caches();
        Ok(())
    }

    /// Uninstalls a module unless a handler marks it required.
    pub fn uninstall_module(&self, module: &str) -> Result<bool> {
        let info = self.module_info(module)?;
        if info.required {
            return Err(EntityError::Validation(format!(
                "Module '{}' is required: {}",
                module,
                info.explanation.as_deref().unwrap_or("in use")
            )));
        }
        self.provisioner.uninstall(module)
    }

    pub fn installed_modules(&self) -> Result<ExtensionList> {
        self.provisioner.installed_modules()
    }

    pub fn system_info_alter(&self, info: &mut ModuleInfo) -> Result<()> {
        for handler in self.info_handlers.iter() {
            handler.system_info_alter(info)?;
        }
        Ok(())
    }

    pub fn module_info(&self, module: &str) -> Result<ModuleInfo> {
        let mut info = ModuleInfo::new(module);
        self.system_info_alter(&mut info)?;
        Ok(info)
    }

    pub fn compute_step_alterations(&self, steps: &mut Vec<SyncStep>, importer: &ImporterContext) -> Result<()> {
        for handler in self.step_handlers.iter() {
            handler.alter_steps(steps, importer)?;
        }
        Ok(())
    }

    pub fn compute_warnings(&self, comparer: &StorageComparer) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        for handler in self.warning_handlers.iter() {
            warnings.extend(handler.warnings(comparer)?);
        }
        Ok(warnings)
    }

    /// Runs one invocation of the field purge import step.
    pub fn process_field_purge(&self, importer: &mut ImporterContext) -> Result<StepProgress> {
        let progress = self.purger.process(importer)?;
        self.reset_entity_caches();
        Ok(progress)
    }

    pub fn purge_batch(&self, batch_size: usize) -> Result<PurgeReport> {
        self.coordinator.purge_batch(batch_size, None)
    }

    /// Periodic maintenance. Failures are logged and retried next run.
    pub fn cron(&self) {
        for handler in self.maintenance.iter() {
            if let Err(err) = handler.run() {
                log::error!("maintenance task {} failed: {}", handler.name(), err);
            }
        }
    }

    fn reset_entity_caches(&self) {
        for storage in self.storages.values() {
            storage.reset_cache(None);
        }
    }
}
