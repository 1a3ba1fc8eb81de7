//! Module install and module-list integration.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::display::{DisplayComponent, DisplayContext, DisplayRepository};
use crate::entity::BundleInfo;
use crate::field::{FieldConfig, FieldConfigManager, FieldConfigRepository, FieldStorageConfig, FieldTypeManager};
use crate::hooks::SystemInfoAlterHandler;
use crate::storage::Store;
use crate::sync::{EXTENSION_CONFIG, ExtensionList};

/// A module's entry in the module list, as shown to administrators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub explanation: Option<String>,
    /// One line per field type in use.
    #[serde(default)]
    pub details: Vec<String>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A display component placed on install.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayProvision {
    pub context: DisplayContext,
    pub entity_type: String,
    pub bundle: String,
    pub mode: String,
    pub field_name: String,
    pub component: DisplayComponent,
}

/// Default configuration a module ships.
#[derive(Debug, Clone, Default)]
pub struct ModuleProvision {
    pub name: String,
    /// `(entity_type, bundle, label)`
    pub bundles: Vec<(String, String, String)>,
    pub field_storages: Vec<FieldStorageConfig>,
    pub fields: Vec<FieldConfig>,
    pub displays: Vec<DisplayProvision>,
}

impl ModuleProvision {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn bundle(mut self, entity_type: &str, bundle: &str, label: &str) -> Self {
        self.bundles
            .push((entity_type.to_string(), bundle.to_string(), label.to_string()));
        self
    }

    pub fn field_storage(mut self, storage: FieldStorageConfig) -> Self {
        self.field_storages.push(storage);
        self
    }

    pub fn field(mut self, field: FieldConfig) -> Self {
        self.fields.push(field);
        self
    }

    pub fn display(mut self, display: DisplayProvision) -> Self {
        self.displays.push(display);
        self
    }
}

/// Installs module configuration: bundles, then field storages, then
/// fields, then display components.
pub struct FieldProvisioner {
    store: Store,
    bundle_info: Arc<BundleInfo>,
    manager: Arc<FieldConfigManager>,
    displays: Arc<DisplayRepository>,
}

impl FieldProvisioner {
    pub fn new(
        store: Store,
        bundle_info: Arc<BundleInfo>,
        manager: Arc<FieldConfigManager>,
        displays: Arc<DisplayRepository>,
    ) -> Self {
        Self {
            store,
            bundle_info,
            manager,
            displays,
        }
    }

    /// Installs `provision` and adds the module to `core.extension`.
    ///
    /// Storages and fields that already exist are left alone, so a module
    /// can be reinstalled over its own configuration.
    pub fn install(&self, provision: &ModuleProvision) -> Result<()> {
        for (entity_type, bundle, label) in &provision.bundles {
            if !self.bundle_info.bundle_exists(entity_type, bundle)? {
                self.bundle_info.save(entity_type, bundle, label)?;
            }
        }

        let repository = self.manager.repository();
        for storage in &provision.field_storages {
            if repository
                .load_storage(&storage.entity_type, &storage.field_name)?
                .is_none()
            {
                self.manager.create_field_storage(storage.clone())?;
            }
        }
        for field in &provision.fields {
            if repository
                .load_field(&field.entity_type, &field.bundle, &field.field_name)?
                .is_none()
            {
                self.manager.create_field(field.clone())?;
            }
        }
        for display in &provision.displays {
            self.displays.set_field_component(
                display.context,
                &display.entity_type,
                &display.bundle,
                &display.mode,
                &display.field_name,
                Some(display.component.clone()),
            )?;
        }

        let mut extensions = self.installed_modules()?;
        extensions.module.entry(provision.name.clone()).or_insert(0);
        self.store.config().write(EXTENSION_CONFIG, &extensions)?;
        log::info!(
            "installed module {}: {} storages, {} fields, {} display components",
            provision.name,
            provision.field_storages.len(),
            provision.fields.len(),
            provision.displays.len()
        );
        Ok(())
    }

    pub fn installed_modules(&self) -> Result<ExtensionList> {
        Ok(self
            .store
            .config()
            .read_as::<ExtensionList>(EXTENSION_CONFIG)?
            .unwrap_or_default())
    }

    /// Drops the module from `core.extension`.
    pub fn uninstall(&self, module: &str) -> Result<bool> {
        let mut extensions = self.installed_modules()?;
        let removed = extensions.module.remove(module).is_some();
        if removed {
            self.store.config().write(EXTENSION_CONFIG, &extensions)?;
            log::info!("uninstalled module {}", module);
        }
        Ok(removed)
    }
}

/// Marks modules that provide field types in use as required.
pub struct FieldModuleInfoHandler {
    repository: FieldConfigRepository,
    field_types: Arc<FieldTypeManager>,
}

impl FieldModuleInfoHandler {
    pub fn new(repository: FieldConfigRepository, field_types: Arc<FieldTypeManager>) -> Self {
        Self {
            repository,
            field_types,
        }
    }
}

impl SystemInfoAlterHandler for FieldModuleInfoHandler {
    /// Storages awaiting purge count too; they only get the "pending
    /// deletion" explanation when no live storage remains.
    fn system_info_alter(&self, info: &mut ModuleInfo) -> Result<()> {
        let live: Vec<FieldStorageConfig> = self
            .repository
            .all_storages()?
            .into_iter()
            .filter(|storage| storage.module == info.name)
            .collect();
        let pending = self
            .repository
            .deleted_storages()?
            .values()
            .any(|entry| entry.field_storage.module == info.name);
        if live.is_empty() && !pending {
            return Ok(());
        }

        info.required = true;
        if live.is_empty() {
            info.explanation = Some("Fields pending deletion".to_string());
            return Ok(());
        }

        let mut in_use: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for storage in &live {
            in_use
                .entry(storage.field_type.as_str())
                .or_default()
                .push(storage.label());
        }
        info.explanation = Some("Fields type(s) in use".to_string());
        info.details = in_use
            .into_iter()
            .map(|(field_type, labels)| {
                let type_label = self
                    .field_types
                    .get_definition(field_type)
                    .map_or(field_type, |definition| definition.label.as_str());
                format!("Field type: {} is used in: {}", type_label, labels.join(", "))
            })
            .collect();
        Ok(())
    }
}
