//! Configuration synchronization surface.
//!
//! The import pipeline itself lives elsewhere; this module models the parts
//! field handling hooks into: the step list, the source/target comparison
//! and the per-import context handed to steps.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::Result;

/// Config name holding the installed module list.
pub const EXTENSION_CONFIG: &str = "core.extension";

/// Provider name that is always installed.
pub const CORE_PROVIDER: &str = "core";

/// One step of a configuration import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Initialize,
    /// Purges data of fields whose providing module goes away.
    FieldPurge,
    /// Installs and uninstalls modules.
    ProcessExtensions,
    ProcessConfigurations,
    ProcessMissingContent,
    Finish,
}

impl SyncStep {
    pub fn default_steps() -> Vec<Self> {
        vec![
            Self::Initialize,
            Self::ProcessExtensions,
            Self::ProcessConfigurations,
            Self::ProcessMissingContent,
            Self::Finish,
        ]
    }

    /// Whether the step may uninstall modules.
    pub fn removes_modules(&self) -> bool {
        matches!(self, Self::ProcessExtensions)
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::FieldPurge => "field_purge",
            Self::ProcessExtensions => "process_extensions",
            Self::ProcessConfigurations => "process_configurations",
            Self::ProcessMissingContent => "process_missing_content",
            Self::Finish => "finish",
        };
        f.write_str(name)
    }
}

/// The `core.extension` configuration: installed modules and their weights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionList {
    #[serde(default)]
    pub module: BTreeMap<String, i32>,
}

impl ExtensionList {
    pub fn new<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            module: modules.into_iter().map(|name| (name.into(), 0)).collect(),
        }
    }

    pub fn contains(&self, module: &str) -> bool {
        self.module.contains_key(module)
    }

    /// Installed modules plus the always-present core provider.
    pub fn providers(&self) -> BTreeSet<String> {
        let mut providers: BTreeSet<String> = self.module.keys().cloned().collect();
        providers.insert(CORE_PROVIDER.to_string());
        providers
    }
}

/// Operations a changelist is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// Config names to create, update and delete, each sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelist {
    pub create: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
}

impl Changelist {
    pub fn get(&self, op: ChangeOp) -> &[String] {
        match op {
            ChangeOp::Create => &self.create,
            ChangeOp::Update => &self.update,
            ChangeOp::Delete => &self.delete,
        }
    }

    pub fn has_changes(&self) -> bool {
        !(self.create.is_empty() && self.update.is_empty() && self.delete.is_empty())
    }
}

/// Compares staged (source) configuration against the active (target) one.
#[derive(Debug, Clone)]
pub struct StorageComparer {
    source: BTreeMap<String, JsonValue>,
    changelist: Changelist,
}

impl StorageComparer {
    pub fn new(source: BTreeMap<String, JsonValue>, target: &BTreeMap<String, JsonValue>) -> Self {
        let mut changelist = Changelist::default();
        for (name, value) in &source {
            match target.get(name) {
                None => changelist.create.push(name.clone()),
                Some(active) if active != value => changelist.update.push(name.clone()),
                Some(_) => {}
            }
        }
        changelist.delete = target
            .keys()
            .filter(|name| !source.contains_key(*name))
            .cloned()
            .collect();
        Self { source, changelist }
    }

    /// A comparer with a ready-made changelist.
    pub fn with_changelist(source: BTreeMap<String, JsonValue>, changelist: Changelist) -> Self {
        Self { source, changelist }
    }

    pub fn changelist(&self, op: ChangeOp) -> &[String] {
        self.changelist.get(op)
    }

    pub fn source_read(&self, name: &str) -> Option<&JsonValue> {
        self.source.get(name)
    }

    /// The module list the import ends with.
    pub fn source_extensions(&self) -> Result<ExtensionList> {
        match self.source.get(EXTENSION_CONFIG) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(ExtensionList::default()),
        }
    }
}

/// Per-import state handed to steps and step-alter handlers.
#[derive(Debug)]
pub struct ImporterContext {
    comparer: StorageComparer,
    processed: BTreeMap<ChangeOp, BTreeSet<String>>,
    sandbox: BTreeMap<String, JsonValue>,
}

impl ImporterContext {
    pub fn new(comparer: StorageComparer) -> Self {
        Self {
            comparer,
            processed: BTreeMap::new(),
            sandbox: BTreeMap::new(),
        }
    }

    pub fn storage_comparer(&self) -> &StorageComparer {
        &self.comparer
    }

    /// Names of `op` not yet processed by the import.
    pub fn unprocessed(&self, op: ChangeOp) -> Vec<String> {
        let done = self.processed.get(&op);
        self.comparer
            .changelist(op)
            .iter()
            .filter(|name| done.is_none_or(|done| !done.contains(*name)))
            .cloned()
            .collect()
    }

    pub fn mark_processed(&mut self, op: ChangeOp, name: &str) {
        self.processed.entry(op).or_default().insert(name.to_string());
    }

    /// Step-private state that survives between invocations of a step.
    pub fn sandbox(&self, key: &str) -> Option<&JsonValue> {
        self.sandbox.get(key)
    }

    pub fn set_sandbox(&mut self, key: &str, value: JsonValue) {
        self.sandbox.insert(key.to_string(), value);
    }
}

/// Progress of a resumable step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProgress {
    /// Fraction done, `1.0` when finished.
    pub finished: f64,
    pub message: Option<String>,
}

impl StepProgress {
    pub fn is_finished(&self) -> bool {
        self.finished >= 1.0
    }
}
