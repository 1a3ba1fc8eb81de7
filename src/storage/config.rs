use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::core::Result;

/// Active configuration keyed by full config name (`field.storage.node.body`).
///
/// Names are kept ordered so a prefix lookup is a range scan instead of a
/// filter over every object.
pub struct ConfigStore {
    objects: RwLock<BTreeMap<String, JsonValue>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_objects(objects: BTreeMap<String, JsonValue>) -> Self {
        Self {
            objects: RwLock::new(objects),
        }
    }

    pub fn read(&self, name: &str) -> Result<Option<JsonValue>> {
        Ok(self.objects.read()?.get(name).cloned())
    }

    pub fn read_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.read(name)?
            .map(|value| serde_json::from_value(value).map_err(Into::into))
            .transpose()
    }

    pub fn write<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.objects.write()?.insert(name.to_string(), value);
        Ok(())
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read()?.contains_key(name))
    }

    /// Removes `name`; returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.objects.write()?.remove(name).is_some())
    }

    /// All objects whose name starts with `prefix`, in name order.
    pub fn read_prefix(&self, prefix: &str) -> Result<Vec<(String, JsonValue)>> {
        let objects = self.objects.read()?;
        Ok(objects
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read_prefix(prefix)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    pub fn export(&self) -> Result<BTreeMap<String, JsonValue>> {
        Ok(self.objects.read()?.clone())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
