use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::core::Result;

/// Process-wide key/value state that is not configuration.
pub struct StateStore {
    values: RwLock<BTreeMap<String, JsonValue>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_values(values: BTreeMap<String, JsonValue>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let values = self.values.read()?;
        values
            .get(key)
            .cloned()
            .map(|value| serde_json::from_value(value).map_err(Into::into))
            .transpose()
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.values.write()?.insert(key.to_string(), value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.values.write()?.remove(key);
        Ok(())
    }

    pub fn export(&self) -> Result<BTreeMap<String, JsonValue>> {
        Ok(self.values.read()?.clone())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
