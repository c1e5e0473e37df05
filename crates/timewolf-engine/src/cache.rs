//! Per-run key/value cache shared by every module of a run.

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

const RECIPE_NAME_KEY: &str = "recipe_name";
const CLI_ARGS_KEY: &str = "cli_args";

#[derive(Debug, Default)]
pub struct RunCache {
    values: DashMap<String, Value>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. Values that fail to serialize are ignored.
    pub fn add<V: Serialize>(&self, key: impl Into<String>, value: V) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.values.insert(key.into(), value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping unserializable cache value"),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_raw(key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set_recipe_name(&self, name: &str) {
        self.add(RECIPE_NAME_KEY, name);
    }

    pub fn recipe_name(&self) -> Option<String> {
        self.get(RECIPE_NAME_KEY)
    }

    pub fn set_cli_args(&self, args: &serde_json::Map<String, Value>) {
        self.add(CLI_ARGS_KEY, args);
    }

    pub fn cli_args(&self) -> Option<serde_json::Map<String, Value>> {
        self.get(CLI_ARGS_KEY)
    }
}
