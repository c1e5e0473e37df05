//! Telemetry sinks.

use std::fmt::Write as _;

use parking_lot::Mutex;
use uuid::Uuid;

/// Receives timing and usage entries for a run.
///
/// Logging is fire-and-forget: sinks swallow their own failures.
#[cfg_attr(test, mockall::automock)]
pub trait Telemetry: Send + Sync {
    fn log_telemetry(&self, key: &str, value: &str, module: &str, recipe: &str);

    /// Human readable dump of everything logged so far.
    fn format_telemetry(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEntry {
    pub workflow_uuid: Uuid,
    pub recipe: String,
    pub module: String,
    pub key: String,
    pub value: String,
}

/// In-memory telemetry, grouped under a random workflow id.
#[derive(Debug)]
pub struct BaseTelemetry {
    workflow_uuid: Uuid,
    entries: Mutex<Vec<TelemetryEntry>>,
}

impl Default for BaseTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseTelemetry {
    pub fn new() -> Self {
        Self {
            workflow_uuid: Uuid::new_v4(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn workflow_uuid(&self) -> Uuid {
        self.workflow_uuid
    }

    pub fn entries(&self) -> Vec<TelemetryEntry> {
        self.entries.lock().clone()
    }

    /// Entries logged for a given module and key.
    pub fn find(&self, module: &str, key: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.module == module && e.key == key)
            .map(|e| e.value.clone())
            .collect()
    }
}

impl Telemetry for BaseTelemetry {
    fn log_telemetry(&self, key: &str, value: &str, module: &str, recipe: &str) {
        self.entries.lock().push(TelemetryEntry {
            workflow_uuid: self.workflow_uuid,
            recipe: recipe.to_string(),
            module: module.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn format_telemetry(&self) -> String {
        let entries = self.entries.lock();
        let mut out = format!("Telemetry information for: {}\n", self.workflow_uuid);
        for entry in entries.iter() {
            let _ = writeln!(
                out,
                "\t{}\t{}\t{}: {}",
                entry.recipe, entry.module, entry.key, entry.value
            );
        }
        out
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn log_telemetry(&self, _key: &str, _value: &str, _module: &str, _recipe: &str) {}

    fn format_telemetry(&self) -> String {
        String::new()
    }
}
