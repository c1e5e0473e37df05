//! Module lifecycle status.

use parking_lot::Mutex;
use serde::Serialize;

/// Lifecycle status of a module within one run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
pub enum ModuleStatus {
    Pending,
    SettingUp,
    Running,
    Preprocessing,
    Processing,
    Postprocessing,
    Completed,
    Error,
    Cancelled,
}

impl ModuleStatus {
    /// `Completed`, `Error` and `Cancelled` are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Whether dependents may run after a module ended in this status.
    pub fn is_success(self) -> bool {
        self == Self::Completed
    }
}

/// Status holder that refuses to leave a terminal status.
#[derive(Debug)]
pub struct ModuleState {
    status: Mutex<ModuleStatus>,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleState {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(ModuleStatus::Pending),
        }
    }

    pub fn status(&self) -> ModuleStatus {
        *self.status.lock()
    }

    /// Move to `status`. Returns false when already terminal.
    pub fn set_status(&self, status: ModuleStatus) -> bool {
        let mut current = self.status.lock();
        if current.is_terminal() {
            return false;
        }
        *current = status;
        true
    }
}
