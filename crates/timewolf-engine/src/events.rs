//! Run events published to the display layer.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::module::ModuleStatus;

/// Something worth showing to the user while a recipe runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    /// Free-form message from a module (or the runner when `source` is `core`).
    Message {
        source: String,
        text: String,
        is_error: bool,
    },
    /// A module changed status.
    Status { module: String, status: ModuleStatus },
    /// Number of containers a thread-aware module is about to fan out over.
    ContainerCount { module: String, count: usize },
    /// Progress of a single fan-out worker.
    ThreadState {
        module: String,
        thread: usize,
        status: ModuleStatus,
        container: String,
    },
}

/// Fire-and-forget sender for [`RunEvent`]s.
///
/// Publishing never blocks: when the receiver lags or is gone, the event is
/// dropped.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<RunEvent>,
}

impl EventPublisher {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx }
    }

    /// Create a publisher together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// A publisher whose events go nowhere.
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel::<RunEvent>(1);
        Self::new(tx)
    }

    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.try_send(event);
    }

    pub fn message(&self, source: &str, text: impl Into<String>, is_error: bool) {
        self.publish(RunEvent::Message {
            source: source.to_string(),
            text: text.into(),
            is_error,
        });
    }

    pub fn status(&self, module: &str, status: ModuleStatus) {
        self.publish(RunEvent::Status {
            module: module.to_string(),
            status,
        });
    }
}
