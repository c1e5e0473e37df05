//! Shared context handed to every module.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::RunCache;
use crate::container::{Container, ContainerManager, MetadataFilter, StreamingCallback};
use crate::error::{ErrorLog, ErrorRecord, ModuleError, ModuleResult};
use crate::events::EventPublisher;
use crate::telemetry::{NoopTelemetry, Telemetry};

/// Everything a module may touch besides its own state.
///
/// Cheap to clone. All clones share the same container store, cache,
/// telemetry sink, event channel and error log.
#[derive(Clone)]
pub struct ModuleContext {
    name: String,
    recipe_name: String,
    containers: Arc<ContainerManager>,
    cache: Arc<RunCache>,
    telemetry: Arc<dyn Telemetry>,
    events: EventPublisher,
    errors: ErrorLog,
    cancellation: CancellationToken,
}

impl ModuleContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        recipe_name: impl Into<String>,
        containers: Arc<ContainerManager>,
        cache: Arc<RunCache>,
        telemetry: Arc<dyn Telemetry>,
        events: EventPublisher,
        errors: ErrorLog,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            recipe_name: recipe_name.into(),
            containers,
            cache,
            telemetry,
            events,
            errors,
            cancellation,
        }
    }

    /// A context over fresh, unshared collaborators.
    pub fn standalone(name: impl Into<String>, containers: Arc<ContainerManager>) -> Self {
        Self::new(
            name,
            "",
            containers,
            Arc::new(RunCache::new()),
            Arc::new(NoopTelemetry),
            EventPublisher::noop(),
            ErrorLog::new(),
            CancellationToken::new(),
        )
    }

    /// Same collaborators, another runtime name.
    pub fn for_module(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Runtime name of the module owning this context.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recipe_name(&self) -> &str {
        &self.recipe_name
    }

    pub fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    pub fn cache(&self) -> &RunCache {
        &self.cache
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn store_container<T: Container>(&self, container: T) -> ModuleResult {
        self.containers.store_container(&self.name, container)?;
        Ok(())
    }

    pub fn get_containers<T: Container>(&self, pop: bool) -> ModuleResult<Vec<Arc<T>>> {
        Ok(self.containers.get_containers(&self.name, pop)?)
    }

    pub fn get_containers_filtered<T: Container>(
        &self,
        pop: bool,
        filter: &MetadataFilter,
    ) -> ModuleResult<Vec<Arc<T>>> {
        Ok(self
            .containers
            .get_containers_filtered(&self.name, pop, Some(filter))?)
    }

    pub fn register_streaming_callback<T: Container>(
        &self,
        callback: StreamingCallback,
    ) -> ModuleResult {
        self.containers
            .register_streaming_callback(&self.name, T::CONTAINER_TYPE, callback)?;
        Ok(())
    }

    /// Log and display a message attributed to this module.
    pub fn publish_message(&self, text: impl Into<String>, is_error: bool) {
        let text = text.into();
        if is_error {
            warn!(module = %self.name, "{text}");
        } else {
            info!(module = %self.name, "{text}");
        }
        self.events.message(&self.name, text, is_error);
    }

    pub fn log_telemetry(&self, key: &str, value: impl ToString) {
        self.telemetry
            .log_telemetry(key, &value.to_string(), &self.name, &self.recipe_name);
    }

    /// Record an error without aborting the module.
    ///
    /// Returns the error so a critical one can be propagated with `?`.
    pub fn record_error(&self, error: ModuleError) -> ModuleError {
        if error.critical {
            error!(module = %self.name, error = %error.message, "Critical module error");
        } else {
            warn!(module = %self.name, error = %error.message, "Module error");
        }
        self.errors
            .push(ErrorRecord::from_module_error(&self.name, &error));
        self.events.message(&self.name, error.message.clone(), true);
        error
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("name", &self.name)
            .field("recipe_name", &self.recipe_name)
            .finish_non_exhaustive()
    }
}
