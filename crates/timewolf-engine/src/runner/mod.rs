//! Module runner.
//!
//! The `ModuleRunner` is responsible for:
//! - Instantiating every module of a recipe through the registry
//! - Running preflights sequentially, aborting the run on critical errors
//! - Running ordinary modules concurrently, each as soon as the modules it
//!   wants completed
//! - Fanning thread-aware modules out over their input containers
//! - Cancelling the dependents of failed modules, transitively
//! - Turning every failure (including panics) into an error record

mod completion;
mod worker_pool;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::RunCache;
use crate::container::{ContainerManager, Retention};
use crate::error::{Error, ErrorLog, ErrorRecord, ModuleError, ModuleResult, Result};
use crate::events::{EventPublisher, RunEvent};
use crate::module::{
    ModuleArgs, ModuleContext, ModuleInstance, ModuleRegistry, ModuleState, ModuleStatus,
    ThreadedModule,
};
use crate::recipe::{ModuleDefinition, Recipe, check_placeholders, resolve_args};
use crate::telemetry::Telemetry;

use completion::{guarded, settle_run};
use worker_pool::fan_out;

/// Name under which the runner logs its own telemetry and messages.
pub const CORE_MODULE: &str = "core";

/// Runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Upper bound on ordinary modules running at once. `None` means one
    /// slot per module.
    pub max_concurrent_modules: Option<usize>,
    pub retention: Retention,
    /// Configuration values used to resolve `@token` placeholders that the
    /// command line did not provide.
    pub config_values: Map<String, Value>,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub recipe: String,
    pub errors: Vec<ErrorRecord>,
    pub statuses: BTreeMap<String, ModuleStatus>,
    /// A preflight failed or the run was cancelled.
    pub aborted: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn has_critical_errors(&self) -> bool {
        self.errors.iter().any(|e| e.critical)
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_critical_errors() { 1 } else { 0 }
    }

    pub fn status(&self, runtime_name: &str) -> Option<ModuleStatus> {
        self.statuses.get(runtime_name).copied()
    }
}

struct PlannedModule {
    definition: ModuleDefinition,
    instance: ModuleInstance,
    context: ModuleContext,
    state: Arc<ModuleState>,
}

impl PlannedModule {
    fn name(&self) -> &str {
        self.definition.runtime_name()
    }
}

type CompletionSignal = watch::Sender<Option<ModuleStatus>>;

pub struct ModuleRunner {
    config: RunnerConfig,
    registry: ModuleRegistry,
    telemetry: Arc<dyn Telemetry>,
    events: EventPublisher,
    cache: Arc<RunCache>,
    errors: ErrorLog,
    containers: Arc<ContainerManager>,
    cancellation: CancellationToken,
    recipe: Option<Recipe>,
    preflights: Vec<PlannedModule>,
    modules: Vec<PlannedModule>,
}

impl ModuleRunner {
    pub fn new(
        config: RunnerConfig,
        registry: ModuleRegistry,
        telemetry: Arc<dyn Telemetry>,
        events: EventPublisher,
    ) -> Self {
        let containers = Arc::new(ContainerManager::with_retention(config.retention));
        Self {
            config,
            registry,
            telemetry,
            events,
            cache: Arc::new(RunCache::new()),
            errors: ErrorLog::new(),
            containers,
            cancellation: CancellationToken::new(),
            recipe: None,
            preflights: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Token that stops modules from starting once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    pub fn cache(&self) -> &Arc<RunCache> {
        &self.cache
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Validate `recipe`, instantiate its modules and prepare the container store.
    pub fn initialise(&mut self, recipe: Recipe) -> Result<()> {
        recipe.validate(&self.registry)?;
        self.containers.parse_recipe(&recipe);
        self.cache.set_recipe_name(&recipe.name);

        let mut preflights = Vec::with_capacity(recipe.preflights.len());
        for definition in &recipe.preflights {
            let planned = self.instantiate(&recipe.name, definition)?;
            if !planned.instance.is_preflight() {
                return Err(Error::recipe(format!(
                    "{} is listed as a preflight but is a {}",
                    definition.name,
                    planned.instance.kind()
                )));
            }
            preflights.push(planned);
        }

        let mut modules = Vec::with_capacity(recipe.modules.len());
        for definition in &recipe.modules {
            let planned = self.instantiate(&recipe.name, definition)?;
            if planned.instance.is_preflight() {
                return Err(Error::recipe(format!(
                    "{} is a preflight and must be listed under preflights",
                    definition.name
                )));
            }
            modules.push(planned);
        }

        info!(
            recipe = %recipe.name,
            preflights = preflights.len(),
            modules = modules.len(),
            "Runner initialised"
        );

        self.preflights = preflights;
        self.modules = modules;
        self.recipe = Some(recipe);
        Ok(())
    }

    fn instantiate(&self, recipe_name: &str, definition: &ModuleDefinition) -> Result<PlannedModule> {
        let context = ModuleContext::new(
            definition.runtime_name(),
            recipe_name,
            self.containers.clone(),
            self.cache.clone(),
            self.telemetry.clone(),
            self.events.clone(),
            self.errors.clone(),
            self.cancellation.clone(),
        );
        let instance = self.registry.create(&definition.name, context.clone())?;
        debug!(module = %definition.runtime_name(), kind = instance.kind(), "Instantiated module");
        Ok(PlannedModule {
            definition: definition.clone(),
            instance,
            context,
            state: Arc::new(ModuleState::new()),
        })
    }

    /// Run the initialised recipe with the given command line arguments.
    pub async fn run(&mut self, running_args: Map<String, Value>) -> Result<RunReport> {
        let recipe = self
            .recipe
            .clone()
            .ok_or_else(|| Error::config("runner has no recipe, call initialise first"))?;

        // Every placeholder must resolve before anything runs.
        let preflight_args = self.resolve_all(&self.preflights, &running_args)?;
        let module_args = self.resolve_all(&self.modules, &running_args)?;

        let started = Instant::now();
        self.cache.set_cli_args(&running_args);
        self.events
            .message(CORE_MODULE, format!("Running recipe {}", recipe.name), false);
        info!(recipe = %recipe.name, "Starting run");

        let preflights_ok = self.run_preflights(preflight_args).await;
        self.log_core_telemetry(&recipe.name, "preflights_delta", started.elapsed());

        if preflights_ok {
            if let Some(setup_delta) = self.run_modules(module_args, started).await {
                self.log_core_telemetry(&recipe.name, "setup_delta", setup_delta);
            }
        } else {
            error!(recipe = %recipe.name, "Preflight failed, aborting run");
            for planned in &self.modules {
                transition(&planned.context, &planned.state, ModuleStatus::Cancelled);
            }
        }

        self.clean_up().await;
        self.containers.wait_for_callbacks().await;

        let elapsed = started.elapsed();
        self.log_core_telemetry(&recipe.name, "run_delta", elapsed);

        let statuses = self
            .preflights
            .iter()
            .chain(self.modules.iter())
            .map(|p| (p.name().to_string(), p.state.status()))
            .collect();
        let report = RunReport {
            recipe: recipe.name.clone(),
            errors: self.errors.snapshot(),
            statuses,
            aborted: !preflights_ok || self.cancellation.is_cancelled(),
            elapsed,
        };

        info!(
            recipe = %recipe.name,
            errors = report.errors.len(),
            critical = report.has_critical_errors(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }

    /// Returns false when the run must not go on.
    async fn run_preflights(&self, args: Vec<ModuleArgs>) -> bool {
        for (planned, args) in self.preflights.iter().zip(args) {
            let name = planned.name().to_string();
            if self.cancellation.is_cancelled() {
                transition(&planned.context, &planned.state, ModuleStatus::Cancelled);
                return false;
            }

            let span = info_span!("preflight", module = %name);
            let execution = execute(
                planned.instance.clone(),
                planned.context.clone(),
                planned.state.clone(),
                args,
            )
            .instrument(span);
            let status = match guarded(execution).await {
                Ok(status) => status,
                Err(message) => fail_with(&planned.context, &planned.state, message),
            };

            if let Err(e) = self.containers.complete_module(&name) {
                warn!(module = %name, error = %e, "Failed to complete preflight");
            }
            if !status.is_success() {
                return false;
            }
        }
        true
    }

    /// Returns the delay between run start and the first module start.
    async fn run_modules(
        &self,
        args: Vec<ModuleArgs>,
        started: Instant,
    ) -> Option<Duration> {
        let slots = self
            .config
            .max_concurrent_modules
            .unwrap_or(self.modules.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(slots));
        let first_start = Arc::new(OnceLock::new());

        let mut signals: HashMap<String, CompletionSignal> = self
            .modules
            .iter()
            .map(|p| (p.name().to_string(), watch::channel(None).0))
            .collect();

        let waits: Vec<Vec<(String, watch::Receiver<Option<ModuleStatus>>)>> = self
            .modules
            .iter()
            .map(|p| {
                p.definition
                    .wants
                    .iter()
                    .filter(|w| w.as_str() != p.name())
                    .filter_map(|w| signals.get(w).map(|tx| (w.clone(), tx.subscribe())))
                    .collect()
            })
            .collect();

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for ((planned, dependencies), args) in self.modules.iter().zip(waits).zip(args) {
            let name = planned.name().to_string();
            let Some(signal) = signals.remove(&name) else {
                continue;
            };
            let instance = planned.instance.clone();
            let ctx = planned.context.clone();
            let state = planned.state.clone();
            let containers = self.containers.clone();
            let semaphore = semaphore.clone();
            let first_start = first_start.clone();
            let span = info_span!("module", module = %name);

            let handle = tasks.spawn(
                async move {
                    let name = ctx.name().to_string();

                    for (dependency, rx) in dependencies {
                        let status = wait_for_dependency(rx).await;
                        if !status.is_success() {
                            warn!(
                                dependency = %dependency,
                                dependency_status = %status,
                                "Aborting execution due to previous errors"
                            );
                            ctx.events().message(
                                &name,
                                format!("Not running: {dependency} ended with status {status}"),
                                true,
                            );
                            settle(&ctx, &state, &containers, &signal, ModuleStatus::Cancelled);
                            return;
                        }
                    }

                    if ctx.is_cancelled() {
                        settle(&ctx, &state, &containers, &signal, ModuleStatus::Cancelled);
                        return;
                    }

                    let _permit = semaphore.acquire_owned().await.ok();
                    first_start.get_or_init(|| started.elapsed());
                    info!("Running module");
                    let module_start = Instant::now();

                    let status = execute(instance, ctx.clone(), state.clone(), args).await;

                    ctx.log_telemetry("total_time", format_ms(module_start.elapsed()));
                    info!(status = %status, "Module finished execution");
                    settle(&ctx, &state, &containers, &signal, status);
                }
                .instrument(span),
            );
            names.insert(handle.id(), name);
        }

        let (_, failures) = settle_run(tasks, &names).await;
        for failure in failures {
            let Some(planned) = self.modules.iter().find(|p| p.name() == failure.name) else {
                continue;
            };
            fail_with(&planned.context, &planned.state, failure.message);
            if let Err(e) = self.containers.complete_module(planned.name()) {
                warn!(module = %planned.name(), error = %e, "Failed to complete module");
            }
        }

        first_start.get().copied()
    }

    /// Clean up every module that ran, then every preflight.
    async fn clean_up(&self) {
        let started = self
            .modules
            .iter()
            .filter(|p| !matches!(p.state.status(), ModuleStatus::Pending | ModuleStatus::Cancelled));
        for planned in started.chain(self.preflights.iter()) {
            let instance = planned.instance.clone();
            let result = match guarded(async move { instance.clean_up().await }).await {
                Ok(result) => result,
                Err(message) => Err(ModuleError::critical(message)),
            };
            if let Err(e) = result {
                planned.context.record_error(e);
            }
        }
    }

    fn resolve_all(
        &self,
        planned: &[PlannedModule],
        running_args: &Map<String, Value>,
    ) -> Result<Vec<ModuleArgs>> {
        planned
            .iter()
            .map(|p| self.module_args(p, running_args))
            .collect()
    }

    fn module_args(
        &self,
        planned: &PlannedModule,
        running_args: &Map<String, Value>,
    ) -> Result<ModuleArgs> {
        let template = Value::Object(planned.definition.args.clone());
        let resolved = resolve_args(&template, running_args, &self.config.config_values);
        check_placeholders(&resolved).map_err(|e| {
            error!(module = %planned.name(), error = %e, "Unresolved module argument");
            Error::config(format!("module {}: {e}", planned.name()))
        })?;
        match resolved {
            Value::Object(map) => Ok(ModuleArgs::new(map)),
            _ => Ok(ModuleArgs::default()),
        }
    }

    fn log_core_telemetry(&self, recipe: &str, key: &str, elapsed: Duration) {
        self.telemetry
            .log_telemetry(key, &format_ms(elapsed), CORE_MODULE, recipe);
    }
}

impl std::fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRunner")
            .field("recipe", &self.recipe.as_ref().map(|r| r.name.as_str()))
            .field("preflights", &self.preflights.len())
            .field("modules", &self.modules.len())
            .finish()
    }
}

async fn wait_for_dependency(mut rx: watch::Receiver<Option<ModuleStatus>>) -> ModuleStatus {
    match rx.wait_for(Option::is_some).await {
        Ok(status) => status.unwrap_or(ModuleStatus::Error),
        // The dependency's task died without signalling.
        Err(_) => ModuleStatus::Error,
    }
}

/// Final bookkeeping of a module: status, container store, then dependents.
fn settle(
    ctx: &ModuleContext,
    state: &ModuleState,
    containers: &ContainerManager,
    signal: &CompletionSignal,
    status: ModuleStatus,
) {
    transition(ctx, state, status);
    if let Err(e) = containers.complete_module(ctx.name()) {
        warn!(module = %ctx.name(), error = %e, "Failed to complete module");
    }
    signal.send_replace(Some(state.status()));
}

fn transition(ctx: &ModuleContext, state: &ModuleState, status: ModuleStatus) {
    if state.set_status(status) {
        debug!(module = %ctx.name(), status = %status, "Module status changed");
        ctx.events().status(ctx.name(), status);
    }
}

fn fail_with(ctx: &ModuleContext, state: &ModuleState, message: String) -> ModuleStatus {
    ctx.record_error(ModuleError::critical(message));
    transition(ctx, state, ModuleStatus::Error);
    ModuleStatus::Error
}

/// Record the error of `result`, if any. True when it was critical.
fn failed(ctx: &ModuleContext, result: ModuleResult) -> bool {
    match result {
        Ok(()) => false,
        Err(error) => ctx.record_error(error).critical,
    }
}

fn escalate(error: ModuleError) -> ModuleError {
    ModuleError::critical(error.message)
}

fn finish(ctx: &ModuleContext, state: &ModuleState, status: ModuleStatus) -> ModuleStatus {
    transition(ctx, state, status);
    status
}

async fn execute(
    instance: ModuleInstance,
    ctx: ModuleContext,
    state: Arc<ModuleState>,
    args: ModuleArgs,
) -> ModuleStatus {
    match instance {
        ModuleInstance::Simple(module) => {
            transition(&ctx, &state, ModuleStatus::SettingUp);
            if failed(&ctx, module.set_up(&args).await) {
                return finish(&ctx, &state, ModuleStatus::Error);
            }
            transition(&ctx, &state, ModuleStatus::Running);
            if failed(&ctx, module.process().await) {
                return finish(&ctx, &state, ModuleStatus::Error);
            }
            finish(&ctx, &state, ModuleStatus::Completed)
        }
        // Any preflight error is critical.
        ModuleInstance::Preflight(module) => {
            transition(&ctx, &state, ModuleStatus::SettingUp);
            if failed(&ctx, module.set_up(&args).await.map_err(escalate)) {
                return finish(&ctx, &state, ModuleStatus::Error);
            }
            transition(&ctx, &state, ModuleStatus::Running);
            if failed(&ctx, module.process().await.map_err(escalate)) {
                return finish(&ctx, &state, ModuleStatus::Error);
            }
            finish(&ctx, &state, ModuleStatus::Completed)
        }
        ModuleInstance::ThreadAware(module) => execute_threaded(module, &ctx, &state, &args).await,
    }
}

async fn execute_threaded(
    module: Arc<dyn ThreadedModule>,
    ctx: &ModuleContext,
    state: &ModuleState,
    args: &ModuleArgs,
) -> ModuleStatus {
    transition(ctx, state, ModuleStatus::SettingUp);
    if failed(ctx, module.set_up(args).await) {
        return finish(ctx, state, ModuleStatus::Error);
    }

    transition(ctx, state, ModuleStatus::Preprocessing);
    if failed(ctx, module.pre_process().await) {
        return finish(ctx, state, ModuleStatus::Error);
    }

    transition(ctx, state, ModuleStatus::Processing);
    let container_type = module.thread_on_container_type();
    let pop = !module.keep_threaded_containers_in_state();

    let pass = match ctx.containers().begin_pass(ctx.name(), container_type) {
        Ok(pass) => pass,
        Err(e) => {
            ctx.record_error(e.into());
            return finish(ctx, state, ModuleStatus::Error);
        }
    };
    let items = match ctx
        .containers()
        .get_erased(ctx.name(), container_type, pop, None)
    {
        Ok(items) => items,
        Err(e) => {
            ctx.record_error(e.into());
            return finish(ctx, state, ModuleStatus::Error);
        }
    };

    ctx.events().publish(RunEvent::ContainerCount {
        module: ctx.name().to_string(),
        count: items.len(),
    });
    let summary = fan_out(module.clone(), ctx, items).await;
    drop(pass);

    transition(ctx, state, ModuleStatus::Postprocessing);
    let post_failed = failed(ctx, module.post_process().await);

    if summary.critical || post_failed {
        finish(ctx, state, ModuleStatus::Error)
    } else {
        finish(ctx, state, ModuleStatus::Completed)
    }
}

fn format_ms(elapsed: Duration) -> String {
    format!("{:.3}", elapsed.as_secs_f64() * 1000.0)
}
