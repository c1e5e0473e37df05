//! Integration tests for the module runner.
//!
//! Test modules record every lifecycle call in a shared `CallLog`, so tests
//! assert on which calls happened (and how often) rather than on timing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rstest::rstest;
use serde_json::{Map, json};

use timewolf_engine::container::Host;
use timewolf_engine::{
    BaseTelemetry, Container, EventPublisher, Module, ModuleArgs, ModuleContext,
    ModuleDefinition, ModuleError, ModuleInstance, ModuleRegistry, ModuleResult, ModuleRunner,
    ModuleStatus, PreflightModule, Recipe, RunEvent, RunReport, RunnerConfig, ThreadAwareModule,
};

#[derive(Debug, Clone, PartialEq)]
struct TestContainer {
    value: String,
}

impl TestContainer {
    fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Container for TestContainer {
    const CONTAINER_TYPE: &'static str = "test_container";
}

#[derive(Debug, Clone, PartialEq)]
struct TestContainerThree {
    value: String,
}

impl Container for TestContainerThree {
    const CONTAINER_TYPE: &'static str = "test_container_three";
}

/// Shared record of lifecycle calls.
#[derive(Clone, Default)]
struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn count_prefix(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Simple module driven by its arguments:
/// `fail` (`set_up`, `process` or `soft`), `delay_ms`, `label` (stored as a
/// `TestContainer`) and `after` (modules whose completion is checked in `set_up`).
struct Recorder {
    ctx: ModuleContext,
    log: CallLog,
    args: Mutex<ModuleArgs>,
}

impl Recorder {
    fn fails_in(&self, phase: &str) -> bool {
        self.args.lock().get_str("fail") == Some(phase)
    }
}

#[async_trait]
impl Module for Recorder {
    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        let name = self.ctx.name();
        let label: Option<String> = args.get("label");
        self.log
            .push(format!("{name}.set_up({})", label.unwrap_or_default()));

        for dependency in args.get_or_default::<Vec<String>>("after") {
            let completed = self.ctx.containers().is_completed(&dependency);
            self.log
                .push(format!("{name}.set_up:{dependency}={completed}"));
        }

        *self.args.lock() = args.clone();
        if self.fails_in("set_up") {
            return Err(ModuleError::critical(format!("{name} failed to set up")));
        }
        Ok(())
    }

    async fn process(&self) -> ModuleResult {
        let name = self.ctx.name().to_string();
        let (delay, label) = {
            let args = self.args.lock();
            (
                args.get::<u64>("delay_ms").unwrap_or(0),
                args.get::<String>("label"),
            )
        };

        self.log.enter();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.log.leave();
        self.log.push(format!("{name}.process"));

        if self.fails_in("process") {
            return Err(ModuleError::critical(format!("{name} failed to process")));
        }
        if self.fails_in("soft") {
            self.ctx
                .record_error(ModuleError::non_critical(format!("{name} skipped an item")));
        }
        if let Some(label) = label {
            self.ctx.store_container(TestContainer::new(label))?;
        }
        Ok(())
    }

    async fn clean_up(&self) -> ModuleResult {
        self.log.push(format!("{}.clean_up", self.ctx.name()));
        Ok(())
    }
}

struct RecordingPreflight {
    ctx: ModuleContext,
    log: CallLog,
    fail: Mutex<Option<String>>,
}

#[async_trait]
impl PreflightModule for RecordingPreflight {
    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        self.log.push(format!("{}.set_up", self.ctx.name()));
        let fail: Option<String> = args.get("fail");
        *self.fail.lock() = fail.clone();
        if fail.as_deref() == Some("set_up") {
            return Err(ModuleError::critical("preflight set up failed"));
        }
        Ok(())
    }

    async fn process(&self) -> ModuleResult {
        self.log.push(format!("{}.process", self.ctx.name()));
        match self.fail.lock().as_deref() {
            Some("process") => Err(ModuleError::critical("preflight process failed")),
            Some("soft") => Err(ModuleError::non_critical("preflight soft failure")),
            _ => Ok(()),
        }
    }

    async fn clean_up(&self) -> ModuleResult {
        self.log.push(format!("{}.clean_up", self.ctx.name()));
        Ok(())
    }
}

/// Thread-aware module over `TestContainer`.
///
/// Fails `process` for items whose value is `fail`, and the phase named by
/// the `fail` argument.
struct ThreadedRecorder {
    ctx: ModuleContext,
    log: CallLog,
    fail: Mutex<Option<String>>,
    processed: AtomicUsize,
}

#[async_trait]
impl ThreadAwareModule for ThreadedRecorder {
    type Item = TestContainer;

    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        self.log.push("Threaded.set_up");
        let fail: Option<String> = args.get("fail");
        *self.fail.lock() = fail.clone();
        if fail.as_deref() == Some("set_up") {
            return Err(ModuleError::critical("threaded set up failed"));
        }
        Ok(())
    }

    async fn pre_process(&self) -> ModuleResult {
        self.log.push("Threaded.pre_process");
        if self.fail.lock().as_deref() == Some("pre_process") {
            return Err(ModuleError::critical("threaded pre process failed"));
        }
        Ok(())
    }

    async fn process(&self, item: Arc<TestContainer>) -> ModuleResult {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.log.push(format!("Threaded.process({})", item.value));
        self.processed.fetch_add(1, Ordering::SeqCst);
        if item.value == "fail" {
            return Err(ModuleError::critical("item failed"));
        }
        self.ctx
            .store_container(TestContainerThree {
                value: format!("output {}", item.value),
            })
    }

    async fn post_process(&self) -> ModuleResult {
        let processed = self.processed.load(Ordering::SeqCst);
        self.log
            .push(format!("Threaded.post_process(after {processed})"));
        Ok(())
    }

    fn thread_pool_size(&self) -> usize {
        2
    }
}

/// Consumes and produces the same container type.
struct Issue503Module {
    ctx: ModuleContext,
}

#[async_trait]
impl ThreadAwareModule for Issue503Module {
    type Item = TestContainer;

    async fn set_up(&self, _args: &ModuleArgs) -> ModuleResult {
        Ok(())
    }

    async fn process(&self, item: Arc<TestContainer>) -> ModuleResult {
        self.ctx
            .store_container(TestContainer::new(format!("{} Processed", item.value)))
    }
}

/// Appends to every input and emits an extra output container per input.
struct ContainerConsumer {
    ctx: ModuleContext,
}

#[async_trait]
impl ThreadAwareModule for ContainerConsumer {
    type Item = TestContainer;

    async fn set_up(&self, _args: &ModuleArgs) -> ModuleResult {
        Ok(())
    }

    async fn process(&self, item: Arc<TestContainer>) -> ModuleResult {
        self.ctx.store_container(TestContainerThree {
            value: format!("output {}", item.value),
        })?;
        self.ctx
            .store_container(TestContainer::new(format!("{} appended", item.value)))
    }
}

fn registry(log: &CallLog) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();

    let l = log.clone();
    registry
        .register("Recorder", move |ctx| {
            ModuleInstance::simple(Recorder {
                ctx,
                log: l.clone(),
                args: Mutex::new(ModuleArgs::default()),
            })
        })
        .unwrap();

    let l = log.clone();
    registry
        .register("RecordingPreflight", move |ctx| {
            ModuleInstance::preflight(RecordingPreflight {
                ctx,
                log: l.clone(),
                fail: Mutex::new(None),
            })
        })
        .unwrap();

    let l = log.clone();
    registry
        .register("ThreadedRecorder", move |ctx| {
            ModuleInstance::thread_aware(ThreadedRecorder {
                ctx,
                log: l.clone(),
                fail: Mutex::new(None),
                processed: AtomicUsize::new(0),
            })
        })
        .unwrap();

    registry
        .register("Issue503Module", |ctx| {
            ModuleInstance::thread_aware(Issue503Module { ctx })
        })
        .unwrap();
    registry
        .register("ContainerConsumer", |ctx| {
            ModuleInstance::thread_aware(ContainerConsumer { ctx })
        })
        .unwrap();

    registry
}

fn runner(log: &CallLog) -> ModuleRunner {
    runner_with(log, RunnerConfig::default())
}

fn runner_with(log: &CallLog, config: RunnerConfig) -> ModuleRunner {
    ModuleRunner::new(
        config,
        registry(log),
        Arc::new(BaseTelemetry::new()),
        EventPublisher::noop(),
    )
}

fn recorder(name: &str) -> ModuleDefinition {
    ModuleDefinition::new("Recorder").with_runtime_name(name)
}

async fn run(runner: &mut ModuleRunner, recipe: Recipe) -> RunReport {
    runner.initialise(recipe).expect("recipe initialises");
    runner.run(Map::new()).await.expect("run completes")
}

fn values(containers: Vec<Arc<TestContainer>>) -> Vec<String> {
    let mut values: Vec<String> = containers.iter().map(|c| c.value.clone()).collect();
    values.sort();
    values
}

mod scheduling_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dependency_completes_before_dependent_set_up() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("ordering")
            .with_module(recorder("A").with_arg("delay_ms", json!(50)))
            .with_module(
                recorder("B")
                    .wants(["A"])
                    .with_arg("after", json!(["A"])),
            );

        let report = run(&mut runner, recipe).await;

        assert_eq!(report.exit_code(), 0);
        assert_eq!(log.count("B.set_up:A=true"), 1);
        assert!(log.position("A.process") < log.position("B.set_up()"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_independent_modules_both_run_once() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("independent")
            .with_module(recorder("Slow").with_arg("delay_ms", json!(100)))
            .with_module(recorder("Fast"));

        let report = run(&mut runner, recipe).await;

        assert_eq!(log.count("Slow.process"), 1);
        assert_eq!(log.count("Fast.process"), 1);
        assert_eq!(report.status("Slow"), Some(ModuleStatus::Completed));
        assert_eq!(report.status("Fast"), Some(ModuleStatus::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_concurrent_modules_is_honoured() {
        let log = CallLog::default();
        let mut runner = runner_with(
            &log,
            RunnerConfig {
                max_concurrent_modules: Some(1),
                ..RunnerConfig::default()
            },
        );
        let recipe = Recipe::new("serial")
            .with_module(recorder("One").with_arg("delay_ms", json!(20)))
            .with_module(recorder("Two").with_arg("delay_ms", json!(20)))
            .with_module(recorder("Three").with_arg("delay_ms", json!(20)));

        let report = run(&mut runner, recipe).await;

        assert_eq!(report.exit_code(), 0);
        for name in ["One", "Two", "Three"] {
            assert_eq!(log.count(&format!("{name}.process")), 1);
        }
        assert_eq!(log.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_runtime_names_get_their_own_arguments() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("multiplicity")
            .with_module(recorder("First").with_arg("label", json!("@first")))
            .with_module(recorder("Second").with_arg("label", json!("@second")))
            .with_module(
                recorder("Downstream")
                    .wants(["First", "Second"])
                    .with_arg("after", json!(["First", "Second"])),
            );
        runner.initialise(recipe).unwrap();

        let mut args = Map::new();
        args.insert("first".to_string(), json!("alpha"));
        args.insert("second".to_string(), json!("beta"));
        let report = runner.run(args).await.unwrap();

        assert_eq!(
            report.statuses.keys().cloned().collect::<Vec<_>>(),
            vec!["Downstream", "First", "Second"]
        );
        assert_eq!(log.count("First.set_up(alpha)"), 1);
        assert_eq!(log.count("Second.set_up(beta)"), 1);
        assert_eq!(log.count("Downstream.set_up:First=true"), 1);
        assert_eq!(log.count("Downstream.set_up:Second=true"), 1);
    }

    #[tokio::test]
    async fn test_clean_up_called_for_modules_that_ran() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("clean")
            .with_module(recorder("A").with_arg("fail", json!("process")))
            .with_module(recorder("B").wants(["A"]));

        run(&mut runner, recipe).await;

        assert_eq!(log.count("A.clean_up"), 1);
        assert_eq!(log.count("B.clean_up"), 0);
    }
}

mod preflight_tests {
    use super::*;

    #[rstest]
    #[case::set_up("set_up")]
    #[case::process("process")]
    #[tokio::test]
    async fn test_preflight_failure_gates_every_module(#[case] phase: &str) {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("gated")
            .with_preflight(
                ModuleDefinition::new("RecordingPreflight").with_arg("fail", json!(phase)),
            )
            .with_module(recorder("A"))
            .with_module(recorder("B").wants(["A"]));

        let report = run(&mut runner, recipe).await;

        assert!(report.aborted);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(log.count_prefix("A."), 0);
        assert_eq!(log.count_prefix("B."), 0);
        assert_eq!(log.count("RecordingPreflight.clean_up"), 1);
        assert_eq!(report.status("A"), Some(ModuleStatus::Cancelled));
    }

    #[rstest]
    #[case::set_up("set_up")]
    #[case::process("process")]
    #[tokio::test]
    async fn test_first_preflight_failure_skips_later_preflights(#[case] phase: &str) {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("two_preflights")
            .with_preflight(
                ModuleDefinition::new("RecordingPreflight")
                    .with_runtime_name("P1")
                    .with_arg("fail", json!(phase)),
            )
            .with_preflight(ModuleDefinition::new("RecordingPreflight").with_runtime_name("P2"))
            .with_module(recorder("A"));

        let report = run(&mut runner, recipe).await;

        assert!(report.aborted);
        assert_eq!(log.count("P1.set_up"), 1);
        assert_eq!(log.count("P2.set_up"), 0);
        assert_eq!(log.count("P2.process"), 0);
        assert_eq!(log.count("P1.clean_up"), 1);
        assert_eq!(log.count("P2.clean_up"), 1);
        assert_eq!(log.count_prefix("A."), 0);
        assert_eq!(report.status("P2"), Some(ModuleStatus::Pending));
    }

    #[tokio::test]
    async fn test_preflight_errors_are_always_critical() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("soft_preflight")
            .with_preflight(
                ModuleDefinition::new("RecordingPreflight").with_arg("fail", json!("soft")),
            )
            .with_module(recorder("A"));

        let report = run(&mut runner, recipe).await;

        assert!(report.aborted);
        assert!(report.errors.iter().all(|e| e.critical));
        assert_eq!(log.count_prefix("A."), 0);
    }

    #[tokio::test]
    async fn test_preflights_run_before_modules_and_clean_up_last() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("ok")
            .with_preflight(ModuleDefinition::new("RecordingPreflight"))
            .with_module(recorder("A").wants(["RecordingPreflight"]));

        let report = run(&mut runner, recipe).await;

        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            log.calls(),
            vec![
                "RecordingPreflight.set_up",
                "RecordingPreflight.process",
                "A.set_up()",
                "A.process",
                "A.clean_up",
                "RecordingPreflight.clean_up",
            ]
        );
    }
}

mod failure_tests {
    use super::*;

    #[rstest]
    #[case::set_up("set_up")]
    #[case::process("process")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_cascades_to_dependents_only(#[case] phase: &str) {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("cascade")
            .with_module(recorder("A").with_arg("fail", json!(phase)))
            .with_module(recorder("B").wants(["A"]))
            .with_module(recorder("C").wants(["B"]))
            .with_module(recorder("Independent").with_arg("delay_ms", json!(20)));

        let report = run(&mut runner, recipe).await;

        assert_eq!(report.status("A"), Some(ModuleStatus::Error));
        assert_eq!(report.status("B"), Some(ModuleStatus::Cancelled));
        assert_eq!(report.status("C"), Some(ModuleStatus::Cancelled));
        assert_eq!(report.status("Independent"), Some(ModuleStatus::Completed));
        assert_eq!(log.count_prefix("B."), 0);
        assert_eq!(log.count_prefix("C."), 0);
        assert_eq!(log.count("Independent.process"), 1);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].module.as_deref(), Some("A"));
        assert!(report.errors[0].critical);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_non_critical_error_lets_dependents_run() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("soft")
            .with_module(recorder("A").with_arg("fail", json!("soft")))
            .with_module(recorder("B").wants(["A"]));

        let report = run(&mut runner, recipe).await;

        assert_eq!(report.status("A"), Some(ModuleStatus::Completed));
        assert_eq!(report.status("B"), Some(ModuleStatus::Completed));
        assert_eq!(report.errors.len(), 1);
        assert!(!report.errors[0].critical);
        assert_eq!(report.exit_code(), 0);
    }
}

mod thread_aware_tests {
    use super::*;

    fn threaded_recipe(fail: Option<&str>) -> Recipe {
        let mut threaded = ModuleDefinition::new("ThreadedRecorder").wants(["Producer"]);
        if let Some(phase) = fail {
            threaded = threaded.with_arg("fail", json!(phase));
        }
        Recipe::new("threaded")
            .with_module(recorder("Producer"))
            .with_module(threaded)
    }

    async fn run_threaded(log: &CallLog, inputs: &[&str], fail: Option<&str>) -> RunReport {
        let mut runner = runner(log);
        runner
            .initialise(threaded_recipe(fail))
            .unwrap();
        for input in inputs {
            runner
                .containers()
                .store_container("Producer", TestContainer::new(*input))
                .unwrap();
        }
        runner.run(Map::new()).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fan_out_processes_each_item_once() {
        let log = CallLog::default();
        let report = run_threaded(&log, &["one", "two", "three"], None).await;

        assert_eq!(report.status("ThreadedRecorder"), Some(ModuleStatus::Completed));
        assert_eq!(log.count("Threaded.pre_process"), 1);
        assert_eq!(log.count_prefix("Threaded.process("), 3);
        for value in ["one", "two", "three"] {
            assert_eq!(log.count(&format!("Threaded.process({value})")), 1);
        }
        assert_eq!(log.count("Threaded.post_process(after 3)"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_item_failure_still_runs_post_process() {
        let log = CallLog::default();
        let report = run_threaded(&log, &["one", "fail", "three"], None).await;

        assert_eq!(log.count_prefix("Threaded.process("), 3);
        assert_eq!(log.count("Threaded.post_process(after 3)"), 1);
        assert_eq!(report.status("ThreadedRecorder"), Some(ModuleStatus::Error));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].message, "item failed");
    }

    #[rstest]
    #[case::set_up("set_up", 0)]
    #[case::pre_process("pre_process", 1)]
    #[tokio::test]
    async fn test_early_failure_skips_fan_out(#[case] phase: &str, #[case] pre_process_calls: usize) {
        let log = CallLog::default();
        let report = run_threaded(&log, &["one", "two"], Some(phase)).await;

        assert_eq!(report.status("ThreadedRecorder"), Some(ModuleStatus::Error));
        assert_eq!(log.count("Threaded.set_up"), 1);
        assert_eq!(log.count("Threaded.pre_process"), pre_process_calls);
        assert_eq!(log.count_prefix("Threaded.process("), 0);
        assert_eq!(log.count_prefix("Threaded.post_process"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_type_producer_sees_each_input_once() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        runner
            .initialise(Recipe::new("issue503").with_module(ModuleDefinition::new("Issue503Module")))
            .unwrap();
        for value in ["one", "two", "three"] {
            runner
                .containers()
                .store_container("Issue503Module", TestContainer::new(value))
                .unwrap();
        }

        let report = runner.run(Map::new()).await.unwrap();
        assert_eq!(report.exit_code(), 0);

        let stored = runner
            .containers()
            .get_containers::<TestContainer>("Issue503Module", false)
            .unwrap();
        assert_eq!(
            values(stored),
            vec!["one Processed", "three Processed", "two Processed"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_container_handling_between_modules() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        let recipe = Recipe::new("handling")
            .with_module(recorder("Producer"))
            .with_module(ModuleDefinition::new("ContainerConsumer").wants(["Producer"]));
        runner.initialise(recipe).unwrap();
        for value in ["one", "two", "three"] {
            runner
                .containers()
                .store_container("Producer", TestContainer::new(value))
                .unwrap();
        }

        let report = runner.run(Map::new()).await.unwrap();
        assert_eq!(report.exit_code(), 0);

        let containers = runner.containers();
        // Inputs were popped from the producer.
        assert!(
            containers
                .get_containers::<TestContainer>("Producer", false)
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            values(
                containers
                    .get_containers::<TestContainer>("ContainerConsumer", false)
                    .unwrap()
            ),
            vec!["one appended", "three appended", "two appended"]
        );

        let mut outputs: Vec<String> = containers
            .snapshot::<TestContainerThree>()
            .into_iter()
            .map(|(source, c)| format!("{source}:{}", c.value))
            .collect();
        outputs.sort();
        assert_eq!(
            outputs,
            vec![
                "ContainerConsumer:output one",
                "ContainerConsumer:output three",
                "ContainerConsumer:output two",
            ]
        );
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let log = CallLog::default();
        let (events, mut rx) = EventPublisher::channel(256);
        let mut runner = ModuleRunner::new(
            RunnerConfig::default(),
            registry(&log),
            Arc::new(BaseTelemetry::new()),
            events,
        );
        runner.initialise(threaded_recipe(None)).unwrap();
        for input in ["one", "two"] {
            runner
                .containers()
                .store_container("Producer", TestContainer::new(input))
                .unwrap();
        }
        runner.run(Map::new()).await.unwrap();

        let mut statuses = Vec::new();
        let mut count = None;
        let mut thread_states = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                RunEvent::Status { module, status } if module == "ThreadedRecorder" => {
                    statuses.push(status)
                }
                RunEvent::ContainerCount { count: c, .. } => count = Some(c),
                RunEvent::ThreadState { .. } => thread_states += 1,
                _ => {}
            }
        }

        assert_eq!(
            statuses,
            vec![
                ModuleStatus::SettingUp,
                ModuleStatus::Preprocessing,
                ModuleStatus::Processing,
                ModuleStatus::Postprocessing,
                ModuleStatus::Completed,
            ]
        );
        assert_eq!(count, Some(2));
        assert_eq!(thread_states, 4);
    }
}

mod container_tests {
    use super::*;

    #[tokio::test]
    async fn test_store_peek_pop_round_trip() {
        let log = CallLog::default();
        let mut runner = runner(&log);
        runner
            .initialise(Recipe::new("p8").with_module(recorder("A")))
            .unwrap();
        let containers = runner.containers();

        containers.store_container("A", Host::new("web-1")).unwrap();
        let first = containers.get_containers::<Host>("A", false).unwrap();
        assert_eq!(*first[0], Host::new("web-1"));
        assert_eq!(containers.get_containers::<Host>("A", false).unwrap().len(), 1);

        assert_eq!(containers.get_containers::<Host>("A", true).unwrap().len(), 1);
        assert!(containers.get_containers::<Host>("A", true).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_streaming_callback_receives_dependency_output() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = CallLog::default();
        let mut registry = registry(&log);
        let sink = received.clone();
        registry
            .register("StreamingSink", move |ctx: ModuleContext| {
                let sink = sink.clone();
                let callback: timewolf_engine::container::StreamingCallback =
                    Arc::new(move |container| {
                        if let Some(c) =
                            timewolf_engine::container::downcast::<TestContainer>(container)
                        {
                            sink.lock().push(c.value.clone());
                        }
                    });
                ctx.register_streaming_callback::<TestContainer>(callback)
                    .expect("callback registers");
                ModuleInstance::simple(Recorder {
                    ctx,
                    log: CallLog::default(),
                    args: Mutex::new(ModuleArgs::default()),
                })
            })
            .unwrap();

        let mut runner = ModuleRunner::new(
            RunnerConfig::default(),
            registry,
            Arc::new(BaseTelemetry::new()),
            EventPublisher::noop(),
        );
        let recipe = Recipe::new("streaming")
            .with_module(recorder("Producer").with_arg("label", json!("streamed")))
            .with_module(ModuleDefinition::new("StreamingSink").wants(["Producer"]));

        let report = run(&mut runner, recipe).await;

        assert_eq!(report.exit_code(), 0);
        assert_eq!(*received.lock(), vec!["streamed".to_string()]);
        assert!(
            runner
                .containers()
                .get_containers::<TestContainer>("StreamingSink", false)
                .unwrap()
                .is_empty()
        );
    }
}
