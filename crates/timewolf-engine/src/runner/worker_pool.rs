//! Bounded worker pool for thread-aware fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::completion::settle_run;
use crate::container::AnyContainer;
use crate::error::ModuleError;
use crate::events::RunEvent;
use crate::module::{ModuleContext, ModuleStatus, ThreadedModule};

/// What happened during one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FanOutSummary {
    pub processed: usize,
    pub failed: usize,
    /// At least one item failed critically (or panicked).
    pub critical: bool,
}

/// Call `module.process` once per item, at most `thread_pool_size` at a time.
///
/// Failing items are recorded and never stop their siblings. Returns once
/// every item finished.
pub(crate) async fn fan_out(
    module: Arc<dyn ThreadedModule>,
    ctx: &ModuleContext,
    items: Vec<Arc<dyn AnyContainer>>,
) -> FanOutSummary {
    let max_workers = module.thread_pool_size();
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();

    info!(
        module = %ctx.name(),
        count = items.len(),
        max_workers,
        "Running threads"
    );

    for (index, item) in items.into_iter().enumerate() {
        let worker_name = format!("{} worker {index}", ctx.name());
        let module = module.clone();
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();

        let handle = tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            if ctx.is_cancelled() {
                debug!(module = %ctx.name(), index, "Skipping item after cancellation");
                return Ok(());
            }

            let label = format!("{item:?}");
            debug!(module = %ctx.name(), index, container = %label, "Launching process worker");
            publish_thread_state(&ctx, index, ModuleStatus::Processing, &label);

            let result = module.process(item).await;
            let status = match &result {
                Ok(()) => ModuleStatus::Completed,
                Err(_) => ModuleStatus::Error,
            };
            publish_thread_state(&ctx, index, status, &label);
            result
        });
        names.insert(handle.id(), worker_name);
    }

    let (results, failures) = settle_run(tasks, &names).await;

    let mut summary = FanOutSummary::default();
    for result in results {
        summary.processed += 1;
        if let Err(error) = result {
            summary.failed += 1;
            summary.critical |= ctx.record_error(error).critical;
        }
    }
    for failure in failures {
        summary.processed += 1;
        summary.failed += 1;
        summary.critical = true;
        ctx.record_error(ModuleError::critical(format!(
            "{} {}",
            failure.name, failure.message
        )));
    }

    debug!(
        module = %ctx.name(),
        processed = summary.processed,
        failed = summary.failed,
        "Fan-out finished"
    );
    summary
}

fn publish_thread_state(ctx: &ModuleContext, thread: usize, status: ModuleStatus, container: &str) {
    ctx.events().publish(RunEvent::ThreadState {
        module: ctx.name().to_string(),
        thread,
        status,
        container: container.to_string(),
    });
}
