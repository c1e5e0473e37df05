use std::any::Any;
use std::collections::HashMap;
use std::future::Future;

use tokio::task::{Id, JoinError, JoinSet};

/// A spawned task that did not return normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaskFailure {
    pub name: String,
    pub message: String,
}

/// Wait for every task of `tasks`.
///
/// Semantics:
/// - Outputs of tasks that returned are collected in completion order.
/// - A task that panicked or was aborted becomes a [`TaskFailure`] named
///   after its entry in `names`.
/// - Every task is awaited, a failure never short-circuits the others.
pub(crate) async fn settle_run<T: 'static>(
    mut tasks: JoinSet<T>,
    names: &HashMap<Id, String>,
) -> (Vec<T>, Vec<TaskFailure>) {
    let mut outputs = Vec::with_capacity(tasks.len());
    let mut failures = Vec::new();

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, output)) => outputs.push(output),
            Err(join_error) => {
                let name = names
                    .get(&join_error.id())
                    .cloned()
                    .unwrap_or_else(|| format!("task {}", join_error.id()));
                failures.push(TaskFailure {
                    name,
                    message: describe(join_error),
                });
            }
        }
    }

    (outputs, failures)
}

/// Run `future` on its own task so a panic is caught at the task boundary.
pub(crate) async fn guarded<F>(future: F) -> Result<F::Output, String>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future).await.map_err(describe)
}

fn describe(join_error: JoinError) -> String {
    if join_error.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match join_error.try_into_panic() {
        Ok(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        Err(other) => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
