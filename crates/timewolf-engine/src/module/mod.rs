//! Module interface.
//!
//! A module is a unit of work in a recipe. There are three kinds:
//!
//! - [`Module`]: `set_up` then `process`, once.
//! - [`PreflightModule`]: same shape, runs sequentially before every ordinary
//!   module and is always cleaned up at the end of the run.
//! - [`ThreadAwareModule`]: `set_up`, `pre_process`, then `process` once per
//!   container of its `Item` type on a bounded worker pool, then
//!   `post_process`.
//!
//! Lifecycle methods take `&self`: thread-aware modules are shared between
//! workers, so modules keep run state behind their own locks.

mod context;
mod registry;
mod status;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use context::ModuleContext;
pub use registry::{ModuleFactory, ModuleRegistry};
pub use status::{ModuleState, ModuleStatus};

use crate::container::{AnyContainer, Container, downcast};
use crate::error::{ModuleError, ModuleResult};

/// Default number of concurrent workers of a thread-aware module.
pub const DEFAULT_THREAD_POOL_SIZE: usize = 10;

/// Resolved arguments of one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleArgs(Map<String, Value>);

impl ModuleArgs {
    pub fn new(args: Map<String, Value>) -> Self {
        Self(args)
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Typed value of `key`. `None` when missing, null or of another type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.0.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => T::deserialize(value).ok(),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key).unwrap_or_default()
    }

    /// Typed value of `key`, or a critical error naming the argument.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> ModuleResult<T> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(ModuleError::critical(format!(
                "missing required argument '{key}'"
            ))),
            Some(value) => T::deserialize(value).map_err(|e| {
                ModuleError::critical(format!("invalid value for argument '{key}': {e}"))
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ModuleArgs {
    fn from(args: Map<String, Value>) -> Self {
        Self(args)
    }
}

/// An ordinary module.
#[async_trait]
pub trait Module: Send + Sync {
    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult;

    async fn process(&self) -> ModuleResult;

    async fn clean_up(&self) -> ModuleResult {
        Ok(())
    }
}

/// A module that runs before every ordinary module.
#[async_trait]
pub trait PreflightModule: Send + Sync {
    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult;

    async fn process(&self) -> ModuleResult;

    /// Always invoked once the run is over, whatever happened.
    async fn clean_up(&self) -> ModuleResult {
        Ok(())
    }
}

/// A module processing each container of one type concurrently.
#[async_trait]
pub trait ThreadAwareModule: Send + Sync {
    /// The container type this module fans out over.
    type Item: Container;

    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult;

    /// Runs once before the fan-out.
    async fn pre_process(&self) -> ModuleResult {
        Ok(())
    }

    /// Runs once per container, concurrently.
    async fn process(&self, item: Arc<Self::Item>) -> ModuleResult;

    /// Runs once after every `process` call finished, even if some failed.
    async fn post_process(&self) -> ModuleResult {
        Ok(())
    }

    async fn clean_up(&self) -> ModuleResult {
        Ok(())
    }

    fn thread_pool_size(&self) -> usize {
        DEFAULT_THREAD_POOL_SIZE
    }

    /// When false (the default), fanned-out containers are popped from the store.
    fn keep_threaded_containers_in_state(&self) -> bool {
        false
    }
}

/// Type-erased view of a [`ThreadAwareModule`] used by the runner.
#[async_trait]
pub trait ThreadedModule: Send + Sync {
    fn thread_on_container_type(&self) -> &'static str;

    fn thread_pool_size(&self) -> usize;

    fn keep_threaded_containers_in_state(&self) -> bool;

    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult;

    async fn pre_process(&self) -> ModuleResult;

    async fn process(&self, item: Arc<dyn AnyContainer>) -> ModuleResult;

    async fn post_process(&self) -> ModuleResult;

    async fn clean_up(&self) -> ModuleResult;
}

struct ThreadAwareAdapter<M>(M);

#[async_trait]
impl<M: ThreadAwareModule> ThreadedModule for ThreadAwareAdapter<M> {
    fn thread_on_container_type(&self) -> &'static str {
        M::Item::CONTAINER_TYPE
    }

    fn thread_pool_size(&self) -> usize {
        self.0.thread_pool_size().max(1)
    }

    fn keep_threaded_containers_in_state(&self) -> bool {
        self.0.keep_threaded_containers_in_state()
    }

    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        self.0.set_up(args).await
    }

    async fn pre_process(&self) -> ModuleResult {
        self.0.pre_process().await
    }

    async fn process(&self, item: Arc<dyn AnyContainer>) -> ModuleResult {
        let container_type = item.container_type();
        let item = downcast::<M::Item>(item).ok_or_else(|| {
            ModuleError::critical(format!(
                "expected a '{}' container, got '{container_type}'",
                M::Item::CONTAINER_TYPE
            ))
        })?;
        self.0.process(item).await
    }

    async fn post_process(&self) -> ModuleResult {
        self.0.post_process().await
    }

    async fn clean_up(&self) -> ModuleResult {
        self.0.clean_up().await
    }
}

/// A module instance, tagged by capability.
#[derive(Clone)]
pub enum ModuleInstance {
    Simple(Arc<dyn Module>),
    Preflight(Arc<dyn PreflightModule>),
    ThreadAware(Arc<dyn ThreadedModule>),
}

impl ModuleInstance {
    pub fn simple(module: impl Module + 'static) -> Self {
        Self::Simple(Arc::new(module))
    }

    pub fn preflight(module: impl PreflightModule + 'static) -> Self {
        Self::Preflight(Arc::new(module))
    }

    pub fn thread_aware<M: ThreadAwareModule + 'static>(module: M) -> Self {
        Self::ThreadAware(Arc::new(ThreadAwareAdapter(module)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Simple(_) => "module",
            Self::Preflight(_) => "preflight",
            Self::ThreadAware(_) => "thread-aware module",
        }
    }

    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::Preflight(_))
    }

    pub async fn clean_up(&self) -> ModuleResult {
        match self {
            Self::Simple(m) => m.clean_up().await,
            Self::Preflight(m) => m.clean_up().await,
            Self::ThreadAware(m) => m.clean_up().await,
        }
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThreadAware(m) => f
                .debug_struct("ThreadAware")
                .field("container_type", &m.thread_on_container_type())
                .field("thread_pool_size", &m.thread_pool_size())
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}
