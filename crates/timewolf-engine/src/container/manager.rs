//! Thread-safe container storage and delivery.
//!
//! The `ContainerManager` is responsible for:
//! - Storing containers per `(source module, container type)` bucket
//! - Restricting delivery to containers from a module's dependencies (or itself)
//! - Exclusive (`pop`) versus shared (peek) retrieval
//! - Parking containers produced during a thread-aware fan-out pass
//! - Streaming containers to registered callbacks
//!
//! Each bucket has its own lock. Operations on different buckets never contend,
//! operations on the same bucket are serialized, which is what makes `pop`
//! exactly-once across concurrent callers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{AnyContainer, Container, MetadataFilter, downcast};
use crate::error::ContainerError;
use crate::recipe::Recipe;

/// Callback receiving streamed containers.
pub type StreamingCallback = Arc<dyn Fn(Arc<dyn AnyContainer>) + Send + Sync>;

/// What happens to stored containers once they are no longer needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Keep everything until the manager is dropped.
    #[default]
    KeepAll,
    /// Drop a module's buckets once it and every module depending on it completed.
    ReleaseConsumed,
}

/// Identifies one storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub source: String,
    pub container_type: &'static str,
}

impl BucketKey {
    pub fn new(source: impl Into<String>, container_type: &'static str) -> Self {
        Self {
            source: source.into(),
            container_type,
        }
    }
}

#[derive(Debug)]
struct Entry {
    container: Arc<dyn AnyContainer>,
    /// Modules that already received this container through a streaming callback.
    streamed_to: Vec<String>,
}

#[derive(Debug, Default)]
struct Bucket {
    entries: Vec<Entry>,
    /// Containers stored while a pass is open.
    pending: Vec<Entry>,
    open_passes: usize,
}

impl Bucket {
    fn contains(&self, container: &dyn AnyContainer) -> bool {
        self.entries
            .iter()
            .chain(self.pending.iter())
            .any(|e| e.container.dyn_eq(container))
    }

    fn flush_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.entries.extend(pending);
    }
}

type SharedBucket = Arc<Mutex<Bucket>>;

struct ModuleNode {
    wants: Vec<String>,
    completed: AtomicBool,
    callbacks: Mutex<HashMap<&'static str, Vec<StreamingCallback>>>,
}

impl ModuleNode {
    fn new(wants: Vec<String>) -> Self {
        Self {
            wants,
            completed: AtomicBool::new(false),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Central store for all inter-module data of one run.
pub struct ContainerManager {
    graph: RwLock<HashMap<String, ModuleNode>>,
    /// Runtime names in recipe order, used for stable debug output.
    order: RwLock<Vec<String>>,
    buckets: DashMap<BucketKey, SharedBucket>,
    retention: Retention,
    callback_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for ContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerManager {
    /// Create a manager that keeps every stored container.
    pub fn new() -> Self {
        Self::with_retention(Retention::KeepAll)
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            graph: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            buckets: DashMap::new(),
            retention,
            callback_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the dependency graph from a recipe, discarding any previous state.
    pub fn parse_recipe(&self, recipe: &Recipe) {
        let mut graph = self.graph.write();
        let mut order = self.order.write();
        graph.clear();
        order.clear();
        self.buckets.clear();

        for definition in recipe.preflights.iter().chain(recipe.modules.iter()) {
            let name = definition.runtime_name().to_string();
            graph.insert(name.clone(), ModuleNode::new(definition.wants.clone()));
            order.push(name);
        }

        debug!(modules = graph.len(), recipe = %recipe.name, "Container manager parsed recipe");
    }

    /// Store a container on behalf of `source`.
    pub fn store_container<T: Container>(
        &self,
        source: &str,
        container: T,
    ) -> Result<(), ContainerError> {
        self.store_erased(source, Arc::new(container))
    }

    /// Store an already type-erased container on behalf of `source`.
    ///
    /// Storing a container equal to one already held for the same source is a
    /// no-op.
    pub fn store_erased(
        &self,
        source: &str,
        container: Arc<dyn AnyContainer>,
    ) -> Result<(), ContainerError> {
        let container_type = container.container_type();
        let streaming = {
            let graph = self.graph.read();
            if graph.is_empty() {
                return Err(ContainerError::NotConfigured);
            }
            if !graph.contains_key(source) {
                return Err(ContainerError::UnknownModule(source.to_string()));
            }
            Self::streaming_targets(&graph, source, container_type)
        };

        let bucket = self.bucket(BucketKey::new(source, container_type));
        {
            let mut bucket = bucket.lock();
            if bucket.contains(container.as_ref()) {
                trace!(source, container_type, "Skipping duplicate container");
                return Ok(());
            }

            let entry = Entry {
                container: container.clone(),
                streamed_to: streaming.iter().map(|(name, _)| name.clone()).collect(),
            };
            if bucket.open_passes > 0 {
                bucket.pending.push(entry);
            } else {
                bucket.entries.push(entry);
            }
        }

        debug!(source, container_type, container = ?container, "Stored container");

        for (module, callbacks) in streaming {
            for callback in callbacks {
                debug!(module = %module, container_type, "Streaming container to callback");
                self.dispatch_callback(callback, container.clone());
            }
        }
        Ok(())
    }

    /// Retrieve every `T` visible to `requesting`.
    ///
    /// Visible containers are those stored by `requesting` itself and those
    /// stored by a module it wants once that module has completed. With
    /// `pop`, exactly the returned containers are removed from the store.
    pub fn get_containers<T: Container>(
        &self,
        requesting: &str,
        pop: bool,
    ) -> Result<Vec<Arc<T>>, ContainerError> {
        self.get_containers_filtered(requesting, pop, None)
    }

    /// Like [`get_containers`](Self::get_containers), restricted by a metadata filter.
    pub fn get_containers_filtered<T: Container>(
        &self,
        requesting: &str,
        pop: bool,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Arc<T>>, ContainerError> {
        let erased = self.get_erased(requesting, T::CONTAINER_TYPE, pop, filter)?;
        Ok(erased.into_iter().filter_map(downcast::<T>).collect())
    }

    /// Type-erased retrieval, used by the runner for thread-aware fan-out.
    pub fn get_erased(
        &self,
        requesting: &str,
        container_type: &'static str,
        pop: bool,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Arc<dyn AnyContainer>>, ContainerError> {
        let sources = self.visible_sources(requesting)?;
        let mut collected = Vec::new();

        for source in &sources {
            let key = BucketKey::new(source.as_str(), container_type);
            let Some(bucket) = self.buckets.get(&key).map(|b| b.value().clone()) else {
                continue;
            };

            let mut bucket = bucket.lock();
            let selected = |entry: &Entry| {
                !entry.streamed_to.iter().any(|m| m == requesting)
                    && filter.is_none_or(|f| f.matches(entry.container.as_ref()))
            };

            if pop {
                let (taken, kept): (Vec<Entry>, Vec<Entry>) =
                    std::mem::take(&mut bucket.entries)
                        .into_iter()
                        .partition(|e| selected(e));
                bucket.entries = kept;
                collected.extend(taken.into_iter().map(|e| e.container));
            } else {
                collected.extend(
                    bucket
                        .entries
                        .iter()
                        .filter(|e| selected(e))
                        .map(|e| e.container.clone()),
                );
            }
        }

        debug!(
            module = requesting,
            container_type,
            count = collected.len(),
            pop,
            "Retrieved containers"
        );
        Ok(collected)
    }

    /// Mark a module as completed.
    ///
    /// Its outputs become visible to dependents and any pass it left open is
    /// closed. Calling this more than once is harmless.
    pub fn complete_module(&self, name: &str) -> Result<(), ContainerError> {
        {
            let graph = self.graph.read();
            if graph.is_empty() {
                return Err(ContainerError::NotConfigured);
            }
            let node = graph
                .get(name)
                .ok_or_else(|| ContainerError::UnknownModule(name.to_string()))?;
            node.completed.store(true, Ordering::SeqCst);
        }

        for bucket in self.buckets_of(name) {
            let mut bucket = bucket.lock();
            bucket.open_passes = 0;
            bucket.flush_pending();
        }

        debug!(module = name, "Module completed in container store");

        if self.retention == Retention::ReleaseConsumed {
            self.release_consumed();
        }
        Ok(())
    }

    /// Whether `complete_module` was called for `name`.
    pub fn is_completed(&self, name: &str) -> bool {
        self.graph
            .read()
            .get(name)
            .is_some_and(ModuleNode::is_completed)
    }

    /// Open a fan-out pass for `module` on `container_type`.
    ///
    /// Until the returned guard is dropped, containers of that type stored by
    /// `module` are parked and invisible to every retrieval.
    pub fn begin_pass(
        &self,
        module: &str,
        container_type: &'static str,
    ) -> Result<PassGuard, ContainerError> {
        {
            let graph = self.graph.read();
            if graph.is_empty() {
                return Err(ContainerError::NotConfigured);
            }
            if !graph.contains_key(module) {
                return Err(ContainerError::UnknownModule(module.to_string()));
            }
        }

        let key = BucketKey::new(module, container_type);
        let bucket = self.bucket(key.clone());
        bucket.lock().open_passes += 1;
        trace!(module, container_type, "Opened container pass");
        Ok(PassGuard { key, bucket })
    }

    /// Register a callback receiving `container_type` containers stored by
    /// any module that `module` wants.
    pub fn register_streaming_callback(
        &self,
        module: &str,
        container_type: &'static str,
        callback: StreamingCallback,
    ) -> Result<(), ContainerError> {
        let graph = self.graph.read();
        if graph.is_empty() {
            return Err(ContainerError::NotConfigured);
        }
        let node = graph
            .get(module)
            .ok_or_else(|| ContainerError::UnknownModule(module.to_string()))?;
        node.callbacks
            .lock()
            .entry(container_type)
            .or_default()
            .push(callback);
        Ok(())
    }

    /// Wait for every streaming callback dispatched so far.
    pub async fn wait_for_callbacks(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.callback_tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Streaming callback failed");
            }
        }
    }

    /// Every stored `T` regardless of visibility, with its source module.
    ///
    /// Intended for reporting once a run is over.
    pub fn snapshot<T: Container>(&self) -> Vec<(String, Arc<T>)> {
        let mut keys: Vec<BucketKey> = self
            .buckets
            .iter()
            .filter(|b| b.key().container_type == T::CONTAINER_TYPE)
            .map(|b| b.key().clone())
            .collect();
        keys.sort();

        let mut out = Vec::new();
        for key in keys {
            let Some(bucket) = self.buckets.get(&key).map(|b| b.value().clone()) else {
                continue;
            };
            let bucket = bucket.lock();
            out.extend(
                bucket
                    .entries
                    .iter()
                    .filter_map(|e| downcast::<T>(e.container.clone()))
                    .map(|c| (key.source.clone(), c)),
            );
        }
        out
    }

    fn bucket(&self, key: BucketKey) -> SharedBucket {
        // Clone the Arc out so the shard lock is released before locking the bucket.
        self.buckets.entry(key).or_default().value().clone()
    }

    fn buckets_of(&self, source: &str) -> Vec<SharedBucket> {
        self.buckets
            .iter()
            .filter(|b| b.key().source == source)
            .map(|b| b.value().clone())
            .collect()
    }

    fn visible_sources(&self, requesting: &str) -> Result<Vec<String>, ContainerError> {
        let graph = self.graph.read();
        if graph.is_empty() {
            return Err(ContainerError::NotConfigured);
        }
        let node = graph
            .get(requesting)
            .ok_or_else(|| ContainerError::UnknownModule(requesting.to_string()))?;

        let mut sources: Vec<String> = node
            .wants
            .iter()
            .filter(|w| w.as_str() != requesting)
            .filter(|w| graph.get(w.as_str()).is_some_and(ModuleNode::is_completed))
            .cloned()
            .collect();
        sources.push(requesting.to_string());
        Ok(sources)
    }

    fn streaming_targets(
        graph: &HashMap<String, ModuleNode>,
        source: &str,
        container_type: &'static str,
    ) -> Vec<(String, Vec<StreamingCallback>)> {
        graph
            .iter()
            .filter(|(name, node)| name.as_str() != source && node.wants.iter().any(|w| w == source))
            .filter_map(|(name, node)| {
                let callbacks = node.callbacks.lock().get(container_type).cloned()?;
                Some((name.clone(), callbacks))
            })
            .collect()
    }

    fn dispatch_callback(&self, callback: StreamingCallback, container: Arc<dyn AnyContainer>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn_blocking(move || callback(container));
                self.callback_tasks.lock().push(task);
            }
            Err(_) => callback(container),
        }
    }

    fn release_consumed(&self) {
        let releasable: Vec<String> = {
            let graph = self.graph.read();
            graph
                .iter()
                .filter(|(_, node)| node.is_completed())
                .filter(|(name, _)| {
                    let mut dependents = graph
                        .values()
                        .filter(|n| n.wants.iter().any(|w| w == *name))
                        .peekable();
                    dependents.peek().is_some() && dependents.all(ModuleNode::is_completed)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in releasable {
            let before = self.buckets.len();
            self.buckets.retain(|key, _| key.source != name);
            let released = before - self.buckets.len();
            if released > 0 {
                debug!(module = %name, buckets = released, "Released consumed containers");
            }
        }
    }
}

impl fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerManager")
            .field("modules", &self.order.read().len())
            .field("buckets", &self.buckets.len())
            .field("retention", &self.retention)
            .finish()
    }
}

impl fmt::Display for ContainerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph.read();
        for name in self.order.read().iter() {
            let Some(node) = graph.get(name) else {
                continue;
            };
            writeln!(f, "Module: {name}")?;
            writeln!(f, "  Dependencies:")?;
            writeln!(f, "    {}", node.wants.join(", "))?;
            writeln!(f, "  Containers:")?;

            let mut keys: Vec<BucketKey> = self
                .buckets
                .iter()
                .filter(|b| &b.key().source == name)
                .map(|b| b.key().clone())
                .collect();
            keys.sort();
            for key in keys {
                writeln!(f, "    {}", key.container_type)?;
                if let Some(bucket) = self.buckets.get(&key).map(|b| b.value().clone()) {
                    for entry in bucket.lock().entries.iter() {
                        writeln!(f, "      {}:{:?}", key.source, entry.container)?;
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Open fan-out pass. Parked containers are published when it drops.
#[must_use = "the pass closes as soon as the guard is dropped"]
pub struct PassGuard {
    key: BucketKey,
    bucket: SharedBucket,
}

impl PassGuard {
    pub fn key(&self) -> &BucketKey {
        &self.key
    }
}

impl fmt::Debug for PassGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassGuard").field("key", &self.key).finish()
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        let mut bucket = self.bucket.lock();
        bucket.open_passes = bucket.open_passes.saturating_sub(1);
        if bucket.open_passes == 0 {
            bucket.flush_pending();
        }
        trace!(
            module = %self.key.source,
            container_type = self.key.container_type,
            "Closed container pass"
        );
    }
}
