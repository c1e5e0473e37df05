//! Typed containers exchanged between modules.
//!
//! A container is a plain value object tagged with a `CONTAINER_TYPE`.
//! Containers have no identity of their own: two containers of the same type
//! with equal attributes are the same container. The [`ContainerManager`]
//! tracks which module stored each container separately from the value.
//!
//! The store is heterogeneous, so containers travel through it as
//! `Arc<dyn AnyContainer>` and are handed back to callers as `Arc<T>` through
//! checked downcasts.

mod manager;
mod types;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

pub use manager::{BucketKey, ContainerManager, PassGuard, Retention, StreamingCallback};
pub use types::{Directory, File, Host, Report, TextFormat};

/// Free-form metadata attached to a container.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A typed, immutable-by-convention data record.
pub trait Container: Debug + PartialEq + Send + Sync + 'static {
    /// Schema tag shared by every instance of the type.
    const CONTAINER_TYPE: &'static str;

    /// Optional metadata used for filtered retrieval.
    fn metadata(&self) -> Option<&Metadata> {
        None
    }
}

/// Object-safe view of a [`Container`].
pub trait AnyContainer: Debug + Send + Sync + 'static {
    fn container_type(&self) -> &'static str;

    fn metadata(&self) -> Option<&Metadata>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Attribute equality across the erased boundary.
    fn dyn_eq(&self, other: &dyn AnyContainer) -> bool;
}

impl<T: Container> AnyContainer for T {
    fn container_type(&self) -> &'static str {
        T::CONTAINER_TYPE
    }

    fn metadata(&self) -> Option<&Metadata> {
        Container::metadata(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dyn_eq(&self, other: &dyn AnyContainer) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// Downcast an erased container back to its concrete type.
pub fn downcast<T: Container>(container: Arc<dyn AnyContainer>) -> Option<Arc<T>> {
    container.as_any_arc().downcast::<T>().ok()
}

/// Restricts retrieval to containers whose metadata holds `key == value`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: serde_json::Value,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, container: &dyn AnyContainer) -> bool {
        container
            .metadata()
            .and_then(|m| m.get(&self.key))
            .is_some_and(|v| *v == self.value)
    }
}
