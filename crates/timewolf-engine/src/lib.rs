//! # Timewolf Engine
//!
//! Recipe execution engine for forensic collection and processing workflows.
//!
//! A recipe names a set of modules and the modules each of them depends on.
//! The engine instantiates the modules, runs preflights first, then runs
//! every other module as soon as its dependencies completed. Modules exchange
//! data exclusively through typed containers held by a shared
//! [`ContainerManager`].
//!
//! ## Features
//!
//! - Typed, type-erased container store with per-bucket locking
//! - Dependency-scoped visibility and exactly-once `pop`
//! - Thread-aware modules fanned out over a bounded worker pool
//! - Critical error propagation with transitive cancellation of dependents
//! - `@token` argument templating for recipes
//! - Pluggable validators for recipe argument values
//!

pub mod cache;
pub mod container;
pub mod error;
pub mod events;
pub mod module;
pub mod recipe;
pub mod runner;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

pub use cache::RunCache;
pub use container::{
    AnyContainer, Container, ContainerManager, Metadata, MetadataFilter, Retention,
};
pub use error::{ContainerError, Error, ErrorLog, ErrorRecord, ModuleError, ModuleResult, Result};
pub use events::{EventPublisher, RunEvent};
pub use module::{
    Module, ModuleArgs, ModuleContext, ModuleInstance, ModuleRegistry, ModuleStatus,
    PreflightModule, ThreadAwareModule,
};
pub use recipe::{
    ArgValidator, ModuleDefinition, Recipe, RecipeArg, RecipeManager, ValidatorRegistry,
};
pub use runner::{ModuleRunner, RunReport, RunnerConfig};
pub use telemetry::{BaseTelemetry, NoopTelemetry, Telemetry};
