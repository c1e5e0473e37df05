//! Modules shipped with the CLI.

mod filesystem;
mod grepper;
mod local_copy;

pub use filesystem::FilesystemCollector;
pub use grepper::GrepperSearch;
pub use local_copy::LocalFilesystemCopy;

use timewolf_engine::{ModuleInstance, ModuleRegistry, Result};

/// Register every built-in module under its class name.
pub fn register_builtin_modules(registry: &mut ModuleRegistry) -> Result<()> {
    registry.register("FilesystemCollector", |ctx| {
        ModuleInstance::simple(FilesystemCollector::new(ctx))
    })?;
    registry.register("GrepperSearch", |ctx| {
        ModuleInstance::thread_aware(GrepperSearch::new(ctx))
    })?;
    registry.register("LocalFilesystemCopy", |ctx| {
        ModuleInstance::simple(LocalFilesystemCopy::new(ctx))
    })?;
    Ok(())
}
