//! Module class registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ModuleContext, ModuleInstance};
use crate::error::{Error, Result};

/// Builds a module instance for one run.
pub type ModuleFactory = Arc<dyn Fn(ModuleContext) -> ModuleInstance + Send + Sync>;

/// Maps module class names to factories.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Fails if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(ModuleContext) -> ModuleInstance + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::config(format!("module {name} is already registered")));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Register a class, replacing any previous registration.
    pub fn register_override<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ModuleContext) -> ModuleInstance + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(module = %name, "Overriding module registration");
        }
    }

    pub fn deregister(&mut self, name: &str) -> Result<()> {
        self.factories
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ModuleFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str, context: ModuleContext) -> Result<ModuleInstance> {
        let factory = self
            .get(name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))?;
        Ok(factory(context))
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}
