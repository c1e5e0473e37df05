//! Recipe model.
//!
//! A recipe is a named, declarative list of preflights and modules. Each
//! module declares the runtime names it `wants` and a JSON argument template
//! whose `@token` placeholders are resolved from the command line and the
//! configuration.

pub mod args;
mod manager;
pub mod validators;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use args::{check_placeholders, resolve_args};
pub use manager::RecipeManager;
pub use validators::{ArgValidator, ValidatorRegistry};

use crate::error::{Error, Result};
use crate::module::ModuleRegistry;

/// One module entry of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// Registered module class.
    pub name: String,
    /// Name of this instance when the same class appears twice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<String>,
    #[serde(default)]
    pub wants: Vec<String>,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime_name: None,
            wants: Vec::new(),
            args: Map::new(),
        }
    }

    pub fn with_runtime_name(mut self, runtime_name: impl Into<String>) -> Self {
        self.runtime_name = Some(runtime_name.into());
        self
    }

    pub fn wants<I, S>(mut self, wants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wants = wants.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime_name.as_deref().unwrap_or(&self.name)
    }
}

/// A command line argument declared by a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeArg {
    /// `name` for a positional argument, `--name` for an optional one.
    pub switch: String,
    pub help: String,
    #[serde(default)]
    pub default: Value,
    /// Name of the validator applied to the value (e.g. `integer`, `hostname`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Validator parameters such as `comma_separated`, `regex` or `fqdn_only`.
    /// A `format` key here is equivalent to the `format` field.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub validation_params: Map<String, Value>,
}

impl RecipeArg {
    pub fn new(switch: impl Into<String>, help: impl Into<String>, default: Value) -> Self {
        Self {
            switch: switch.into(),
            help: help.into(),
            default,
            format: None,
            validation_params: Map::new(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_validation_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.validation_params.insert(key.into(), value);
        self
    }

    /// The validator to apply, if any.
    pub fn validator_name(&self) -> Option<&str> {
        self.format
            .as_deref()
            .or_else(|| self.validation_params.get("format").and_then(Value::as_str))
            .filter(|name| !name.is_empty())
    }

    pub fn is_optional(&self) -> bool {
        self.switch.starts_with("--")
    }

    /// Name of the argument as used in `@token` placeholders.
    pub fn dest(&self) -> &str {
        self.switch.trim_start_matches('-')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub preflights: Vec<ModuleDefinition>,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
    #[serde(default)]
    pub args: Vec<RecipeArg>,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            short_description: String::new(),
            preflights: Vec::new(),
            modules: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_preflight(mut self, definition: ModuleDefinition) -> Self {
        self.preflights.push(definition);
        self
    }

    pub fn with_module(mut self, definition: ModuleDefinition) -> Self {
        self.modules.push(definition);
        self
    }

    pub fn with_arg(mut self, arg: RecipeArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::recipe(e.to_string()))
    }

    /// Preflights then modules, in declaration order.
    pub fn definitions(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.preflights.iter().chain(self.modules.iter())
    }

    /// Structural checks against a module registry.
    ///
    /// Runtime names must be unique, every `wants` entry must name a
    /// preflight or a module declared earlier, and every class must be
    /// registered.
    pub fn validate(&self, registry: &ModuleRegistry) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::recipe("recipe has no name"));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for definition in self.definitions() {
            let runtime_name = definition.runtime_name();
            if !registry.contains(&definition.name) {
                return Err(Error::recipe(format!(
                    "recipe {} uses unknown module {}",
                    self.name, definition.name
                )));
            }
            for want in &definition.wants {
                if want == runtime_name {
                    continue;
                }
                if !seen.contains(want.as_str()) {
                    return Err(Error::recipe(format!(
                        "module {runtime_name} wants {want}, which is not declared before it"
                    )));
                }
            }
            if !seen.insert(runtime_name) {
                return Err(Error::recipe(format!(
                    "runtime name {runtime_name} is used more than once"
                )));
            }
        }

        let mut switches: HashSet<&str> = HashSet::new();
        for arg in &self.args {
            if !switches.insert(arg.dest()) {
                return Err(Error::recipe(format!(
                    "argument {} is declared more than once",
                    arg.switch
                )));
            }
        }
        Ok(())
    }

    /// Names of the modules that directly want `runtime_name`.
    pub fn dependents_of(&self, runtime_name: &str) -> Vec<&str> {
        self.definitions()
            .filter(|d| d.runtime_name() != runtime_name)
            .filter(|d| d.wants.iter().any(|w| w == runtime_name))
            .map(ModuleDefinition::runtime_name)
            .collect()
    }
}
