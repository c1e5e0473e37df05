//! Command line surface.
//!
//! Recipes are data, so their subcommands are assembled at runtime with the
//! clap builder API from each recipe's declared arguments.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde_json::{Map, Value};
use timewolf_engine::{Error as EngineError, Recipe, RecipeArg, RecipeManager, ValidatorRegistry};

use crate::error::{AppError, Result};

pub const LIST_COMMAND: &str = "list";

/// Options that apply to every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub recipes_dir: Option<PathBuf>,
}

impl GlobalOptions {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            verbose: matches.get_flag("verbose"),
            quiet: matches.get_flag("quiet"),
            config: matches.get_one::<PathBuf>("config").cloned(),
            recipes_dir: matches.get_one::<PathBuf>("recipes_dir").cloned(),
        }
    }
}

fn base_command() -> Command {
    Command::new("timewolf")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run forensic collection and processing recipes")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging and print telemetry")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to ~/.timewolfrc)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("recipes_dir")
                .long("recipes-dir")
                .value_name("DIR")
                .env("TIMEWOLF_RECIPES_DIR")
                .help("Directory holding recipe definitions")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
}

/// Read the global options only, before recipes are known.
pub fn parse_global_options<I, T>(argv: I) -> GlobalOptions
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = base_command()
        .ignore_errors(true)
        .allow_external_subcommands(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .get_matches_from(argv);
    GlobalOptions::from_matches(&matches)
}

/// The full command, with one subcommand per recipe.
pub fn build_command(recipes: &RecipeManager) -> Command {
    let mut command = base_command()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new(LIST_COMMAND).about("List available recipes"));

    for recipe in recipes.recipes() {
        command = command.subcommand(recipe_command(recipe));
    }
    command
}

fn recipe_command(recipe: &Recipe) -> Command {
    let about = if recipe.short_description.is_empty() {
        recipe.description.clone()
    } else {
        recipe.short_description.clone()
    };

    let mut command = Command::new(recipe.name.clone())
        .about(about)
        .long_about(recipe.description.clone());
    for arg in &recipe.args {
        command = command.arg(recipe_arg(arg));
    }
    command
}

fn recipe_arg(arg: &RecipeArg) -> Arg {
    let dest = arg.dest().to_string();
    let clap_arg = Arg::new(dest.clone()).help(arg.help.clone());

    if !arg.is_optional() {
        return clap_arg.required(true);
    }

    match &arg.default {
        // A flag that defaults to on is turned off with `--no_<name>`.
        Value::Bool(true) => clap_arg
            .long(format!("no_{dest}"))
            .action(ArgAction::SetFalse),
        Value::Bool(false) => clap_arg.long(dest).action(ArgAction::SetTrue),
        _ => recipe_value_arg(clap_arg.long(dest), arg),
    }
}

fn recipe_value_arg(clap_arg: Arg, arg: &RecipeArg) -> Arg {
    match &arg.default {
        Value::Null => clap_arg,
        Value::String(s) => clap_arg.default_value(s.clone()),
        other => clap_arg.default_value(other.to_string()),
    }
}

/// Typed, validated values for every declared argument of `recipe`.
///
/// Values given on the command line always win. An optional argument left
/// unset yields to a configuration value of the same name, then to its
/// declared default. String values, defaults included, go through the
/// argument's validator.
pub fn collect_recipe_args(
    recipe: &Recipe,
    matches: &ArgMatches,
    config: &Map<String, Value>,
    validators: &ValidatorRegistry,
) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    for arg in &recipe.args {
        let dest = arg.dest();
        let explicit = matches!(
            matches.value_source(dest),
            Some(clap::parser::ValueSource::CommandLine)
        );

        if !explicit && config.contains_key(dest) {
            continue;
        }

        let value = if matches!(arg.default, Value::Bool(_)) {
            Value::Bool(matches.get_flag(dest))
        } else {
            match matches.get_one::<String>(dest) {
                Some(raw) => typed_value(arg, raw, validators)?,
                None => arg.default.clone(),
            }
        };
        args.insert(dest.to_string(), value);
    }
    Ok(args)
}

fn typed_value(arg: &RecipeArg, raw: &str, validators: &ValidatorRegistry) -> Result<Value> {
    match arg.validator_name() {
        Some(_) => validators.validate(raw, arg).map_err(|e| match e {
            EngineError::ArgumentValidation { .. } => AppError::InvalidArgument(e.to_string()),
            other => AppError::Engine(other),
        }),
        None if matches!(arg.default, Value::Number(_)) => {
            raw.parse::<serde_json::Number>().map(Value::Number).map_err(|_| {
                AppError::InvalidArgument(format!("{} expects a number, got {raw}", arg.dest()))
            })
        }
        _ => Ok(Value::String(raw.to_string())),
    }
}
