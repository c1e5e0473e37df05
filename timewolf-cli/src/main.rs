use std::io::IsTerminal;
use std::process;
use std::sync::Arc;

use clap::ArgMatches;
#[cfg(feature = "colored-output")]
use colored::*;
use timewolf::{
    cli::{LIST_COMMAND, build_command, collect_recipe_args, parse_global_options},
    config::AppConfig,
    error::AppError,
    logging::{init_logging, log_file_path},
    modules::register_builtin_modules,
    output::{OutputManager, spawn_event_printer},
    recipes::load_recipes,
};
use timewolf_engine::container::Report;
use timewolf_engine::{
    BaseTelemetry, EventPublisher, ModuleRegistry, ModuleRunner, RecipeManager, RunnerConfig,
    Telemetry, ValidatorRegistry,
};
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Application error: {e:#}");
            #[cfg(feature = "colored-output")]
            {
                eprintln!("{} {e:#}", "Error:".red().bold());
            }
            #[cfg(not(feature = "colored-output"))]
            {
                eprintln!("Error: {e:#}");
            }
            process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let argv: Vec<std::ffi::OsString> = std::env::args_os().collect();
    let options = parse_global_options(argv.iter().cloned());

    let config = AppConfig::load(options.config.as_deref())?;
    let _guard = init_logging(options.verbose, options.quiet, config.log_filter.as_deref())?;
    info!(log_file = %log_file_path().display(), "Logging initialised");

    let recipes_dir = options.recipes_dir.clone().or_else(|| config.recipes_dir.clone());
    let recipes = load_recipes(recipes_dir.as_deref())?;

    let matches = match build_command(&recipes).try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(e) => {
            e.print()?;
            return Ok(e.exit_code());
        }
    };

    match matches.subcommand() {
        Some((LIST_COMMAND, _)) => {
            list_recipes(&recipes);
            Ok(0)
        }
        Some((name, sub_matches)) => {
            run_recipe(&recipes, name, sub_matches, &config, options.verbose).await
        }
        None => Ok(0),
    }
}

fn list_recipes(recipes: &RecipeManager) {
    println!("Available recipes:\n");
    for recipe in recipes.recipes() {
        println!("  {:<30}{}", recipe.name, recipe.short_description);
    }
}

async fn run_recipe(
    recipes: &RecipeManager,
    name: &str,
    matches: &ArgMatches,
    config: &AppConfig,
    verbose: bool,
) -> anyhow::Result<i32> {
    let recipe = recipes
        .get(name)
        .cloned()
        .ok_or_else(|| AppError::UnknownRecipe(name.to_string()))?;
    let validators = ValidatorRegistry::with_builtin();
    let args = collect_recipe_args(&recipe, matches, &config.extra, &validators)?;

    let mut registry = ModuleRegistry::new();
    register_builtin_modules(&mut registry)?;

    let colored = std::io::stderr().is_terminal();
    let telemetry = Arc::new(BaseTelemetry::new());
    let (events, rx) = EventPublisher::channel(EVENT_CHANNEL_CAPACITY);
    let printer = spawn_event_printer(rx, colored);

    let runner_config = RunnerConfig {
        max_concurrent_modules: config.max_concurrent_modules,
        config_values: config.extra.clone(),
        ..RunnerConfig::default()
    };
    let mut runner = ModuleRunner::new(runner_config, registry, telemetry.clone(), events);
    runner.initialise(recipe)?;

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no further modules will be started");
            token.cancel();
        }
    });

    let report = runner.run(args).await?;
    let reports = runner.containers().snapshot::<Report>();
    // Closes the event channel so the printer drains and stops.
    drop(runner);
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer failed");
    }

    let output = OutputManager::new(colored);
    print!("{}", output.format_reports(&reports));
    eprint!("{}", output.format_error_summary(&report));
    if verbose {
        eprintln!("{}", telemetry.format_telemetry());
    }

    info!(
        recipe = %report.recipe,
        exit_code = report.exit_code(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Recipe finished"
    );
    Ok(report.exit_code())
}
