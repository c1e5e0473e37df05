use std::path::Path;

use timewolf_engine::{Recipe, RecipeManager};
use tracing::{debug, warn};

use crate::error::Result;

/// Recipes compiled into the binary.
const BUILTIN_RECIPES: &[&str] = &[include_str!("../../data/recipes/local_grep.json")];

/// Recipes from `dir` (when it exists), then any built-in recipe whose name
/// the directory did not already provide.
pub fn load_recipes(dir: Option<&Path>) -> Result<RecipeManager> {
    let mut manager = RecipeManager::new();
    match dir {
        Some(dir) if dir.is_dir() => {
            let loaded = manager.load_dir(dir)?;
            debug!(dir = %dir.display(), loaded, "Loaded recipes");
        }
        Some(dir) => warn!(dir = %dir.display(), "Recipes directory does not exist"),
        None => {}
    }

    for json in BUILTIN_RECIPES {
        let recipe = Recipe::from_json(json)?;
        if manager.get(&recipe.name).is_none() {
            manager.register(recipe)?;
        }
    }
    Ok(manager)
}
