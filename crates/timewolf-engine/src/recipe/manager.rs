//! Recipe catalogue.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use super::Recipe;
use crate::error::{Error, Result};

/// Registered recipes, keyed by lowercase name.
#[derive(Debug, Default, Clone)]
pub struct RecipeManager {
    recipes: HashMap<String, Recipe>,
}

impl RecipeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, recipe: Recipe) -> Result<()> {
        let key = recipe.name.to_lowercase();
        if self.recipes.contains_key(&key) {
            return Err(Error::recipe(format!(
                "recipe already set for name: {}",
                recipe.name
            )));
        }
        self.recipes.insert(key, recipe);
        Ok(())
    }

    pub fn register_all(&mut self, recipes: impl IntoIterator<Item = Recipe>) -> Result<()> {
        recipes.into_iter().try_for_each(|r| self.register(r))
    }

    pub fn deregister(&mut self, name: &str) -> Result<Recipe> {
        self.recipes
            .remove(&name.to_lowercase())
            .ok_or_else(|| Error::recipe(format!("recipe not set for name: {name}")))
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(&name.to_lowercase())
    }

    /// All recipes sorted by name.
    pub fn recipes(&self) -> Vec<&Recipe> {
        let mut recipes: Vec<&Recipe> = self.recipes.values().collect();
        recipes.sort_by(|a, b| a.name.cmp(&b.name));
        recipes
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Register every `*.json` recipe found directly in `dir`.
    ///
    /// Returns how many recipes were loaded. A malformed file fails the
    /// whole load.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let json = std::fs::read_to_string(&path)?;
            let recipe = Recipe::from_json(&json)
                .map_err(|e| Error::recipe(format!("{}: {e}", path.display())))?;
            debug!(recipe = %recipe.name, path = %path.display(), "Loaded recipe");
            self.register(recipe)?;
            loaded += 1;
        }

        if loaded == 0 {
            warn!(dir = %dir.display(), "No recipes found");
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_case_insensitive() {
        let mut manager = RecipeManager::new();
        manager.register(Recipe::new("Local_Grep")).unwrap();

        assert!(manager.get("local_grep").is_some());
        assert!(manager.register(Recipe::new("local_grep")).is_err());

        manager.deregister("LOCAL_GREP").unwrap();
        assert!(manager.is_empty());
        assert!(manager.deregister("local_grep").is_err());
    }

    #[test]
    fn test_recipes_sorted_by_name() {
        let mut manager = RecipeManager::new();
        manager
            .register_all([Recipe::new("zeta"), Recipe::new("alpha"), Recipe::new("mid")])
            .unwrap();
        let names: Vec<&str> = manager.recipes().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("one.json"),
            r#"{ "name": "one", "modules": [] }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("two.json"),
            r#"{ "name": "two", "modules": [{ "name": "A" }] }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a recipe").unwrap();

        let mut manager = RecipeManager::new();
        assert_eq!(manager.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(manager.get("two").unwrap().modules[0].name, "A");
    }

    #[test]
    fn test_load_dir_rejects_malformed_recipe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ nope").unwrap();

        let mut manager = RecipeManager::new();
        let err = manager.load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::RecipeParse(msg) if msg.contains("bad.json")));
    }
}
