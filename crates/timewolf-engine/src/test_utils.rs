use std::sync::Arc;

use crate::container::ContainerManager;
use crate::module::ModuleContext;
use crate::recipe::Recipe;

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Create a standalone context for `module` over a store that parsed `recipe`.
pub fn create_test_context(recipe: &Recipe, module: &str) -> ModuleContext {
    let containers = ContainerManager::new();
    containers.parse_recipe(recipe);
    ModuleContext::standalone(module, Arc::new(containers))
}
