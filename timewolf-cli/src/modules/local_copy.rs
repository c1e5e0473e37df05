use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use timewolf_engine::container::File;
use timewolf_engine::{Module, ModuleArgs, ModuleContext, ModuleError, ModuleResult};
use tracing::info;
use uuid::Uuid;

/// Copies every visible [`File`] into `target_directory` and stores the copies.
///
/// Without a target a fresh directory under the system temp dir is used.
pub struct LocalFilesystemCopy {
    ctx: ModuleContext,
    target: Mutex<Option<PathBuf>>,
}

impl LocalFilesystemCopy {
    pub fn new(ctx: ModuleContext) -> Self {
        Self {
            ctx,
            target: Mutex::new(None),
        }
    }

    fn target(&self) -> ModuleResult<PathBuf> {
        self.target
            .lock()
            .clone()
            .ok_or_else(|| ModuleError::critical("target directory was not set up"))
    }
}

#[async_trait]
impl Module for LocalFilesystemCopy {
    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        let target = args
            .get::<PathBuf>("target_directory")
            .unwrap_or_else(|| std::env::temp_dir().join(format!("timewolf-{}", Uuid::new_v4())));
        tokio::fs::create_dir_all(&target).await.map_err(|e| {
            ModuleError::critical(format!(
                "An unknown error occurred creating {}: {e}",
                target.display()
            ))
        })?;
        *self.target.lock() = Some(target);
        Ok(())
    }

    async fn process(&self) -> ModuleResult {
        let target = self.target()?;
        let files = self.ctx.get_containers::<File>(false)?;

        for file in &files {
            let destination = target.join(&file.name);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&file.path, &destination).await.map_err(|e| {
                ModuleError::critical(format!("cannot copy {}: {e}", file.path.display()))
            })?;
            info!(source = %file.path.display(), destination = %destination.display(), "Copied file");
            self.ctx.store_container(
                File::new(file.name.clone(), destination)
                    .with_description(format!("Copy of {}", file.path.display())),
            )?;
        }

        self.ctx.publish_message(
            format!("{} files -> {}", files.len(), target.display()),
            false,
        );
        Ok(())
    }
}
