use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use timewolf_engine::container::{Directory, File};
use timewolf_engine::{Module, ModuleArgs, ModuleContext, ModuleError, ModuleResult};
use tracing::debug;

/// Collects local paths given as a comma separated `paths` argument.
///
/// Files become [`File`] containers. A directory becomes a [`Directory`]
/// container plus one [`File`] per regular file beneath it, named by its
/// path relative to the directory's parent.
pub struct FilesystemCollector {
    ctx: ModuleContext,
    paths: Mutex<Vec<PathBuf>>,
}

impl FilesystemCollector {
    pub fn new(ctx: ModuleContext) -> Self {
        Self {
            ctx,
            paths: Mutex::new(Vec::new()),
        }
    }

    async fn collect(&self, path: &Path) -> ModuleResult<usize> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(_) => {
                self.ctx.record_error(ModuleError::non_critical(format!(
                    "Path {} does not exist",
                    path.display()
                )));
                return Ok(0);
            }
        };

        if !metadata.is_dir() {
            self.ctx.store_container(File::new(file_name(path), path))?;
            return Ok(1);
        }

        self.ctx
            .store_container(Directory::new(file_name(path), path))?;
        let base = path.parent().unwrap_or(path);
        let files = files_under(path).await?;
        debug!(directory = %path.display(), count = files.len(), "Walked directory");
        for file in &files {
            let name = file
                .strip_prefix(base)
                .unwrap_or(file)
                .to_string_lossy()
                .into_owned();
            self.ctx.store_container(File::new(name, file))?;
        }
        Ok(files.len() + 1)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Every regular file below `root`, sorted.
pub(crate) async fn files_under(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl Module for FilesystemCollector {
    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        let paths: Vec<PathBuf> = args
            .get_str("paths")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        if paths.is_empty() {
            return Err(ModuleError::critical(
                "No `paths` argument provided in recipe, bailing",
            ));
        }
        *self.paths.lock() = paths;
        Ok(())
    }

    async fn process(&self) -> ModuleResult {
        let paths = self.paths.lock().clone();
        let mut collected = 0;
        for path in &paths {
            collected += self.collect(path).await?;
        }
        if collected == 0 {
            return Err(ModuleError::critical("No valid paths collected, bailing"));
        }
        self.ctx
            .publish_message(format!("Collected {collected} paths"), false);
        Ok(())
    }
}
