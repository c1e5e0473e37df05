use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use timewolf_engine::container::{File, Report};
use timewolf_engine::{ModuleArgs, ModuleContext, ModuleError, ModuleResult, ThreadAwareModule};
use tracing::debug;

/// Searches collected files for `keywords`, a case-insensitive regex
/// (typically `a|b|c`). Emits one [`Report`] per file with matches.
pub struct GrepperSearch {
    ctx: ModuleContext,
    keywords: RwLock<Option<Regex>>,
    matched_files: AtomicUsize,
}

impl GrepperSearch {
    pub fn new(ctx: ModuleContext) -> Self {
        Self {
            ctx,
            keywords: RwLock::new(None),
            matched_files: AtomicUsize::new(0),
        }
    }

    fn matches(&self, text: &str) -> ModuleResult<BTreeSet<String>> {
        let keywords = self.keywords.read();
        let regex = keywords
            .as_ref()
            .ok_or_else(|| ModuleError::critical("keywords were not set up"))?;
        Ok(regex
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect())
    }
}

#[async_trait]
impl ThreadAwareModule for GrepperSearch {
    type Item = File;

    async fn set_up(&self, args: &ModuleArgs) -> ModuleResult {
        let pattern: String = args.require("keywords")?;
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ModuleError::critical(format!("invalid keywords {pattern}: {e}")))?;
        *self.keywords.write() = Some(regex);
        Ok(())
    }

    async fn process(&self, file: Arc<File>) -> ModuleResult {
        let content = tokio::fs::read(&file.path).await.map_err(|e| {
            ModuleError::critical(format!("cannot read {}: {e}", file.path.display()))
        })?;
        let found = self.matches(&String::from_utf8_lossy(&content))?;
        debug!(file = %file.path.display(), matches = found.len(), "Searched file");
        if found.is_empty() {
            return Ok(());
        }

        let keywords: Vec<&str> = found.iter().map(String::as_str).collect();
        let line = format!("{}:{}", file.path.display(), keywords.join(","));
        self.ctx.publish_message(line.clone(), false);
        self.matched_files.fetch_add(1, Ordering::Relaxed);
        self.ctx
            .store_container(Report::new(self.ctx.name(), line))
    }

    async fn post_process(&self) -> ModuleResult {
        let matched = self.matched_files.load(Ordering::Relaxed);
        self.ctx.log_telemetry("matched_files", matched);
        self.ctx
            .publish_message(format!("{matched} files matched"), false);
        Ok(())
    }

    fn keep_threaded_containers_in_state(&self) -> bool {
        // Files stay available to other consumers such as LocalFilesystemCopy.
        true
    }
}
