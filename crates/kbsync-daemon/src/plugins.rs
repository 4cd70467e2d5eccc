//! Built-in file plugins.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use kbsync_lifecycle::{FilePlugin, IngestionContext, PluginRegistry, SyncError};
use kbsync_types::Settings;

/// Claims editor lock files, hidden files and partial downloads so they
/// never reach the knowledge index.
pub struct IgnoredFilesPlugin;

impl IgnoredFilesPlugin {
    pub const NAME: &'static str = "ignored-files";

    pub fn is_ignored(file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        lower.starts_with('.')
            || lower.starts_with("~$")
            || lower.ends_with('~')
            || lower.ends_with(".tmp")
            || lower.ends_with(".partial")
            || lower.ends_with(".crdownload")
    }

    fn skip(&self, op: &str, ctx: &IngestionContext) -> Result<bool, SyncError> {
        debug!(op, path = %ctx.index_path, "Skipping ignored file");
        Ok(true)
    }
}

#[async_trait]
impl FilePlugin for IgnoredFilesPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn can_handle(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        Ok(Self::is_ignored(&ctx.file_name()))
    }

    async fn ingest(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.skip("ingest", ctx)
    }

    async fn uningest(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.skip("uningest", ctx)
    }

    async fn rename(&self, ctx: &IngestionContext) -> Result<bool, SyncError> {
        self.skip("rename", ctx)
    }
}

/// Registry of every plugin shipped with the daemon.
pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(IgnoredFilesPlugin::NAME, |_settings: &Settings| {
        Ok(Arc::new(IgnoredFilesPlugin) as Arc<dyn FilePlugin>)
    });
    registry
}
