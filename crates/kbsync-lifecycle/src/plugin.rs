//! File plugins and the ordered chain that resolves them.
//!
//! The first plugin whose `can_handle` returns true owns the operation.
//! A `can_handle` error stops resolution for that operation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use kbsync_types::Settings;

use crate::context::IngestionContext;
use crate::error::SyncError;

/// Handler that takes over the lifecycle of the files it claims.
#[async_trait]
pub trait FilePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// One-time startup hook.
    async fn init(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn can_handle(&self, ctx: &IngestionContext) -> Result<bool, SyncError>;

    async fn ingest(&self, ctx: &IngestionContext) -> Result<bool, SyncError>;

    async fn uningest(&self, ctx: &IngestionContext) -> Result<bool, SyncError>;

    async fn rename(&self, ctx: &IngestionContext) -> Result<bool, SyncError>;
}

/// Builds a plugin from the application settings.
pub type PluginFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn FilePlugin>, SyncError> + Send + Sync>;

/// Named plugin constructors, resolved against configuration at startup.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn FilePlugin>, SyncError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the chain named by `settings.plugins`, in order.
    pub fn build_chain(&self, settings: &Settings) -> Result<PluginChain, SyncError> {
        let mut chain = PluginChain::new();
        for name in &settings.plugins {
            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| SyncError::Plugin(format!("unknown plugin '{}'", name)))?;
            chain.push(factory(settings)?);
        }
        Ok(chain)
    }
}

/// Ordered list of plugins consulted before the default path.
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn FilePlugin>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Arc<dyn FilePlugin>) {
        self.plugins.push(plugin);
    }

    pub fn with(mut self, plugin: Arc<dyn FilePlugin>) -> Self {
        self.push(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run every plugin's startup hook. The first failure aborts startup.
    pub async fn init_all(&self) -> Result<(), SyncError> {
        for plugin in &self.plugins {
            plugin.init().await.map_err(|e| {
                SyncError::Plugin(format!("plugin '{}' failed to initialize: {}", plugin.name(), e))
            })?;
            info!(plugin = plugin.name(), "Plugin initialized");
        }
        Ok(())
    }

    /// The first plugin claiming the file in `ctx`, if any.
    pub async fn resolve(
        &self,
        ctx: &IngestionContext,
    ) -> Result<Option<Arc<dyn FilePlugin>>, SyncError> {
        for plugin in &self.plugins {
            match plugin.can_handle(ctx).await {
                Ok(true) => return Ok(Some(Arc::clone(plugin))),
                Ok(false) => continue,
                Err(e) => {
                    error!(
                        plugin = plugin.name(),
                        path = %ctx.index_path,
                        error = %e,
                        "Plugin validation failed"
                    );
                    return Err(SyncError::PluginValidation {
                        plugin: plugin.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(None)
    }
}
