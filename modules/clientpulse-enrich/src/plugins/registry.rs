use std::collections::HashMap;

use anyhow::{anyhow, Result};
use tracing::{error, info};

use clientpulse_common::SourceConfig;

use super::{linkedin::LinkedInPlugin, rss::RssPlugin, PluginDeps, ScrapePlugin};

type PluginFactory =
    Box<dyn Fn(&SourceConfig, &PluginDeps) -> Result<Box<dyn ScrapePlugin>> + Send + Sync>;

/// Explicit plugin directory: maps a `plugin_type` string to a constructor.
/// Built at startup and passed to the pipeline, so which plugins exist is
/// visible at the call site rather than hidden in registration side effects.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, plugin_type: &str, factory: F)
    where
        F: Fn(&SourceConfig, &PluginDeps) -> Result<Box<dyn ScrapePlugin>> + Send + Sync + 'static,
    {
        self.factories
            .insert(plugin_type.to_string(), Box::new(factory));
    }

    pub fn plugin_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Create one plugin. Returns `None` for disabled configs; unknown types
    /// and failed constructions are errors.
    pub fn create(
        &self,
        config: &SourceConfig,
        deps: &PluginDeps,
    ) -> Result<Option<Box<dyn ScrapePlugin>>> {
        if !config.enabled {
            info!(plugin = config.name.as_str(), "Plugin disabled, skipping");
            return Ok(None);
        }

        let factory = self.factories.get(&config.plugin_type).ok_or_else(|| {
            anyhow!(
                "unknown plugin type '{}' (available: {:?})",
                config.plugin_type,
                self.plugin_types()
            )
        })?;

        let plugin = factory(config, deps)
            .map_err(|e| anyhow!("failed to initialize plugin '{}': {e}", config.name))?;
        Ok(Some(plugin))
    }

    /// Create every enabled plugin from a config batch. A bad config is
    /// logged and skipped; it never aborts the rest of the batch.
    pub fn create_all(
        &self,
        configs: &[SourceConfig],
        deps: &PluginDeps,
    ) -> Vec<Box<dyn ScrapePlugin>> {
        let mut plugins = Vec::new();

        for config in configs {
            match self.create(config, deps) {
                Ok(Some(plugin)) => {
                    info!(plugin = config.name.as_str(), "Plugin created");
                    plugins.push(plugin);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(plugin = config.name.as_str(), error = %e, "Skipping plugin");
                }
            }
        }

        plugins
    }
}

/// Registry with the built-in plugin set.
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register("linkedin", |config, deps| {
        Ok(Box::new(LinkedInPlugin::from_source(config, deps)?))
    });
    registry.register("rss", |config, _deps| {
        Ok(Box::new(RssPlugin::from_source(config)?))
    });
    registry
}
