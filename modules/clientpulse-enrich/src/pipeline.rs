//! Pipeline orchestration: run every loaded plugin for one query and
//! aggregate successes and per-plugin failures into a single result map.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info};

use clientpulse_common::{EnrichError, Event, FetchArgs, SourceConfig};

use crate::plugins::{PluginDeps, PluginRegistry, ScrapePlugin};

/// One plugin's contribution to a run. Serializes as either a list of
/// events or `{"error": "..."}` under the plugin's name.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PluginOutcome {
    Events(Vec<Event>),
    Error { error: String },
}

#[derive(Default)]
pub struct ScrapePipeline {
    plugins: Vec<Box<dyn ScrapePlugin>>,
}

impl ScrapePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the active plugin set from configuration.
    pub fn load_plugins(
        &mut self,
        registry: &PluginRegistry,
        sources: &[SourceConfig],
        deps: &PluginDeps,
    ) {
        self.plugins = registry.create_all(sources, deps);
        info!(count = self.plugins.len(), "Loaded active plugins");
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Execute all plugins for one query. A plugin failure is recorded
    /// under its name; sibling plugins always run to completion, so the
    /// result map covers every loaded plugin.
    pub async fn run(
        &self,
        args: &FetchArgs,
    ) -> Result<BTreeMap<String, PluginOutcome>, EnrichError> {
        if self.plugins.is_empty() {
            return Err(EnrichError::Pipeline(
                "plugins are not loaded; call load_plugins() before run()".into(),
            ));
        }

        info!(
            company = args.company_name.as_str(),
            city = args.city.as_str(),
            "Starting pipeline"
        );

        let mut results = BTreeMap::new();
        for plugin in &self.plugins {
            info!(plugin = plugin.name(), "Running plugin");
            let outcome = match plugin.fetch(args).await {
                Ok(events) => {
                    info!(plugin = plugin.name(), events = events.len(), "Plugin completed");
                    PluginOutcome::Events(events)
                }
                Err(e) => {
                    error!(plugin = plugin.name(), error = %e, "Plugin failed");
                    PluginOutcome::Error {
                        error: e.to_string(),
                    }
                }
            };
            results.insert(plugin.name().to_string(), outcome);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;

    struct StaticPlugin {
        name: String,
        events: usize,
    }

    #[async_trait]
    impl ScrapePlugin for StaticPlugin {
        async fn fetch(&self, _args: &FetchArgs) -> anyhow::Result<Vec<Event>> {
            Ok((0..self.events)
                .map(|i| Event {
                    source: "test".to_string(),
                    source_type: "test".to_string(),
                    title: None,
                    text: format!("event {i}"),
                    url: None,
                    published_at: None,
                    profile_data: None,
                })
                .collect())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct FailingPlugin;

    #[async_trait]
    impl ScrapePlugin for FailingPlugin {
        async fn fetch(&self, _args: &FetchArgs) -> anyhow::Result<Vec<Event>> {
            bail!("session cookie expired")
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn pipeline_with(plugins: Vec<Box<dyn ScrapePlugin>>) -> ScrapePipeline {
        let mut pipeline = ScrapePipeline::new();
        pipeline.plugins = plugins;
        pipeline
    }

    #[tokio::test]
    async fn run_without_loaded_plugins_is_an_error() {
        let pipeline = ScrapePipeline::new();
        assert!(pipeline.run(&FetchArgs::default()).await.is_err());
    }

    #[tokio::test]
    async fn one_failing_plugin_does_not_abort_the_run() {
        let pipeline = pipeline_with(vec![
            Box::new(StaticPlugin {
                name: "healthy".to_string(),
                events: 2,
            }),
            Box::new(FailingPlugin),
        ]);

        let results = pipeline.run(&FetchArgs::default()).await.unwrap();
        assert_eq!(results.len(), 2);

        match &results["healthy"] {
            PluginOutcome::Events(events) => assert_eq!(events.len(), 2),
            PluginOutcome::Error { .. } => panic!("healthy plugin should not error"),
        }
        match &results["broken"] {
            PluginOutcome::Error { error } => assert!(error.contains("session cookie")),
            PluginOutcome::Events(_) => panic!("broken plugin should error"),
        }
    }

    #[tokio::test]
    async fn outcomes_serialize_to_the_wire_shape() {
        let pipeline = pipeline_with(vec![Box::new(FailingPlugin)]);
        let results = pipeline.run(&FetchArgs::default()).await.unwrap();

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(
            json["broken"]["error"].as_str(),
            Some("session cookie expired")
        );
    }
}
