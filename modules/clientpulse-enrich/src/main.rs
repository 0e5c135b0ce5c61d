use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clientpulse_common::{load_sources, FetchArgs};
use clientpulse_enrich::embedder::HttpEmbedder;
use clientpulse_enrich::filter::SemanticFilter;
use clientpulse_enrich::limits::GlobalJobLimiter;
use clientpulse_enrich::pipeline::{PluginOutcome, ScrapePipeline};
use clientpulse_enrich::plugins::{default_registry, PluginDeps};

#[derive(Parser)]
#[command(name = "clientpulse", about = "Client intelligence scraping pipeline")]
struct Cli {
    /// Path to the YAML sources file
    #[arg(long, default_value = "./config/sources.yaml")]
    config: PathBuf,

    /// Company to research
    #[arg(long)]
    company: String,

    /// City the company operates in
    #[arg(long, default_value = "")]
    city: String,

    /// Skip fetching company posts
    #[arg(long)]
    skip_posts: bool,

    /// Skip fetching the company profile
    #[arg(long)]
    skip_profile: bool,

    /// Relevance threshold for semantic filtering of articles
    #[arg(long, default_value_t = 0.75)]
    threshold: f32,

    /// Reference keywords for semantic filtering; no keywords disables it
    #[arg(long = "keyword")]
    keywords: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(config = %cli.config.display(), "Loading sources");
    let sources = load_sources(&cli.config)
        .with_context(|| format!("Failed to load sources from {}", cli.config.display()))?;

    let deps = PluginDeps {
        job_limiter: Arc::new(GlobalJobLimiter::from_env()),
    };

    let registry = default_registry();
    let mut pipeline = ScrapePipeline::new();
    pipeline.load_plugins(&registry, &sources, &deps);
    info!(plugins = ?pipeline.plugin_names(), "Pipeline ready");

    let args = FetchArgs {
        company_name: cli.company,
        city: cli.city,
        fetch_posts: !cli.skip_posts,
        fetch_profile: !cli.skip_profile,
    };
    let mut results = pipeline.run(&args).await?;

    if !cli.keywords.is_empty() {
        let api_key = std::env::var("EMBEDDING_API_KEY")
            .context("EMBEDDING_API_KEY is required when --keyword is given")?;
        let mut embedder = HttpEmbedder::new(&api_key);
        if let Ok(base_url) = std::env::var("EMBEDDING_API_URL") {
            embedder = embedder.with_base_url(&base_url);
        }

        let filter =
            SemanticFilter::new(Arc::new(embedder), cli.threshold, cli.keywords).await;

        for (plugin, outcome) in results.iter_mut() {
            let PluginOutcome::Events(events) = outcome else {
                continue;
            };
            let before = events.len();
            let mut kept = Vec::with_capacity(before);
            for event in events.drain(..) {
                if filter.is_relevant(&event).await {
                    kept.push(event);
                }
            }
            if kept.len() < before {
                warn!(
                    plugin = plugin.as_str(),
                    kept = kept.len(),
                    filtered = before - kept.len(),
                    "Filtered irrelevant events"
                );
            }
            *events = kept;
        }

        info!(stats = ?filter.performance_stats(), "Semantic filter stats");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
