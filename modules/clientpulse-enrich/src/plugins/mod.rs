pub mod linkedin;
pub mod registry;
pub mod rss;

pub use registry::{default_registry, PluginRegistry};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use clientpulse_common::{Event, FetchArgs};

use crate::limits::GlobalJobLimiter;

// --- ScrapePlugin trait ---

/// Contract every data-source adapter implements. Plugins validate their own
/// typed configuration at construction and fail fast on malformed input.
#[async_trait]
pub trait ScrapePlugin: Send + Sync {
    async fn fetch(&self, args: &FetchArgs) -> Result<Vec<Event>>;
    fn name(&self) -> &str;
}

/// Shared services handed to plugin factories. Built once at startup and
/// passed explicitly; plugins never reach for process globals.
#[derive(Clone)]
pub struct PluginDeps {
    pub job_limiter: Arc<GlobalJobLimiter>,
}
