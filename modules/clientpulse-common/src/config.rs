use std::env;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::EnrichError;

/// Declarative configuration for one data source. The `config` value is
/// opaque here; each plugin deserializes and validates it into its own
/// typed schema at construction.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub plugin_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceConfig>,
}

/// Load the source list from a YAML config file.
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<SourceConfig>, EnrichError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EnrichError::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed: SourcesFile = serde_yaml::from_str(&raw)
        .map_err(|e| EnrichError::Config(format!("invalid config {}: {e}", path.display())))?;
    Ok(parsed.sources)
}

const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;
const DEFAULT_MIN_DELAY_BETWEEN_JOBS: f64 = 0.0;

/// Settings for the process-wide job limiter. Always resolves to something
/// usable: malformed or out-of-range values fall back to safe defaults with
/// a warning rather than failing startup.
#[derive(Debug, Clone)]
pub struct JobLimiterSettings {
    pub max_concurrent_jobs: usize,
    pub min_delay_between_jobs: f64,
}

impl Default for JobLimiterSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            min_delay_between_jobs: DEFAULT_MIN_DELAY_BETWEEN_JOBS,
        }
    }
}

impl JobLimiterSettings {
    /// Read `MAX_CONCURRENT_JOBS` / `MIN_DELAY_BETWEEN_JOBS` from the
    /// environment, sanitizing each field independently.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent_jobs = match env::var("MAX_CONCURRENT_JOBS") {
            Ok(raw) => match raw.parse::<i64>() {
                Ok(n) if n >= 1 => n as usize,
                Ok(n) => {
                    warn!(
                        got = n,
                        fallback = defaults.max_concurrent_jobs,
                        "MAX_CONCURRENT_JOBS must be >= 1, using default"
                    );
                    defaults.max_concurrent_jobs
                }
                Err(e) => {
                    warn!(error = %e, "MAX_CONCURRENT_JOBS is not a number, using default");
                    defaults.max_concurrent_jobs
                }
            },
            Err(_) => defaults.max_concurrent_jobs,
        };

        let min_delay_between_jobs = match env::var("MIN_DELAY_BETWEEN_JOBS") {
            Ok(raw) => match raw.parse::<f64>() {
                Ok(d) if d >= 0.0 => d,
                Ok(d) => {
                    warn!(
                        got = d,
                        fallback = defaults.min_delay_between_jobs,
                        "MIN_DELAY_BETWEEN_JOBS must be >= 0, using default"
                    );
                    defaults.min_delay_between_jobs
                }
                Err(e) => {
                    warn!(error = %e, "MIN_DELAY_BETWEEN_JOBS is not a number, using default");
                    defaults.min_delay_between_jobs
                }
            },
            Err(_) => defaults.min_delay_between_jobs,
        };

        Self {
            max_concurrent_jobs,
            min_delay_between_jobs,
        }
    }
}
