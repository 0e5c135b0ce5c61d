pub mod config;
pub mod embed;
pub mod error;
pub mod types;

pub use config::{load_sources, JobLimiterSettings, SourceConfig};
pub use embed::{NoOpEmbedder, TextEmbedder};
pub use error::EnrichError;
pub use types::{Event, FetchArgs};
