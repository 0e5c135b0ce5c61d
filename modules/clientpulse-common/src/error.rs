use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
