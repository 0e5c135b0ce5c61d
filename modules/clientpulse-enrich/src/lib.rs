pub mod embedder;
pub mod filter;
pub mod limits;
pub mod pipeline;
pub mod plugins;
