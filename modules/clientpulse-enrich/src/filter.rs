//! Semantic relevance filter for scraped events.
//!
//! Embeds event text and scores cosine similarity against a reference
//! keyword set. The error policy is fail-open: when a decision cannot be
//! made confidently (embedding backend down, no precomputed keywords, empty
//! keyword list), the event is kept. Over-filtering silently loses content;
//! under-filtering is recoverable downstream. Do not flip this to
//! fail-closed.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use clientpulse_common::{Event, TextEmbedder};

/// Cosine similarity between two vectors. Returns 0.0 for zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Why an event was kept or filtered, for operational dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct FilterExplanation {
    pub article_title: String,
    pub max_similarity_score: f32,
    pub matched_reference_keyword: Option<String>,
    pub threshold: f32,
    pub is_relevant: bool,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    pub reference_keywords_count: usize,
    pub precomputed_embeddings: bool,
    pub embedding_dimension: usize,
    pub threshold: f32,
}

pub struct SemanticFilter {
    embedder: Arc<dyn TextEmbedder>,
    keywords: Vec<String>,
    /// `None` when precompute failed; every decision then falls open to KEEP.
    keyword_embeddings: Option<Vec<Vec<f32>>>,
    threshold: RwLock<f32>,
}

impl SemanticFilter {
    pub async fn new(embedder: Arc<dyn TextEmbedder>, threshold: f32, keywords: Vec<String>) -> Self {
        info!(keywords = keywords.len(), "Precomputing reference keyword embeddings");

        let keyword_embeddings = match embedder.embed_batch(keywords.clone()).await {
            Ok(embeddings) => Some(embeddings),
            Err(e) => {
                error!(error = %e, "Failed to precompute keyword embeddings, filter will keep everything");
                None
            }
        };

        info!(threshold, keywords = keywords.len(), "Semantic filter initialized");
        Self {
            embedder,
            keywords,
            keyword_embeddings,
            threshold: RwLock::new(threshold),
        }
    }

    fn threshold(&self) -> f32 {
        *self.threshold.read().expect("threshold lock poisoned")
    }

    /// Replace the relevance threshold for future decisions.
    pub fn update_threshold(&self, threshold: f32) {
        *self.threshold.write().expect("threshold lock poisoned") = threshold;
    }

    /// Best-matching keyword index and its similarity score for the event's
    /// combined text. `Ok(None)` means there is nothing to score against.
    async fn best_match(&self, event: &Event) -> Result<Option<(usize, f32)>> {
        let Some(keyword_embeddings) = self.keyword_embeddings.as_ref() else {
            return Ok(None);
        };
        if keyword_embeddings.is_empty() {
            return Ok(None);
        }

        let text = combined_text(event);
        let event_embedding = self.embedder.embed(&text).await?;

        let mut best: Option<(usize, f32)> = None;
        for (idx, keyword_embedding) in keyword_embeddings.iter().enumerate() {
            let score = cosine_similarity(&event_embedding, keyword_embedding);
            if best.map_or(true, |(_, prev)| score > prev) {
                best = Some((idx, score));
            }
        }
        Ok(best)
    }

    /// Decide whether an event is relevant. Fail-open on every error path.
    pub async fn is_relevant(&self, event: &Event) -> bool {
        let title = event.title.clone().unwrap_or_default();

        match self.best_match(event).await {
            Ok(Some((_, score))) => {
                let relevant = score >= self.threshold();
                info!(title = title.as_str(), similarity = score, relevant, "Relevance decision");
                relevant
            }
            Ok(None) => {
                warn!(title = title.as_str(), "No keyword embeddings available, keeping event");
                true
            }
            Err(e) => {
                error!(title = title.as_str(), error = %e, "Semantic filtering failed, keeping event");
                true
            }
        }
    }

    /// Same decision as `is_relevant`, with the evidence attached.
    pub async fn explain(&self, event: &Event) -> FilterExplanation {
        let title = event.title.clone().unwrap_or_default();
        let threshold = self.threshold();

        match self.best_match(event).await {
            Ok(Some((idx, score))) => {
                let is_relevant = score >= threshold;
                FilterExplanation {
                    article_title: title,
                    max_similarity_score: score,
                    matched_reference_keyword: Some(self.keywords[idx].clone()),
                    threshold,
                    is_relevant,
                    decision: if is_relevant { "KEEP" } else { "FILTER_OUT" },
                    note: None,
                }
            }
            Ok(None) => FilterExplanation {
                article_title: title,
                max_similarity_score: 0.0,
                matched_reference_keyword: None,
                threshold,
                is_relevant: true,
                decision: "KEEP",
                note: Some("No keyword embeddings available".to_string()),
            },
            Err(e) => FilterExplanation {
                article_title: title,
                max_similarity_score: 0.0,
                matched_reference_keyword: None,
                threshold,
                is_relevant: true,
                decision: "KEEP",
                note: Some(format!("Filtering error: {e}")),
            },
        }
    }

    pub fn performance_stats(&self) -> FilterStats {
        let embedding_dimension = self
            .keyword_embeddings
            .as_ref()
            .and_then(|e| e.first())
            .map(Vec::len)
            .unwrap_or(0);

        FilterStats {
            reference_keywords_count: self.keywords.len(),
            precomputed_embeddings: self.keyword_embeddings.is_some(),
            embedding_dimension,
            threshold: self.threshold(),
        }
    }
}

/// Combine title and body text, falling back to whichever is present.
fn combined_text(event: &Event) -> String {
    let title = event.title.as_deref().unwrap_or("").trim();
    let text = event.text.trim();

    match (title.is_empty(), text.is_empty()) {
        (false, false) => format!("{title} {text}"),
        (false, true) => title.to_string(),
        (true, _) => text.to_string(),
    }
}
