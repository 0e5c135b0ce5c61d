//! HTTP text embedder against an OpenAI-compatible embeddings endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use clientpulse_common::TextEmbedder;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn request_embeddings(&self, input: serde_json::Value) -> Result<EmbeddingResponse> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(model = %self.model, "Embedding request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&EmbeddingRequest {
                model: self.model.clone(),
                input,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Embedding API error ({}): {}", status, error_text));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TextEmbedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .request_embeddings(serde_json::Value::String(text.to_string()))
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let input = serde_json::Value::Array(
            texts.into_iter().map(serde_json::Value::String).collect(),
        );
        let response = self.request_embeddings(input).await?;

        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_provider_shape() {
        let raw = r#"{
            "object": "list",
            "data": [
                {"object": "embedding", "index": 0, "embedding": [0.1, 0.2]},
                {"object": "embedding", "index": 1, "embedding": [0.3, 0.4]}
            ],
            "model": "text-embedding-3-small"
        }"#;

        let parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[1].embedding, vec![0.3, 0.4]);
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let embedder = HttpEmbedder::new("k").with_base_url("https://llm.internal/v1/");
        assert_eq!(embedder.base_url, "https://llm.internal/v1");
    }
}
