// src/embeddings/openai.rs
// OpenAI embeddings API client (dimensions pinned to the store's 768)

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Default model; supports the `dimensions` request parameter.
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Max characters to embed (truncate longer text)
const MAX_TEXT_CHARS: usize = 8000;

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Default API endpoint
const API_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    url: String,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, model: Option<String>, url: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            url: url.unwrap_or_else(|| API_URL.to_string()),
            http_client,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a single text, requesting the store's fixed dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let truncated = truncate_chars(text, MAX_TEXT_CHARS);

        let body = json!({
            "model": self.model,
            "input": truncated,
            "dimensions": crate::db::EMBEDDING_DIM,
        });

        let response = self
            .http_client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("OpenAI embeddings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embeddings error {}: {}", status, error_body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI embeddings response")?;

        debug!(model = %self.model, "Embedded {} chars", truncated.len());

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response from OpenAI"))
    }
}

/// Truncate at a char boundary without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
