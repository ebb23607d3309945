// src/embeddings/ollama.rs
// Ollama embeddings via OpenAI-compatible /v1/embeddings endpoint

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Default Ollama embedding model (768 dimensions, matching the store)
const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Max characters to embed (conservative limit for local models)
const MAX_TEXT_CHARS: usize = 8192 * 4;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Ollama embeddings client (no auth required)
pub struct OllamaEmbeddings {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaEmbeddings {
    pub fn new(base_url: String, model: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http_client,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let truncated: String = text.chars().take(MAX_TEXT_CHARS).collect();
        let url = format!("{}/v1/embeddings", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "model": self.model, "input": truncated }))
            .send()
            .await
            .context("Ollama embeddings request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embeddings error {}: {}", status, error_body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse Ollama embeddings response")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response from Ollama"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = OllamaEmbeddings::new("http://localhost:11434/".into(), None);
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model_name(), "nomic-embed-text");
    }
}
