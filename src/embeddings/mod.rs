// src/embeddings/mod.rs
// Embedding provider module

mod ollama;
mod openai;

pub use self::ollama::OllamaEmbeddings;
pub use self::openai::OpenAiEmbeddings;

use crate::config::{ApiKeys, EmbedderConfig};
use crate::db::EMBEDDING_DIM;
use anyhow::Result;
use tracing::info;

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    OpenAi(OpenAiEmbeddings),
    Ollama(OllamaEmbeddings),
}

/// Embedding client with provider selection from config.
///
/// Absence of a configured embedder is a supported mode: the memory store
/// degrades to keyword-only search and skips write-time deduplication.
pub struct Embedder {
    backend: EmbeddingBackend,
}

impl Embedder {
    /// Build from config. `EMBEDDER_PROVIDER` picks the backend explicitly;
    /// otherwise OpenAI (API key present) beats Ollama (host present).
    pub fn from_config(api_keys: &ApiKeys, config: &EmbedderConfig) -> Option<Self> {
        match config.provider.as_deref() {
            Some("openai") => {
                let key = api_keys.openai.clone()?;
                Some(Self::openai(key, config))
            }
            Some("ollama") => {
                let host = config
                    .url
                    .clone()
                    .or_else(|| api_keys.ollama.clone())
                    .unwrap_or_else(|| "http://localhost:11434".into());
                Some(Self::ollama(host, config))
            }
            Some(other) => {
                tracing::warn!(provider = other, "Unknown EMBEDDER_PROVIDER, embeddings disabled");
                None
            }
            None => {
                if let Some(key) = api_keys.openai.clone() {
                    Some(Self::openai(key, config))
                } else if let Some(host) = api_keys.ollama.clone() {
                    Some(Self::ollama(host, config))
                } else {
                    None
                }
            }
        }
    }

    fn openai(api_key: String, config: &EmbedderConfig) -> Self {
        let client = OpenAiEmbeddings::new(api_key, config.model.clone(), config.url.clone());
        info!(model = client.model_name(), "Using OpenAI embeddings");
        Self {
            backend: EmbeddingBackend::OpenAi(client),
        }
    }

    fn ollama(host: String, config: &EmbedderConfig) -> Self {
        let client = OllamaEmbeddings::new(host, config.model.clone());
        info!(model = client.model_name(), "Using Ollama embeddings");
        Self {
            backend: EmbeddingBackend::Ollama(client),
        }
    }

    /// Fixed embedding dimension for the memory store's vector tables.
    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Model name for display/logging
    pub fn model_name(&self) -> String {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.model_name().to_string(),
            EmbeddingBackend::Ollama(c) => c.model_name().to_string(),
        }
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.embed(text).await?,
            EmbeddingBackend::Ollama(c) => c.embed(text).await?,
        };
        if embedding.len() != EMBEDDING_DIM {
            anyhow::bail!(
                "embedding dimension mismatch: got {}, store expects {}",
                embedding.len(),
                EMBEDDING_DIM
            );
        }
        Ok(embedding)
    }
}
