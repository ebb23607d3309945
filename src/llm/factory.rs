// src/llm/factory.rs
// Provider factory: builds vendor clients from configuration and hands the
// agent loop its active and fallback clients.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ApiKeys, Config};

use super::claude::ClaudeClient;
use super::fallback::remaining_candidates;
use super::kimi::KimiClient;
use super::ollama::{discover_local_model, OllamaClient};
use super::openai::OpenAiClient;
use super::provider::{LlmClient, Provider};

/// Factory for creating LLM provider clients.
pub struct ProviderFactory {
    api_keys: ApiKeys,
    preferred: Option<Provider>,
    /// Model override, applied to the preferred provider only (LLM_MODEL).
    model_override: Option<String>,
    /// Local models acceptable as a degraded fallback.
    ollama_fallback_models: Vec<String>,
}

impl ProviderFactory {
    pub fn from_config(config: &Config) -> Self {
        let preferred = config
            .llm_provider
            .as_deref()
            .and_then(Provider::from_str);
        if let Some(p) = preferred {
            info!(provider = %p, "Preferred LLM provider configured");
        }

        Self {
            api_keys: config.api_keys.clone(),
            preferred,
            model_override: config.llm_model.clone(),
            ollama_fallback_models: config.ollama_fallback_models.clone(),
        }
    }

    /// Providers with credentials present (Ollama counts when a host is set;
    /// its model discovery happens at selection time).
    pub fn configured_providers(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        if self.api_keys.kimi.is_some() {
            providers.push(Provider::Kimi);
        }
        if self.api_keys.anthropic.is_some() {
            providers.push(Provider::Claude);
        }
        if self.api_keys.openai.is_some() {
            providers.push(Provider::OpenAi);
        }
        if self.api_keys.ollama.is_some() {
            providers.push(Provider::Ollama);
        }
        providers
    }

    /// Build a client for a specific provider, or None when it is not
    /// usable (missing key; no suitable local model for Ollama).
    pub async fn client_for(&self, provider: Provider) -> Option<Arc<dyn LlmClient>> {
        let model = if self.preferred == Some(provider) {
            self.model_override.clone()
        } else {
            None
        };

        match provider {
            Provider::Kimi => self.api_keys.kimi.as_ref().map(|key| {
                Arc::new(KimiClient::with_model(
                    key.clone(),
                    model.unwrap_or_else(|| provider.default_model().into()),
                )) as Arc<dyn LlmClient>
            }),
            Provider::Claude => self.api_keys.anthropic.as_ref().map(|key| {
                Arc::new(ClaudeClient::with_model(
                    key.clone(),
                    model.unwrap_or_else(|| provider.default_model().into()),
                )) as Arc<dyn LlmClient>
            }),
            Provider::OpenAi => self.api_keys.openai.as_ref().map(|key| {
                Arc::new(OpenAiClient::with_model(
                    key.clone(),
                    model.unwrap_or_else(|| provider.default_model().into()),
                )) as Arc<dyn LlmClient>
            }),
            Provider::Ollama => {
                let host = self.api_keys.ollama.as_ref()?;
                let local =
                    discover_local_model(host, &self.ollama_fallback_models).await?;
                info!(model = %local, "Local Ollama model selected");
                Some(Arc::new(OllamaClient::with_model(host.clone(), local))
                    as Arc<dyn LlmClient>)
            }
        }
    }

    /// The client to start a request with: the configured preference, or
    /// the first usable provider in fallback order.
    pub async fn primary_client(&self) -> Option<Arc<dyn LlmClient>> {
        if let Some(provider) = self.preferred {
            if let Some(client) = self.client_for(provider).await {
                return Some(client);
            }
            warn!(provider = %provider, "Preferred provider not usable, falling through");
        }
        self.next_fallback(&[]).await.map(|(_, client)| client)
    }

    /// The next fallback candidate after the given failed providers.
    pub async fn next_fallback(
        &self,
        failed: &[Provider],
    ) -> Option<(Provider, Arc<dyn LlmClient>)> {
        for provider in remaining_candidates(failed) {
            if let Some(client) = self.client_for(provider).await {
                return Some((provider, client));
            }
        }
        None
    }

    /// A cheap client for background extraction and summarization.
    /// Hosted small-model providers first; the big models are a last resort.
    pub async fn extractor_client(&self) -> Option<Arc<dyn LlmClient>> {
        for provider in [
            Provider::Kimi,
            Provider::OpenAi,
            Provider::Claude,
            Provider::Ollama,
        ] {
            if let Some(client) = self.client_for(provider).await {
                return Some(client);
            }
        }
        None
    }
}
