// src/llm/ollama.rs
// Ollama API client via OpenAI-compatible endpoint (local LLM), plus
// discovery of already-present local models for the degraded fallback.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::http_client::LlmHttpClient;
use super::openai_compat::{parse_chat_response, ChatRequest};
use super::provider::{LlmClient, Provider};
use super::{Capabilities, ChatResult, Message, Tool};

/// Normalize Ollama base URL by stripping trailing slashes and /v1 suffix
fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim_end_matches('/').to_string();
    if url.ends_with("/v1") {
        url.truncate(url.len() - 3);
    }
    url
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Models already pulled on the local Ollama instance.
///
/// Never triggers a pull: a missing model simply means Ollama is not an
/// eligible fallback.
pub async fn list_local_models(base_url: &str) -> Result<Vec<String>> {
    let base = normalize_base_url(base_url);
    let url = format!("{}/api/tags", base);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let response: TagsResponse = client.get(&url).send().await?.json().await?;
    Ok(response.models.into_iter().map(|m| m.name).collect())
}

/// Pick the first preferred model that is already present locally.
/// Tags carry a `:latest`-style suffix; match on the base name.
pub fn pick_local_model(available: &[String], preferences: &[String]) -> Option<String> {
    for preferred in preferences {
        for tag in available {
            let base = tag.split(':').next().unwrap_or(tag);
            if base == preferred || tag == preferred {
                return Some(tag.clone());
            }
        }
    }
    None
}

/// Discover a usable local model, or None when Ollama is unreachable or
/// holds nothing from the preference list.
pub async fn discover_local_model(base_url: &str, preferences: &[String]) -> Option<String> {
    match list_local_models(base_url).await {
        Ok(models) => pick_local_model(&models, preferences),
        Err(e) => {
            debug!("Ollama tags endpoint unreachable: {}", e);
            None
        }
    }
}

/// Ollama API client (OpenAI-compatible endpoint, no auth required)
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: LlmHttpClient,
}

impl OllamaClient {
    pub fn with_model(base_url: String, model: String) -> Self {
        Self {
            base_url: normalize_base_url(&base_url),
            model,
            http: LlmHttpClient::new(Duration::from_secs(300), Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        let request_id = Uuid::new_v4().to_string();
        let start_time = Instant::now();

        info!(
            request_id = %request_id,
            message_count = messages.len(),
            model = %self.model,
            "Starting Ollama chat request"
        );

        let request = ChatRequest::new(&self.model, messages).with_tools(tools);
        let body = serde_json::to_string(&request)?;
        debug!(request_id = %request_id, "Ollama request: {}", body);

        let url = format!("{}/v1/chat/completions", self.base_url);

        // No auth header needed for local Ollama
        let response_body = self
            .http
            .execute_with_retry(&request_id, body, |client, body| {
                client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .body(body)
            })
            .await?;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        parse_chat_response(&response_body, request_id, duration_ms)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: false,
            video: false,
            pdf: false,
            tools: true,
        }
    }

    fn provider_type(&self) -> Provider {
        Provider::Ollama
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("http://localhost:11434/"),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_base_url("http://localhost:11434/v1"),
            "http://localhost:11434"
        );
    }

    #[test]
    fn test_pick_local_model_matches_base_name() {
        let available = vec!["llama3.2:latest".to_string(), "qwen2.5:7b".to_string()];
        let preferences = vec!["qwen2.5".to_string(), "llama3.2".to_string()];
        assert_eq!(
            pick_local_model(&available, &preferences),
            Some("qwen2.5:7b".to_string())
        );
    }

    #[test]
    fn test_pick_local_model_none_present() {
        let available = vec!["mistral:latest".to_string()];
        let preferences = vec!["llama3.2".to_string()];
        assert_eq!(pick_local_model(&available, &preferences), None);
    }

    #[test]
    fn test_client_model_name() {
        let client = OllamaClient::with_model("http://localhost:11434".into(), "llama3.2".into());
        assert_eq!(client.model_name(), "llama3.2");
        assert_eq!(client.provider_type(), Provider::Ollama);
    }
}
