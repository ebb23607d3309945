// src/llm/openai.rs
// OpenAI chat completions client

use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::http_client::LlmHttpClient;
use super::openai_compat::{parse_chat_response, ChatRequest};
use super::provider::{LlmClient, Provider};
use super::{Capabilities, ChatResult, Message, Tool};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    api_key: String,
    model: String,
    http: LlmHttpClient,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, Provider::OpenAi.default_model().into())
    }

    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            http: LlmHttpClient::new(Duration::from_secs(300), Duration::from_secs(30)),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        let request_id = Uuid::new_v4().to_string();
        let start_time = Instant::now();

        info!(
            request_id = %request_id,
            message_count = messages.len(),
            model = %self.model,
            "Starting OpenAI chat request"
        );

        let request = ChatRequest::new(&self.model, messages).with_tools(tools);
        let body = serde_json::to_string(&request)?;
        debug!(request_id = %request_id, "OpenAI request: {}", body);

        let response_body = self
            .http
            .execute_with_retry(&request_id, body, |client, body| {
                client
                    .post(API_URL)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .body(body)
            })
            .await?;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        parse_chat_response(&response_body, request_id, duration_ms)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: true,
            video: false,
            pdf: false,
            tools: true,
        }
    }

    fn provider_type(&self) -> Provider {
        Provider::OpenAi
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let client = OpenAiClient::new("key".into());
        assert_eq!(client.provider_type(), Provider::OpenAi);
        assert_eq!(client.model_name(), "gpt-4.1");
        assert!(client.capabilities().tools);
    }
}
