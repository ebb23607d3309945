// src/llm/claude.rs
// Anthropic messages API client. The wire format differs from the
// OpenAI-compatible providers, so this adapter converts both directions;
// vendor quirks stay in here and never leak to the agent loop.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::http_client::LlmHttpClient;
use super::provider::{LlmClient, Provider};
use super::types::{FunctionCall, ToolCall, Usage};
use super::{Capabilities, ChatResult, Message, Tool};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// Anthropic only accepts tool ids matching this pattern. Ids produced by
/// other providers (seen in history after a mid-turn fallback) are mapped
/// onto it deterministically, so tool_use and tool_result blocks built
/// from the same original id still correspond.
fn invalid_id_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("static regex"))
}

fn sanitize_tool_call_id(id: &str) -> String {
    invalid_id_chars().replace_all(id, "_").into_owned()
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

pub struct ClaudeClient {
    api_key: String,
    model: String,
    http: LlmHttpClient,
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, Provider::Claude.default_model().into())
    }

    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            http: LlmHttpClient::new(Duration::from_secs(300), Duration::from_secs(30)),
        }
    }

    /// Convert the shared message list into the messages-API shape:
    /// system messages pull out into the `system` field, assistant tool
    /// calls become `tool_use` blocks, tool results become `tool_result`
    /// blocks inside user messages.
    fn build_request(&self, messages: &[Message], tools: Option<&[Tool]>) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut converted: Vec<Value> = Vec::new();

        for message in messages {
            match message.role.as_str() {
                "system" => {
                    if let Some(content) = message.content.as_deref() {
                        system_parts.push(content);
                    }
                }
                "assistant" => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if let Some(content) = message.content.as_deref() {
                        if !content.is_empty() {
                            blocks.push(json!({ "type": "text", "text": content }));
                        }
                    }
                    if let Some(tool_calls) = &message.tool_calls {
                        for call in tool_calls {
                            let input: Value = serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| json!({}));
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": sanitize_tool_call_id(&call.id),
                                "name": call.function.name,
                                "input": input,
                            }));
                        }
                    }
                    if !blocks.is_empty() {
                        converted.push(json!({ "role": "assistant", "content": blocks }));
                    }
                }
                "tool" => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": sanitize_tool_call_id(
                            message.tool_call_id.as_deref().unwrap_or_default()
                        ),
                        "content": message.content.clone().unwrap_or_default(),
                    });
                    // tool_result blocks must open the next user message;
                    // consecutive results merge into one.
                    if let Some(last) = converted.last_mut() {
                        if last["role"] == "user"
                            && last["content"]
                                .as_array()
                                .and_then(|a| a.first())
                                .map(|b| b["type"] == "tool_result")
                                .unwrap_or(false)
                        {
                            last["content"].as_array_mut().unwrap().push(block);
                            continue;
                        }
                    }
                    converted.push(json!({ "role": "user", "content": [block] }));
                }
                _ => {
                    converted.push(json!({
                        "role": "user",
                        "content": message.content.clone().unwrap_or_default(),
                    }));
                }
            }
        }

        let mut request = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": converted,
        });
        if !system_parts.is_empty() {
            request["system"] = json!(system_parts.join("\n\n"));
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                let converted_tools: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.function.name,
                            "description": t.function.description,
                            "input_schema": t.function.parameters,
                        })
                    })
                    .collect();
                request["tools"] = json!(converted_tools);
            }
        }
        request
    }

    fn parse_response(body: &str, request_id: String, duration_ms: u64) -> Result<ChatResult> {
        let response: MessagesResponse =
            serde_json::from_str(body).context("Failed to parse Anthropic response")?;

        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    call_type: "function".into(),
                    function: FunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                }),
                ContentBlock::Other => {}
            }
        }

        Ok(ChatResult {
            request_id,
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join(""))
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            usage: response.usage.map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            stop_reason: response.stop_reason,
            duration_ms,
        })
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        let request_id = Uuid::new_v4().to_string();
        let start_time = Instant::now();

        info!(
            request_id = %request_id,
            message_count = messages.len(),
            model = %self.model,
            "Starting Claude chat request"
        );

        let request = self.build_request(&messages, tools.as_deref());
        let body = serde_json::to_string(&request)?;
        debug!(request_id = %request_id, "Claude request: {}", body);

        let response_body = self
            .http
            .execute_with_retry(&request_id, body, |client, body| {
                client
                    .post(API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", API_VERSION)
                    .header("Content-Type", "application/json")
                    .body(body)
            })
            .await?;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        Self::parse_response(&response_body, request_id, duration_ms)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: true,
            video: false,
            pdf: true,
            tools: true,
        }
    }

    fn provider_type(&self) -> Provider {
        Provider::Claude
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
