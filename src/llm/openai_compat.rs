// src/llm/openai_compat.rs
// Request/response shapes shared by the OpenAI-compatible providers
// (openai, kimi, ollama).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::types::{ChatResult, Message, Tool, ToolCall, Usage};

/// Chat completions request body
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<Message>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            tools: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Option<Vec<Tool>>) -> Self {
        self.tools = tools.filter(|t| !t.is_empty());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Parse an OpenAI-compatible chat completions response body.
pub fn parse_chat_response(
    body: &str,
    request_id: String,
    duration_ms: u64,
) -> Result<ChatResult> {
    let response: ChatResponse =
        serde_json::from_str(body).context("Failed to parse chat completions response")?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .context("Chat completions response had no choices")?;

    Ok(ChatResult {
        request_id,
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls: choice.message.tool_calls.filter(|t| !t.is_empty()),
        usage: response.usage,
        stop_reason: choice.finish_reason,
        duration_ms,
    })
}
