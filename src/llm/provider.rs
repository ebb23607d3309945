// src/llm/provider.rs
// LLM provider abstraction layer

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Capabilities, ChatResult, Message, Tool};

/// LLM provider types, in default fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Kimi,
    Claude,
    OpenAi,
    Ollama, // local fallback; selecting it flips the agent into degraded mode
}

impl Provider {
    /// Parse provider from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kimi" | "moonshot" => Some(Self::Kimi),
            "claude" | "anthropic" => Some(Self::Claude),
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Self::Kimi => "KIMI_API_KEY",
            Self::Claude => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Ollama => "OLLAMA_HOST", // Ollama uses host, not API key
        }
    }

    /// Default model for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Kimi => "kimi-k2-0711-preview",
            Self::Claude => "claude-sonnet-4-5",
            Self::OpenAi => "gpt-4.1",
            Self::Ollama => "llama3.2",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kimi => write!(f, "kimi"),
            Self::Claude => write!(f, "claude"),
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

/// Trait for LLM clients - all providers must implement this
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult>;

    /// What kinds of input the active model accepts
    fn capabilities(&self) -> Capabilities;

    /// Get the provider type
    fn provider_type(&self) -> Provider;

    /// Get the model name
    fn model_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(Provider::from_str("kimi"), Some(Provider::Kimi));
        assert_eq!(Provider::from_str("Moonshot"), Some(Provider::Kimi));
        assert_eq!(Provider::from_str("claude"), Some(Provider::Claude));
        assert_eq!(Provider::from_str("ANTHROPIC"), Some(Provider::Claude));
        assert_eq!(Provider::from_str("openai"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_str("ollama"), Some(Provider::Ollama));
        assert_eq!(Provider::from_str("gemini"), None);
        assert_eq!(Provider::from_str(""), None);
    }

    #[test]
    fn test_provider_api_key_env_var() {
        assert_eq!(Provider::Kimi.api_key_env_var(), "KIMI_API_KEY");
        assert_eq!(Provider::Claude.api_key_env_var(), "ANTHROPIC_API_KEY");
        assert_eq!(Provider::OpenAi.api_key_env_var(), "OPENAI_API_KEY");
        assert_eq!(Provider::Ollama.api_key_env_var(), "OLLAMA_HOST");
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(format!("{}", Provider::Kimi), "kimi");
        assert_eq!(format!("{}", Provider::Claude), "claude");
        assert_eq!(format!("{}", Provider::OpenAi), "openai");
        assert_eq!(format!("{}", Provider::Ollama), "ollama");
    }
}
