// src/config.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, ValetError};

/// API keys loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Moonshot/Kimi API key (KIMI_API_KEY)
    pub kimi: Option<String>,
    /// Anthropic API key (ANTHROPIC_API_KEY)
    pub anthropic: Option<String>,
    /// OpenAI API key (OPENAI_API_KEY)
    pub openai: Option<String>,
    /// Ollama host URL (OLLAMA_HOST)
    pub ollama: Option<String>,
    /// Brave Search API key (BRAVE_API_KEY), for the web_search tool
    pub brave: Option<String>,
}

impl ApiKeys {
    /// Load API keys from environment variables (single source of truth)
    pub fn from_env() -> Self {
        let keys = Self {
            kimi: read_env("KIMI_API_KEY"),
            anthropic: read_env("ANTHROPIC_API_KEY"),
            openai: read_env("OPENAI_API_KEY"),
            ollama: read_env("OLLAMA_HOST"),
            brave: read_env("BRAVE_API_KEY"),
        };
        keys.log_status();
        keys
    }

    /// Check if any chat-capable provider is configured
    pub fn has_llm_provider(&self) -> bool {
        self.kimi.is_some()
            || self.anthropic.is_some()
            || self.openai.is_some()
            || self.ollama.is_some()
    }

    /// Log which API keys are available (without exposing values)
    fn log_status(&self) {
        let mut available = Vec::new();
        if self.kimi.is_some() {
            available.push("Kimi");
        }
        if self.anthropic.is_some() {
            available.push("Anthropic");
        }
        if self.openai.is_some() {
            available.push("OpenAI");
        }
        if self.ollama.is_some() {
            available.push("Ollama");
        }

        if available.is_empty() {
            warn!("No API keys configured - LLM features will be unavailable");
        } else {
            debug!(keys = ?available, "API keys loaded");
        }
    }
}

/// Embedder configuration from environment variables
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Provider name: "openai" or "ollama" (EMBEDDER_PROVIDER)
    pub provider: Option<String>,
    /// Base URL override (EMBEDDER_URL)
    pub url: Option<String>,
    /// Model name override (EMBEDDER_MODEL)
    pub model: Option<String>,
}

impl EmbedderConfig {
    pub fn from_env() -> Self {
        Self {
            provider: read_env("EMBEDDER_PROVIDER"),
            url: read_env("EMBEDDER_URL"),
            model: read_env("EMBEDDER_MODEL"),
        }
    }
}

/// Decay configuration knobs
#[derive(Debug, Clone)]
pub struct DecayEnv {
    /// Default max age in days before a fact is decay-eligible (DECAY_MAX_AGE_DAYS)
    pub max_age_days: i64,
    /// Hours between decay passes (DECAY_INTERVAL_HOURS)
    pub interval: Duration,
}

impl DecayEnv {
    pub fn from_env() -> Self {
        let max_age_days = read_env("DECAY_MAX_AGE_DAYS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(180);
        let hours: u64 = read_env("DECAY_INTERVAL_HOURS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);
        Self {
            max_age_days,
            interval: Duration::from_secs(hours * 3600),
        }
    }
}

/// Full daemon configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_keys: ApiKeys,
    pub embedder: EmbedderConfig,
    pub decay: DecayEnv,

    /// Preferred provider name (LLM_PROVIDER), e.g. "claude"
    pub llm_provider: Option<String>,
    /// Model override for the preferred provider (LLM_MODEL)
    pub llm_model: Option<String>,
    /// Local models acceptable as a degraded fallback (OLLAMA_FALLBACK_MODELS, comma-separated)
    pub ollama_fallback_models: Vec<String>,

    /// Telegram bot token (TELEGRAM_TOKEN); transport enabled by presence
    pub telegram_token: Option<String>,
    /// Chat id of the owner, for startup notices and cron defaults (OWNER_CHAT_ID)
    pub owner_chat_id: Option<i64>,

    /// Path to the memory database file (MEMORY_PATH)
    pub memory_path: PathBuf,
    /// Path to the system-prompt source file (ESSENCE_PATH)
    pub essence_path: PathBuf,

    /// Hard cap on tool iterations per turn (AGENT_MAX_ITERATIONS)
    pub max_tool_iterations: usize,
    /// Conversation buffer cap per session (BUFFER_MAX_MESSAGES)
    pub buffer_max_messages: usize,
    /// Daily token budget; 0 disables enforcement (DAILY_TOKEN_BUDGET)
    pub daily_token_budget: u64,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Only shape validation happens here; fatal cross-field checks
    /// (no transport, missing essence file) live in [`Config::validate`]
    /// so tests can construct partial configs.
    pub fn from_env() -> Self {
        let memory_path = read_env("MEMORY_PATH").map(PathBuf::from).unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".valet/memory.db")
        });
        let essence_path = read_env("ESSENCE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("essence.md"));

        Self {
            api_keys: ApiKeys::from_env(),
            embedder: EmbedderConfig::from_env(),
            decay: DecayEnv::from_env(),
            llm_provider: read_env("LLM_PROVIDER"),
            llm_model: read_env("LLM_MODEL"),
            ollama_fallback_models: read_env("OLLAMA_FALLBACK_MODELS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["llama3.2".into(), "qwen2.5".into()]),
            telegram_token: read_env("TELEGRAM_TOKEN"),
            owner_chat_id: read_env("OWNER_CHAT_ID").and_then(|v| v.parse().ok()),
            memory_path,
            essence_path,
            max_tool_iterations: read_env("AGENT_MAX_ITERATIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            buffer_max_messages: read_env("BUFFER_MAX_MESSAGES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(12),
            daily_token_budget: read_env("DAILY_TOKEN_BUDGET")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }

    /// Fatal startup checks: at least one transport, at least one provider,
    /// and a readable essence file.
    pub fn validate(&self) -> Result<()> {
        if self.telegram_token.is_none() {
            return Err(ValetError::Config(
                "no transport enabled: set TELEGRAM_TOKEN".into(),
            ));
        }
        if !self.api_keys.has_llm_provider() {
            return Err(ValetError::Config(
                "no LLM provider configured: set KIMI_API_KEY, ANTHROPIC_API_KEY, OPENAI_API_KEY or OLLAMA_HOST".into(),
            ));
        }
        if !self.essence_path.exists() {
            return Err(ValetError::Config(format!(
                "system-prompt file not found: {}",
                self.essence_path.display()
            )));
        }
        Ok(())
    }

    /// Read the system prompt source file.
    pub fn load_essence(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.essence_path)?)
    }

    /// Hash of the fields that select the active LLM, used by the agent
    /// loop to detect runtime reconfiguration.
    pub fn llm_config_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        self.llm_provider.hash(&mut hasher);
        self.llm_model.hash(&mut hasher);
        hasher.finish()
    }
}

/// Read a single env var, filtering empty values
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
