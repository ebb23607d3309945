// src/tools/context.rs
// The request context threaded from the agent loop into tool handlers,
// plus the shared services handlers reach through it.

use std::sync::{Arc, RwLock};

use crate::llm::Provider;
use crate::memory::MemoryStore;
use crate::transport::Notifier;

/// Which provider and model the agent is currently talking to. Updated by
/// the agent loop on refresh and fallback switches; read by the
/// `current_model` tool.
#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub provider: Provider,
    pub model: String,
}

/// External app deployer, behind a narrow interface. Absent in most
/// installs; the deploy tools error cleanly without it.
#[async_trait::async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, name: &str, spec_json: &str) -> anyhow::Result<String>;
    async fn remove(&self, name: &str) -> anyhow::Result<String>;
}

/// Services shared by all tool handlers.
pub struct Services {
    pub memory: Arc<MemoryStore>,
    pub notifier: Notifier,
    /// Providers with credentials configured, for `list_providers`.
    pub configured_providers: Vec<Provider>,
    pub active_model: Arc<RwLock<Option<ActiveModel>>>,
    pub deployer: Option<Arc<dyn Deployer>>,
    /// Brave Search key; web_search errors cleanly without it.
    pub web_search_key: Option<String>,
}

impl Services {
    pub fn set_active_model(&self, provider: Provider, model: String) {
        *self.active_model.write().expect("active model lock poisoned") =
            Some(ActiveModel { provider, model });
    }

    pub fn active_model(&self) -> Option<ActiveModel> {
        self.active_model
            .read()
            .expect("active model lock poisoned")
            .clone()
    }
}

/// Per-call context handed to every tool handler.
#[derive(Clone)]
pub struct ToolCtx {
    pub chat_id: i64,
    pub session_id: String,
    pub user_id: Option<i64>,
    /// Attached media references from the triggering message.
    pub media: Vec<String>,
    /// Set when the triggering message came from an untrusted source.
    pub safe_mode: bool,
    pub services: Arc<Services>,
}

impl ToolCtx {
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.services.memory
    }
}
