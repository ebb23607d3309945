// src/tools/mod.rs
// Named tool dispatch. A tool is a description, a JSON-schema parameter
// fragment, an approval flag, and an opaque async handler returning
// Result<String, String>; handler identity never leaves the registry.

pub mod context;
pub mod cron_tools;
pub mod deploy_tools;
pub mod memory_tools;
pub mod note_tools;
pub mod system_tools;
pub mod web_tools;

pub use context::{ActiveModel, Deployer, Services, ToolCtx};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::Tool;

/// A tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String>;
}

struct RegisteredTool {
    definition: Tool,
    requires_approval: bool,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tools advertised to the LLM.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        parameters: Value,
        requires_approval: bool,
        handler: Arc<dyn ToolHandler>,
    ) {
        let index = self.tools.len();
        self.tools.push(RegisteredTool {
            definition: Tool::function(name, description, parameters),
            requires_approval,
            handler,
        });
        self.by_name.insert(name.to_string(), index);
    }

    /// The full advertised tool set. The agent loop filters this per turn.
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn requires_approval(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .map(|&i| self.tools[i].requires_approval)
            .unwrap_or(false)
    }

    /// Execute a tool by name. Handler errors come back verbatim in the
    /// Err variant; the agent loop wraps them as `[TOOL ERROR]` text.
    pub async fn execute(
        &self,
        ctx: &ToolCtx,
        name: &str,
        args_json: &str,
    ) -> Result<String, String> {
        let &index = self
            .by_name
            .get(name)
            .ok_or_else(|| format!("unknown tool: {name}"))?;

        let args: Value = if args_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(args_json)
                .map_err(|e| format!("invalid tool arguments: {e}"))?
        };

        self.tools[index].handler.handle(ctx, args).await
    }
}

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    memory_tools::register(registry);
    note_tools::register(registry);
    cron_tools::register(registry);
    system_tools::register(registry);
    web_tools::register(registry);
    deploy_tools::register(registry);
}

// ── argument helpers shared by the tool modules ──

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument: {key}"))
}

pub(crate) fn arg_str_opt<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn arg_i64_opt(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

pub(crate) fn arg_f64_opt(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

pub(crate) fn arg_bool_opt(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::db::DatabasePool;
    use crate::memory::MemoryStore;
    use crate::transport::Notifier;
    use std::sync::RwLock;
    use tokio::sync::mpsc;

    use crate::transport::OutboundMessage;

    /// A ToolCtx over an in-memory store, plus the notify receiver so tests
    /// can observe outbound messages.
    pub(crate) async fn test_ctx() -> (ToolCtx, mpsc::UnboundedReceiver<OutboundMessage>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let memory = Arc::new(MemoryStore::new(pool, None));
        let (notifier, rx) = Notifier::channel();
        let services = Arc::new(Services {
            memory,
            notifier,
            configured_providers: vec![crate::llm::Provider::Kimi],
            active_model: Arc::new(RwLock::new(None)),
            deployer: None,
            web_search_key: None,
        });
        (
            ToolCtx {
                chat_id: 42,
                session_id: "telegram:42".into(),
                user_id: Some(7),
                media: Vec::new(),
                safe_mode: false,
                services,
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn handle(&self, _ctx: &ToolCtx, args: Value) -> Result<String, String> {
            Ok(arg_str(&args, "text")?.to_string())
        }
    }

    #[tokio::test]
    async fn test_execute_and_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "echo",
            "echo text back",
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            false,
            Arc::new(Echo),
        );

        let (ctx, _rx) = test_utils::test_ctx().await;

        let out = registry
            .execute(&ctx, "echo", r#"{"text": "hi"}"#)
            .await
            .unwrap();
        assert_eq!(out, "hi");

        let err = registry.execute(&ctx, "echo", "{}").await.unwrap_err();
        assert!(err.contains("missing required argument"));

        let err = registry.execute(&ctx, "nope", "{}").await.unwrap_err();
        assert!(err.contains("unknown tool"));

        let err = registry
            .execute(&ctx, "echo", "{not json")
            .await
            .unwrap_err();
        assert!(err.contains("invalid tool arguments"));
    }

    #[tokio::test]
    async fn test_builtins_register_once() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        for name in [
            "recall_memory",
            "save_memory",
            "forget_memory",
            "mark_sensitive",
            "save_note",
            "get_note",
            "list_notes",
            "delete_note",
            "set_cron",
            "list_crons",
            "delete_cron",
            "current_time",
            "usage",
            "list_providers",
            "current_model",
            "browse",
            "web_search",
            "deploy_app",
            "remove_app",
        ] {
            assert!(registry.has(name), "missing builtin tool {name}");
        }

        assert!(registry.requires_approval("deploy_app"));
        assert!(registry.requires_approval("remove_app"));
        assert!(!registry.requires_approval("recall_memory"));
    }
}
