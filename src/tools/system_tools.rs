// src/tools/system_tools.rs
// Read-only introspection tools: time, usage, providers, model. These stay
// advertised in both isolated and degraded modes.

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ToolCtx, ToolHandler, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "current_time",
        "Current date and time, local and UTC.",
        json!({"type": "object", "properties": {}}),
        false,
        Arc::new(CurrentTime),
    );

    registry.register(
        "usage",
        "Token usage recorded today, by provider and model.",
        json!({"type": "object", "properties": {}}),
        false,
        Arc::new(UsageTool),
    );

    registry.register(
        "list_providers",
        "LLM providers with credentials configured.",
        json!({"type": "object", "properties": {}}),
        false,
        Arc::new(ListProviders),
    );

    registry.register(
        "current_model",
        "The provider and model currently answering.",
        json!({"type": "object", "properties": {}}),
        false,
        Arc::new(CurrentModel),
    );
}

struct CurrentTime;

#[async_trait]
impl ToolHandler for CurrentTime {
    async fn handle(&self, _ctx: &ToolCtx, _args: Value) -> Result<String, String> {
        let local = Local::now();
        let utc = Utc::now();
        Ok(format!(
            "Local: {}\nUTC:   {}",
            local.format("%A %Y-%m-%d %H:%M:%S %Z"),
            utc.format("%Y-%m-%d %H:%M:%S")
        ))
    }
}

struct UsageTool;

#[async_trait]
impl ToolHandler for UsageTool {
    async fn handle(&self, ctx: &ToolCtx, _args: Value) -> Result<String, String> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let breakdown = ctx
            .memory()
            .usage_breakdown(&today)
            .await
            .map_err(|e| e.to_string())?;

        if breakdown.is_empty() {
            return Ok(format!("No tokens used on {today}."));
        }
        let total: u64 = breakdown.iter().map(|(_, _, t)| t).sum();
        let mut out = format!("Usage for {today} ({total} tokens total):\n");
        for (provider, model, tokens) in breakdown {
            out.push_str(&format!("- {provider}/{model}: {tokens} tokens\n"));
        }
        Ok(out.trim_end().to_string())
    }
}

struct ListProviders;

#[async_trait]
impl ToolHandler for ListProviders {
    async fn handle(&self, ctx: &ToolCtx, _args: Value) -> Result<String, String> {
        let providers = &ctx.services.configured_providers;
        if providers.is_empty() {
            return Ok("No providers configured.".into());
        }
        Ok(providers
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

struct CurrentModel;

#[async_trait]
impl ToolHandler for CurrentModel {
    async fn handle(&self, ctx: &ToolCtx, _args: Value) -> Result<String, String> {
        match ctx.services.active_model() {
            Some(active) => Ok(format!("{}/{}", active.provider, active.model)),
            None => Ok("No model active yet.".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_ctx;
    use super::super::{register_builtin_tools, ToolRegistry};
    use crate::llm::Provider;

    #[tokio::test]
    async fn test_current_time_has_both_zones() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let out = registry.execute(&ctx, "current_time", "{}").await.unwrap();
        assert!(out.contains("Local:"));
        assert!(out.contains("UTC:"));
    }

    #[tokio::test]
    async fn test_current_model_reflects_switches() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let before = registry.execute(&ctx, "current_model", "{}").await.unwrap();
        assert!(before.contains("No model active"));

        ctx.services
            .set_active_model(Provider::Claude, "claude-sonnet-4-5".into());
        let after = registry.execute(&ctx, "current_model", "{}").await.unwrap();
        assert_eq!(after, "claude/claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn test_list_providers() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let out = registry.execute(&ctx, "list_providers", "{}").await.unwrap();
        assert!(out.contains("kimi"));
    }

    #[tokio::test]
    async fn test_usage_empty_day() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let out = registry.execute(&ctx, "usage", "{}").await.unwrap();
        assert!(out.contains("No tokens used"));
    }
}
