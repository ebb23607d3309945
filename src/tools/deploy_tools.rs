// src/tools/deploy_tools.rs
// App deployment tools. Both are approval-gated; the deployer itself is an
// external collaborator behind the Deployer trait and is usually absent.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{arg_str, arg_str_opt, ToolCtx, ToolHandler, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "deploy_app",
        "Deploy a user app. Requires the owner's approval.",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "spec": {"type": "string", "description": "Deployment spec as JSON"}
            },
            "required": ["name"]
        }),
        true,
        Arc::new(DeployApp),
    );

    registry.register(
        "remove_app",
        "Remove a deployed user app. Requires the owner's approval.",
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }),
        true,
        Arc::new(RemoveApp),
    );
}

struct DeployApp;

#[async_trait]
impl ToolHandler for DeployApp {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let name = arg_str(&args, "name")?;
        let spec = arg_str_opt(&args, "spec").unwrap_or("{}");

        let Some(deployer) = ctx.services.deployer.as_ref() else {
            return Err("no deployer configured".into());
        };
        deployer
            .deploy(name, spec)
            .await
            .map_err(|e| e.to_string())
    }
}

struct RemoveApp;

#[async_trait]
impl ToolHandler for RemoveApp {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let name = arg_str(&args, "name")?;

        let Some(deployer) = ctx.services.deployer.as_ref() else {
            return Err("no deployer configured".into());
        };
        deployer.remove(name).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_ctx;
    use super::super::{register_builtin_tools, ToolRegistry};

    #[tokio::test]
    async fn test_deploy_without_deployer_errors() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let err = registry
            .execute(&ctx, "deploy_app", r#"{"name": "blog"}"#)
            .await
            .unwrap_err();
        assert!(err.contains("no deployer configured"));
    }
}
