// src/tools/cron_tools.rs
// Cron tools: scheduled reminders and recurring triggers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::crons;
use crate::scheduler::schedule::initial_next_run;

use super::{arg_i64_opt, arg_str, arg_str_opt, ToolCtx, ToolHandler, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "set_cron",
        "Schedule a recurring trigger. The keyword is recalled from memory when it fires.",
        json!({
            "type": "object",
            "properties": {
                "keyword": {"type": "string", "description": "What to remind about, e.g. 'meds'"},
                "schedule": {"type": "string", "description": "5-field cron expression, e.g. '0 9 * * *'"},
                "expires_at": {"type": "string", "description": "Optional expiry, 'YYYY-MM-DD HH:MM:SS' UTC"}
            },
            "required": ["keyword", "schedule"]
        }),
        false,
        Arc::new(SetCron),
    );

    registry.register(
        "list_crons",
        "List scheduled triggers with their next run times.",
        json!({"type": "object", "properties": {}}),
        false,
        Arc::new(ListCrons),
    );

    registry.register(
        "delete_cron",
        "Delete scheduled triggers by id or by keyword.",
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "keyword": {"type": "string"}
            }
        }),
        false,
        Arc::new(DeleteCron),
    );
}

struct SetCron;

#[async_trait]
impl ToolHandler for SetCron {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let keyword = arg_str(&args, "keyword")?.to_string();
        let schedule = arg_str(&args, "schedule")?.to_string();
        let expires_at = arg_str_opt(&args, "expires_at").map(String::from);

        // Bad expressions fail here, synchronously, before anything lands.
        let next_run = initial_next_run(&schedule)?;

        let chat_id = ctx.chat_id;
        let (kw, sched, next) = (keyword.clone(), schedule.clone(), next_run.clone());
        let id = ctx
            .memory()
            .pool()
            .interact_raw(move |conn| {
                crons::insert_cron_sync(conn, &kw, &sched, chat_id, expires_at.as_deref(), &next)
            })
            .await
            .map_err(|e| e.to_string())?;

        Ok(format!(
            "Cron #{id} set: '{keyword}' on '{schedule}', next run {next_run} UTC."
        ))
    }
}

struct ListCrons;

#[async_trait]
impl ToolHandler for ListCrons {
    async fn handle(&self, ctx: &ToolCtx, _args: Value) -> Result<String, String> {
        let rows = ctx
            .memory()
            .pool()
            .interact_raw(crons::list_crons_sync)
            .await
            .map_err(|e| e.to_string())?;

        if rows.is_empty() {
            return Ok("No scheduled triggers.".into());
        }
        Ok(rows
            .iter()
            .map(|c| {
                let expiry = c
                    .expires_at
                    .as_deref()
                    .map(|e| format!(", expires {e}"))
                    .unwrap_or_default();
                format!(
                    "- #{} '{}' on '{}', next run {} UTC{}",
                    c.id, c.keyword, c.schedule, c.next_run, expiry
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

struct DeleteCron;

#[async_trait]
impl ToolHandler for DeleteCron {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        if let Some(id) = arg_i64_opt(&args, "id") {
            let deleted = ctx
                .memory()
                .pool()
                .interact_raw(move |conn| crons::delete_cron_sync(conn, id))
                .await
                .map_err(|e| e.to_string())?;
            return if deleted {
                Ok(format!("Cron #{id} deleted."))
            } else {
                Err(format!("no cron with id {id}"))
            };
        }

        if let Some(keyword) = arg_str_opt(&args, "keyword") {
            let kw = keyword.to_string();
            let removed = ctx
                .memory()
                .pool()
                .interact_raw(move |conn| crons::delete_crons_by_keyword_sync(conn, &kw))
                .await
                .map_err(|e| e.to_string())?;
            return Ok(format!("Deleted {removed} cron(s) for '{keyword}'."));
        }

        Err("provide either id or keyword".into())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_ctx;
    use super::super::{register_builtin_tools, ToolRegistry};

    #[tokio::test]
    async fn test_set_list_delete() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let set = registry
            .execute(
                &ctx,
                "set_cron",
                r#"{"keyword": "meds", "schedule": "0 9 * * *"}"#,
            )
            .await
            .unwrap();
        assert!(set.contains("next run"));

        let listed = registry.execute(&ctx, "list_crons", "{}").await.unwrap();
        assert!(listed.contains("meds"));

        let deleted = registry
            .execute(&ctx, "delete_cron", r#"{"keyword": "meds"}"#)
            .await
            .unwrap();
        assert!(deleted.contains("Deleted 1"));

        let empty = registry.execute(&ctx, "list_crons", "{}").await.unwrap();
        assert!(empty.contains("No scheduled triggers"));
    }

    #[tokio::test]
    async fn test_bad_expression_fails_synchronously() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let (ctx, _rx) = test_ctx().await;

        let err = registry
            .execute(
                &ctx,
                "set_cron",
                r#"{"keyword": "meds", "schedule": "every morning"}"#,
            )
            .await
            .unwrap_err();
        assert!(err.contains("invalid cron expression"));

        // Nothing was persisted
        let listed = registry.execute(&ctx, "list_crons", "{}").await.unwrap();
        assert!(listed.contains("No scheduled triggers"));
    }
}
