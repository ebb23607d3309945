// src/tools/note_tools.rs
// Note tools: small key-addressed working context.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{arg_str, arg_str_opt, ToolCtx, ToolHandler, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "save_note",
        "Save or update a note by key. Notes are pinned into the system prompt.",
        json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "content": {"type": "string"},
                "tier": {"type": "string", "description": "Note tier; defaults to 'working'"}
            },
            "required": ["key", "content"]
        }),
        false,
        Arc::new(SaveNote),
    );

    registry.register(
        "get_note",
        "Read a note by key.",
        json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"]
        }),
        false,
        Arc::new(GetNote),
    );

    registry.register(
        "list_notes",
        "List all notes with their keys and tiers.",
        json!({"type": "object", "properties": {}}),
        false,
        Arc::new(ListNotes),
    );

    registry.register(
        "delete_note",
        "Delete a note by key.",
        json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"]
        }),
        false,
        Arc::new(DeleteNote),
    );
}

struct SaveNote;

#[async_trait]
impl ToolHandler for SaveNote {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let key = arg_str(&args, "key")?;
        let content = arg_str(&args, "content")?;
        let tier = arg_str_opt(&args, "tier");
        ctx.memory()
            .save_note(key, content, tier)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Note '{key}' saved."))
    }
}

struct GetNote;

#[async_trait]
impl ToolHandler for GetNote {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let key = arg_str(&args, "key")?;
        match ctx.memory().get_note(key).await.map_err(|e| e.to_string())? {
            Some(note) => Ok(format!("{} [{}]:\n{}", note.key, note.tier, note.content)),
            None => Err(format!("no note with key '{key}'")),
        }
    }
}

struct ListNotes;

#[async_trait]
impl ToolHandler for ListNotes {
    async fn handle(&self, ctx: &ToolCtx, _args: Value) -> Result<String, String> {
        let notes = ctx.memory().list_notes().await.map_err(|e| e.to_string())?;
        if notes.is_empty() {
            return Ok("No notes.".into());
        }
        Ok(notes
            .iter()
            .map(|n| format!("- {} [{}]: {}", n.key, n.tier, n.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

struct DeleteNote;

#[async_trait]
impl ToolHandler for DeleteNote {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let key = arg_str(&args, "key")?;
        if ctx
            .memory()
            .delete_note(key)
            .await
            .map_err(|e| e.to_string())?
        {
            Ok(format!("Note '{key}' deleted."))
        } else {
            Err(format!("no note with key '{key}'"))
        }
    }
}
