// src/tools/memory_tools.rs
// Memory tools: save, recall, forget, sensitivity.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::schema::{domain_id_for_slug, DOMAINS};
use crate::memory::RecallOptions;

use super::{arg_bool_opt, arg_f64_opt, arg_i64_opt, arg_str, arg_str_opt, ToolCtx, ToolHandler, ToolRegistry};

const DEFAULT_RECALL_LIMIT: usize = 10;

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "save_memory",
        "Save a fact to long-term memory. Supersedes any existing fact with the same field.",
        json!({
            "type": "object",
            "properties": {
                "entity": {"type": "string", "description": "Who or what the fact is about (optional entity name)"},
                "domain": {"type": "string", "description": "Life domain slug, e.g. identity, preferences, goals"},
                "field": {"type": "string", "description": "Short field name, e.g. 'city' or 'coffee order'"},
                "value": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "sensitive": {"type": "boolean"}
            },
            "required": ["domain", "field", "value"]
        }),
        false,
        Arc::new(SaveMemory),
    );

    registry.register(
        "recall_memory",
        "Search long-term memory: semantic + keyword over facts, plus related entities.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "domains": {"type": "array", "items": {"type": "string"}, "description": "Domain slugs to search; empty searches all"},
                "limit": {"type": "integer"},
                "depth": {"type": "integer", "description": "Graph traversal depth 1-3"},
                "include_sensitive": {"type": "boolean"},
                "since": {"type": "string", "description": "Earliest creation date, YYYY-MM-DD"},
                "until": {"type": "string", "description": "Latest creation date, YYYY-MM-DD"}
            },
            "required": ["query"]
        }),
        false,
        Arc::new(RecallMemory),
    );

    registry.register(
        "forget_memory",
        "Permanently delete a fact by id. Unrecoverable.",
        json!({
            "type": "object",
            "properties": {"fact_id": {"type": "integer"}},
            "required": ["fact_id"]
        }),
        false,
        Arc::new(ForgetMemory),
    );

    registry.register(
        "mark_sensitive",
        "Flag or unflag a fact as sensitive. Sensitive facts are hidden from recall by default.",
        json!({
            "type": "object",
            "properties": {
                "fact_id": {"type": "integer"},
                "sensitive": {"type": "boolean", "description": "Defaults to true"}
            },
            "required": ["fact_id"]
        }),
        false,
        Arc::new(MarkSensitive),
    );
}

struct SaveMemory;

#[async_trait]
impl ToolHandler for SaveMemory {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let domain_slug = arg_str(&args, "domain")?;
        let field = arg_str(&args, "field")?;
        let value = arg_str(&args, "value")?;
        let confidence = arg_f64_opt(&args, "confidence").unwrap_or(0.8).clamp(0.0, 1.0);
        let sensitive = arg_bool_opt(&args, "sensitive").unwrap_or(false);
        let domain_id = domain_id_for_slug(domain_slug);

        let entity_id = match arg_str_opt(&args, "entity") {
            Some(name) if !name.trim().is_empty() => Some(
                ctx.memory()
                    .find_or_create_entity(name.trim(), "person", domain_id)
                    .await
                    .map_err(|e| e.to_string())?,
            ),
            _ => None,
        };

        let write = ctx
            .memory()
            .add_fact(entity_id, domain_id, field, value, confidence, sensitive)
            .await
            .map_err(|e| e.to_string())?;

        let mut reply = if write.created {
            format!("Saved fact #{}: {} = {}", write.fact.id, field, value)
        } else {
            format!("Already known (fact #{}): {} = {}", write.fact.id, field, value)
        };
        if let Some(old) = write.superseded {
            reply.push_str(&format!(" (replaces fact #{old})"));
        }
        Ok(reply)
    }
}

struct RecallMemory;

#[async_trait]
impl ToolHandler for RecallMemory {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let query = arg_str(&args, "query")?;
        let limit = arg_i64_opt(&args, "limit").unwrap_or(DEFAULT_RECALL_LIMIT as i64) as usize;

        let domain_ids: Vec<i64> = args
            .get("domains")
            .and_then(Value::as_array)
            .map(|slugs| {
                slugs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(domain_id_for_slug)
                    .collect()
            })
            .unwrap_or_default();

        let options = RecallOptions {
            depth: arg_i64_opt(&args, "depth").unwrap_or(1),
            exclude_sensitive: !arg_bool_opt(&args, "include_sensitive").unwrap_or(false),
            since: arg_str_opt(&args, "since").map(String::from),
            until: arg_str_opt(&args, "until").map(String::from),
        };

        let result = ctx
            .memory()
            .recall(query, &domain_ids, limit.clamp(1, 50), options)
            .await
            .map_err(|e| e.to_string())?;

        if result.facts.is_empty() && result.entities.is_empty() {
            return Ok(format!("No memories found for '{query}'."));
        }

        let mut out = String::new();
        if !result.facts.is_empty() {
            out.push_str("Facts:\n");
            for fact in &result.facts {
                let domain = DOMAINS
                    .iter()
                    .find(|(id, _, _, _)| *id == fact.domain_id)
                    .map(|(_, _, slug, _)| *slug)
                    .unwrap_or("?");
                out.push_str(&format!(
                    "- #{} [{}] {}: {}\n",
                    fact.id, domain, fact.field, fact.value
                ));
            }
        }
        for er in &result.entities {
            let via = match &er.relation {
                Some(rel) => format!(" (via {rel})"),
                None => String::new(),
            };
            out.push_str(&format!(
                "{} [{}]{}:\n",
                er.entity.name, er.entity.entity_type, via
            ));
            for fact in &er.facts {
                out.push_str(&format!("  - #{} {}: {}\n", fact.id, fact.field, fact.value));
            }
        }
        Ok(out.trim_end().to_string())
    }
}

struct ForgetMemory;

#[async_trait]
impl ToolHandler for ForgetMemory {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let fact_id = arg_i64_opt(&args, "fact_id")
            .ok_or_else(|| "missing required argument: fact_id".to_string())?;
        let deleted = ctx
            .memory()
            .delete_fact(fact_id)
            .await
            .map_err(|e| e.to_string())?;
        if deleted {
            Ok(format!("Fact #{fact_id} permanently deleted."))
        } else {
            Err(format!("no fact with id {fact_id}"))
        }
    }
}

struct MarkSensitive;

#[async_trait]
impl ToolHandler for MarkSensitive {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let fact_id = arg_i64_opt(&args, "fact_id")
            .ok_or_else(|| "missing required argument: fact_id".to_string())?;
        let sensitive = arg_bool_opt(&args, "sensitive").unwrap_or(true);
        let updated = ctx
            .memory()
            .mark_sensitive(fact_id, sensitive)
            .await
            .map_err(|e| e.to_string())?;
        if updated {
            Ok(format!(
                "Fact #{fact_id} marked {}.",
                if sensitive { "sensitive" } else { "not sensitive" }
            ))
        } else {
            Err(format!("no fact with id {fact_id}"))
        }
    }
}
