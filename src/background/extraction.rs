// src/background/extraction.rs
// Fact and relationship extraction from a finished exchange, via a cheap
// extractor model. Parse failures are logged and dropped; the reply the
// user already received is never at stake here.

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::db::schema::domain_id_for_slug;
use crate::llm::{LlmClient, Message};
use crate::memory::MemoryStore;

const EXTRACTION_PROMPT: &str = r#"Extract durable personal facts and relationships from this exchange.

Return ONLY a JSON object, no prose, in this shape:
{
  "facts": [
    {"subject": "user" | "self", "field": "...", "value": "...",
     "domain": "identity|preferences|relationships|health|career|finance|education|places|goals|routines|events|projects|knowledge|meta",
     "confidence": 0.0-1.0}
  ],
  "relationships": [
    {"source": "user" | "self" | "<entity name>", "target": "<entity name>",
     "target_type": "person" | "place" | "organization",
     "relation": "...", "strength": 0.0-1.0}
  ]
}

Only include things worth remembering beyond this conversation. Return
{"facts": [], "relationships": []} when there is nothing."#;

#[derive(Debug, Deserialize)]
pub(crate) struct ExtractionOutput {
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    /// Older extractor revisions return facts only; default keeps both
    /// shapes parseable.
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExtractedFact {
    pub subject: String,
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub target_type: Option<String>,
    pub relation: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
}

fn default_confidence() -> f64 {
    0.7
}

fn default_strength() -> f64 {
    0.5
}

/// The per-session user entity name: `user_<platform>_<chat_id>`.
pub fn user_entity_name(session_id: &str) -> String {
    format!("user_{}", session_id.replace(':', "_"))
}

/// Default domain for an entity created from a relationship target.
fn domain_for_entity_type(entity_type: &str) -> i64 {
    match entity_type {
        "place" => domain_id_for_slug("places"),
        "organization" => domain_id_for_slug("career"),
        _ => domain_id_for_slug("relationships"),
    }
}

/// Pull the JSON object out of the model's reply, tolerating code fences
/// and surrounding prose.
pub(crate) fn parse_extraction(raw: &str) -> Option<ExtractionOutput> {
    let trimmed = raw.trim();
    let candidate = if let Some(stripped) = trimmed.strip_prefix("```") {
        let inner = stripped.strip_prefix("json").unwrap_or(stripped);
        inner.trim_end_matches("```").trim()
    } else {
        trimmed
    };

    // Fall back to the outermost braces when prose surrounds the object.
    let candidate = match serde_json::from_str::<ExtractionOutput>(candidate) {
        Ok(parsed) => return Some(parsed),
        Err(_) => {
            let start = candidate.find('{')?;
            let end = candidate.rfind('}')?;
            &candidate[start..=end]
        }
    };
    serde_json::from_str(candidate).ok()
}

/// Run the extractor over one exchange and store whatever comes back.
pub async fn extract_turn(
    memory: &MemoryStore,
    client: &dyn LlmClient,
    session_id: &str,
    user_message: &str,
    assistant_response: &str,
) -> Result<()> {
    let exchange = format!("user: {user_message}\nassistant: {assistant_response}");
    let messages = vec![
        Message::system(EXTRACTION_PROMPT),
        Message::user(exchange),
    ];

    let result = client.chat(messages, None).await?;
    let Some(content) = result.content else {
        return Ok(());
    };

    let Some(output) = parse_extraction(&content) else {
        warn!("Extractor returned unparseable JSON, dropping");
        debug!("Unparseable extraction payload: {}", content);
        return Ok(());
    };

    store_extraction(memory, session_id, output).await
}

/// Resolve subjects and entities, then write facts and edges.
pub(crate) async fn store_extraction(
    memory: &MemoryStore,
    session_id: &str,
    output: ExtractionOutput,
) -> Result<()> {
    let fact_count = output.facts.len();
    let relationship_count = output.relationships.len();

    for fact in output.facts {
        let entity_id = resolve_subject(memory, session_id, &fact.subject).await?;
        let domain_id = domain_id_for_slug(fact.domain.as_deref().unwrap_or(""));
        if let Err(e) = memory
            .add_fact(
                Some(entity_id),
                domain_id,
                &fact.field,
                &fact.value,
                fact.confidence.clamp(0.0, 1.0),
                false,
            )
            .await
        {
            warn!("Failed to store extracted fact '{}': {}", fact.field, e);
        }
    }

    for rel in output.relationships {
        let source_id = match rel.source.as_str() {
            "user" | "self" => resolve_subject(memory, session_id, &rel.source).await?,
            name => {
                memory
                    .find_or_create_entity(name, "person", domain_for_entity_type("person"))
                    .await?
            }
        };
        let target_type = rel.target_type.as_deref().unwrap_or("person");
        let target_id = memory
            .find_or_create_entity(&rel.target, target_type, domain_for_entity_type(target_type))
            .await?;

        // Edges are additive by design of the graph: no deduplication here.
        if let Err(e) = memory
            .add_edge(source_id, target_id, &rel.relation, rel.strength.clamp(0.0, 1.0))
            .await
        {
            warn!("Failed to store relationship '{}': {}", rel.relation, e);
        }
    }

    if fact_count + relationship_count > 0 {
        debug!(
            facts = fact_count,
            relationships = relationship_count,
            "Extraction stored"
        );
    }
    Ok(())
}

/// `user` resolves to the lazily-created per-session user entity, `self`
/// to the reserved assistant entity.
async fn resolve_subject(memory: &MemoryStore, session_id: &str, subject: &str) -> Result<i64> {
    if subject == "self" {
        return Ok(memory.self_entity().await?.id);
    }
    memory
        .find_or_create_entity(&user_entity_name(session_id), "user", 1)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;
    use std::sync::Arc;

    async fn store() -> MemoryStore {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        MemoryStore::new(pool, None)
    }

    #[test]
    fn test_parse_plain_json() {
        let output = parse_extraction(
            r#"{"facts": [{"subject": "user", "field": "city", "value": "Lagos", "domain": "places", "confidence": 0.9}], "relationships": []}"#,
        )
        .unwrap();
        assert_eq!(output.facts.len(), 1);
        assert_eq!(output.facts[0].value, "Lagos");
    }

    #[test]
    fn test_parse_fenced_json() {
        let output = parse_extraction(
            "```json\n{\"facts\": [], \"relationships\": [{\"source\": \"user\", \"target\": \"Acme\", \"target_type\": \"organization\", \"relation\": \"works_at\", \"strength\": 0.8}]}\n```",
        )
        .unwrap();
        assert_eq!(output.relationships.len(), 1);
    }

    #[test]
    fn test_parse_old_facts_only_shape() {
        let output = parse_extraction(
            r#"{"facts": [{"subject": "user", "field": "name", "value": "Ada"}]}"#,
        )
        .unwrap();
        assert_eq!(output.facts.len(), 1);
        assert!(output.relationships.is_empty());
        // Defaults applied
        assert!((output.facts[0].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let output = parse_extraction(
            "Here is the extraction:\n{\"facts\": [], \"relationships\": []}\nDone.",
        )
        .unwrap();
        assert!(output.facts.is_empty());
    }

    #[test]
    fn test_parse_garbage_returns_none() {
        assert!(parse_extraction("I could not find anything.").is_none());
        assert!(parse_extraction("").is_none());
    }

    #[tokio::test]
    async fn test_store_creates_user_entity_lazily() {
        let memory = store().await;
        let output = parse_extraction(
            r#"{"facts": [{"subject": "user", "field": "city", "value": "Lagos", "domain": "places", "confidence": 0.9}]}"#,
        )
        .unwrap();
        store_extraction(&memory, "telegram:42", output).await.unwrap();

        let user = memory
            .find_entity("user_telegram_42")
            .await
            .unwrap()
            .expect("user entity created");
        assert_eq!(user.entity_type, "user");

        let facts = memory.facts_by_entity(user.id).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].domain_id, domain_id_for_slug("places"));
    }

    #[tokio::test]
    async fn test_unknown_domain_maps_to_identity() {
        let memory = store().await;
        let output = parse_extraction(
            r#"{"facts": [{"subject": "user", "field": "quirk", "value": "whistles", "domain": "vibes", "confidence": 0.5}]}"#,
        )
        .unwrap();
        store_extraction(&memory, "telegram:42", output).await.unwrap();

        let user = memory.find_entity("user_telegram_42").await.unwrap().unwrap();
        let facts = memory.facts_by_entity(user.id).await.unwrap();
        assert_eq!(facts[0].domain_id, 1);
    }

    #[tokio::test]
    async fn test_self_subject_resolves_to_reserved_entity() {
        let memory = store().await;
        let output = parse_extraction(
            r#"{"facts": [{"subject": "self", "field": "persona", "value": "dry humor", "domain": "meta"}]}"#,
        )
        .unwrap();
        store_extraction(&memory, "telegram:42", output).await.unwrap();

        let this = memory.self_entity().await.unwrap();
        let facts = memory.facts_by_entity(this.id).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].field, "persona");
    }

    #[tokio::test]
    async fn test_relationships_create_typed_entities_and_edges() {
        let memory = store().await;
        let output = parse_extraction(
            r#"{"facts": [], "relationships": [
                {"source": "user", "target": "Acme", "target_type": "organization", "relation": "works_at", "strength": 0.8},
                {"source": "user", "target": "Lagos", "target_type": "place", "relation": "lives_in", "strength": 0.9}
            ]}"#,
        )
        .unwrap();
        store_extraction(&memory, "telegram:42", output).await.unwrap();

        let acme = memory.find_entity("Acme").await.unwrap().unwrap();
        assert_eq!(acme.entity_type, "organization");
        assert_eq!(acme.domain_id, domain_id_for_slug("career"));

        let lagos = memory.find_entity("Lagos").await.unwrap().unwrap();
        assert_eq!(lagos.domain_id, domain_id_for_slug("places"));

        // Both edges exist, from the same user entity
        let edge_count: i64 = memory
            .pool()
            .interact_raw(|conn| conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(edge_count, 2);
    }
}
