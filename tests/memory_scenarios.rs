// tests/memory_scenarios.rs
// End-to-end scenarios over the public library API: supersession chains,
// salience-guarded decay, and the buffer -> chunk -> daily summary path.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use valet::background::summaries;
use valet::db::DatabasePool;
use valet::llm::types::{Capabilities, ChatResult, Message, Tool};
use valet::llm::{LlmClient, Provider};
use valet::memory::{run_decay, DecayConfig, MemoryStore, RecallOptions};
use valet::session::ConversationBuffer;

async fn open_store() -> (Arc<DatabasePool>, MemoryStore) {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    (pool.clone(), MemoryStore::new(pool, None))
}

#[tokio::test]
async fn supersession_leaves_exactly_one_active_fact() {
    let (_pool, store) = open_store().await;
    let kadet = store.create_entity("Kadet", "person", 9).await.unwrap();

    let first = store
        .add_fact(Some(kadet), 9, "city", "Lagos", 0.9, false)
        .await
        .unwrap();
    let second = store
        .add_fact(Some(kadet), 9, "city", "Berlin", 0.9, false)
        .await
        .unwrap();

    assert_eq!(second.superseded, Some(first.fact.id));

    let active = store.facts_by_entity(kadet).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.fact.id);
    assert_eq!(active[0].value, "Berlin");
    assert!(active[0].active);

    // The chain terminates at the old fact, which is inactive.
    let history = store.superseded_facts("city", Some(kadet)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first.fact.id);
    assert!(!history[0].active);
}

#[tokio::test]
async fn decay_spares_what_recall_touched() {
    let (pool, store) = open_store().await;

    // Two stale low-confidence facts; only one will be recalled.
    pool.interact_raw(|conn| {
        conn.execute_batch(
            "INSERT INTO facts (domain_id, field, value, confidence, created_at) \
             VALUES (1, 'foo ritual', 'sunrise walk', 0.3, datetime('now', '-400 days'));
             INSERT INTO facts (domain_id, field, value, confidence, created_at) \
             VALUES (1, 'bar ritual', 'midnight snack', 0.3, datetime('now', '-400 days'));",
        )
    })
    .await
    .unwrap();

    let recalled = store
        .recall("foo", &[1], 5, RecallOptions::default())
        .await
        .unwrap();
    assert_eq!(recalled.facts.len(), 1);

    let deleted = run_decay(&pool, &DecayConfig::new(180)).await.unwrap();
    assert_eq!(deleted, 1);

    let survivors = store
        .recall("ritual", &[1], 10, RecallOptions::default())
        .await
        .unwrap();
    assert_eq!(survivors.facts.len(), 1);
    assert_eq!(survivors.facts[0].field, "foo ritual");
}

struct CannedSummarizer;

#[async_trait]
impl LlmClient for CannedSummarizer {
    async fn chat(&self, _messages: Vec<Message>, _tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        Ok(ChatResult {
            request_id: "canned".into(),
            content: Some("Talked through the day's plans.".into()),
            tool_calls: None,
            usage: None,
            stop_reason: Some("stop".into()),
            duration_ms: 0,
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn provider_type(&self) -> Provider {
        Provider::Kimi
    }

    fn model_name(&self) -> String {
        "canned".into()
    }
}

#[tokio::test]
async fn overflow_becomes_chunk_becomes_summary() {
    let (pool, store) = open_store().await;
    let buffer = ConversationBuffer::new(pool.clone(), 12);

    // Fill past the cap; the eviction lands in the chunk table verbatim.
    for i in 0..7 {
        let evicted = buffer
            .append(
                "telegram:42",
                vec![
                    ("user".to_string(), format!("question {i}")),
                    ("assistant".to_string(), format!("answer {i}")),
                ],
            )
            .await
            .unwrap();
        buffer.persist_overflow("telegram:42", &evicted).await.unwrap();
    }

    let recent = buffer.recent("telegram:42").await.unwrap();
    assert_eq!(recent.len(), 12);
    assert_eq!(recent[0].content, "question 1");

    let chunk: String = pool
        .interact_raw(|conn| {
            conn.query_row(
                "SELECT content FROM conversation_chunks WHERE session_id = 'telegram:42'",
                [],
                |r| r.get(0),
            )
        })
        .await
        .unwrap();
    assert!(chunk.contains("question 0"));
    assert!(chunk.contains("answer 0"));

    // Backdate the chunk so the day becomes pending, then summarize.
    pool.interact_raw(|conn| {
        conn.execute(
            "UPDATE conversation_chunks SET created_at = datetime('now', '-1 day')",
            [],
        )
    })
    .await
    .unwrap();

    let summarized = summaries::summarize_pending_days(&store, &CannedSummarizer, "telegram:42")
        .await
        .unwrap();
    assert_eq!(summarized, 1);

    let (count, text): (i64, String) = pool
        .interact_raw(|conn| {
            conn.query_row(
                "SELECT COUNT(*), MAX(summary) FROM daily_summaries WHERE session_id = 'telegram:42'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
        })
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(text, "Talked through the day's plans.");

    // Pending set is now empty: a second pass is a no-op.
    let again = summaries::summarize_pending_days(&store, &CannedSummarizer, "telegram:42")
        .await
        .unwrap();
    assert_eq!(again, 0);
}
