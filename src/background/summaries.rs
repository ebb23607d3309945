// src/background/summaries.rs
// Daily summarization: turn each past day's overflow chunks into one
// summary row per (session, date), with an embedding for recall.

use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use crate::db::chunks;
use crate::llm::{LlmClient, Message};
use crate::memory::MemoryStore;

const SUMMARY_PROMPT: &str = "Summarize this day's conversation in 2-4 sentences. \
Keep concrete details: names, decisions, plans, dates. No preamble, just the summary.";

/// Summarize every pending day for a session. A day is pending when it is
/// strictly before today, has chunks, and has no summary yet.
///
/// Returns how many days were summarized. Embedding failure never fails
/// the summary write.
pub async fn summarize_pending_days(
    memory: &MemoryStore,
    client: &dyn LlmClient,
    session_id: &str,
) -> Result<usize> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let sid = session_id.to_string();
    let pending = memory
        .pool()
        .interact_raw(move |conn| chunks::pending_chunk_dates_sync(conn, &sid, &today))
        .await?;

    let mut summarized = 0;
    for date in pending {
        match summarize_day(memory, client, session_id, &date).await {
            Ok(()) => summarized += 1,
            Err(e) => warn!("Summarizing {date} for {session_id} failed: {e}"),
        }
    }
    Ok(summarized)
}

async fn summarize_day(
    memory: &MemoryStore,
    client: &dyn LlmClient,
    session_id: &str,
    date: &str,
) -> Result<()> {
    let (sid, d) = (session_id.to_string(), date.to_string());
    let day_chunks = memory
        .pool()
        .interact_raw(move |conn| chunks::chunks_for_date_sync(conn, &sid, &d))
        .await?;
    if day_chunks.is_empty() {
        return Ok(());
    }

    let transcript = day_chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let result = client
        .chat(
            vec![Message::system(SUMMARY_PROMPT), Message::user(transcript)],
            None,
        )
        .await?;
    let summary = result
        .content
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("summarizer returned no text"))?;

    let (sid, d, text) = (session_id.to_string(), date.to_string(), summary.clone());
    let summary_id = memory
        .pool()
        .interact_raw(move |conn| chunks::upsert_daily_summary_sync(conn, &sid, &d, &text))
        .await?;

    if let Some(embedding) = memory.embed_text(&summary).await {
        memory
            .pool()
            .try_interact("store summary embedding", move |conn| {
                chunks::upsert_summary_embedding_sync(conn, summary_id, &embedding)
                    .map_err(Into::into)
            })
            .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabasePool;
    use crate::llm::types::{Capabilities, ChatResult, Tool};
    use crate::llm::Provider;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct CannedSummarizer;

    #[async_trait]
    impl LlmClient for CannedSummarizer {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Option<Vec<Tool>>,
        ) -> Result<ChatResult> {
            // Echo a marker proving the transcript reached the model.
            let transcript = messages.last().and_then(|m| m.content.clone()).unwrap();
            Ok(ChatResult {
                request_id: "canned".into(),
                content: Some(format!("Summary of: {}", &transcript[..transcript.len().min(20)])),
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
    async fn test_pending_days_get_summaries() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let memory = MemoryStore::new(pool.clone(), None);

        pool.interact_raw(|conn| {
            conn.execute_batch(
                "INSERT INTO conversation_chunks (session_id, content, created_at) \
                 VALUES ('s1', 'user: old day', datetime('now', '-2 days'));
                 INSERT INTO conversation_chunks (session_id, content, created_at) \
                 VALUES ('s1', 'user: today, not pending', datetime('now'));",
            )
        })
        .await
        .unwrap();

        let n = summarize_pending_days(&memory, &CannedSummarizer, "s1")
            .await
            .unwrap();
        assert_eq!(n, 1);

        let summaries: i64 = pool
            .interact_raw(|conn| {
                conn.query_row("SELECT COUNT(*) FROM daily_summaries", [], |r| r.get(0))
            })
            .await
            .unwrap();
        assert_eq!(summaries, 1);

        // Second run: nothing pending anymore
        let again = summarize_pending_days(&memory, &CannedSummarizer, "s1")
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_chunks_concatenate_oldest_first() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let memory = MemoryStore::new(pool.clone(), None);

        pool.interact_raw(|conn| {
            conn.execute_batch(
                "INSERT INTO conversation_chunks (session_id, content, created_at) \
                 VALUES ('s1', 'user: first', datetime('now', '-2 days'));
                 INSERT INTO conversation_chunks (session_id, content, created_at) \
                 VALUES ('s1', 'user: second', datetime('now', '-2 days'));",
            )
        })
        .await
        .unwrap();

        summarize_pending_days(&memory, &CannedSummarizer, "s1")
            .await
            .unwrap();

        let summary: String = pool
            .interact_raw(|conn| {
                conn.query_row("SELECT summary FROM daily_summaries", [], |r| r.get(0))
            })
            .await
            .unwrap();
        // The canned summarizer echoes the transcript head: oldest chunk first.
        assert!(summary.contains("user: first"));
    }
}
