// src/background/mod.rs
// Background work that runs after each user turn: fact and relationship
// extraction, and pending-day summarization. Nothing here may block or
// fail the user's reply.

pub mod extraction;
pub mod summaries;

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::MemoryStore;

/// Fire the post-turn background pipeline. Spawned, never awaited by the
/// turn; all errors end at the log.
pub fn spawn_post_turn(
    memory: Arc<MemoryStore>,
    extractor: Option<Arc<dyn LlmClient>>,
    session_id: String,
    user_message: String,
    assistant_response: String,
) {
    let Some(client) = extractor else {
        return;
    };

    let extraction_memory = memory.clone();
    let extraction_client = client.clone();
    let extraction_session = session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = extraction::extract_turn(
            &extraction_memory,
            extraction_client.as_ref(),
            &extraction_session,
            &user_message,
            &assistant_response,
        )
        .await
        {
            tracing::debug!("Fact extraction skipped: {}", e);
        }
    });

    tokio::spawn(async move {
        match summaries::summarize_pending_days(&memory, client.as_ref(), &session_id).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Summarized {} pending day(s) for {}", n, session_id),
            Err(e) => tracing::debug!("Daily summarization skipped: {}", e),
        }
    });
}
