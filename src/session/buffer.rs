// src/session/buffer.rs
// Recent-conversation buffer: a durable FIFO per session with
// overflow-to-chunk capture.

use anyhow::Result;
use std::sync::Arc;

use crate::db::{chunks, BufferedMessage, DatabasePool};

/// Default per-session message cap.
pub const DEFAULT_MAX_MESSAGES: usize = 12;

/// FIFO per-session recent-message store backed by the database.
pub struct ConversationBuffer {
    pool: Arc<DatabasePool>,
    max_messages: usize,
}

impl ConversationBuffer {
    pub fn new(pool: Arc<DatabasePool>, max_messages: usize) -> Self {
        Self { pool, max_messages }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Append messages, trimming keep-newest to the cap. Returns the
    /// evicted messages oldest-first; the caller persists them as a chunk.
    pub async fn append(
        &self,
        session_id: &str,
        entries: Vec<(String, String)>,
    ) -> Result<Vec<BufferedMessage>> {
        let session_id = session_id.to_string();
        let cap = self.max_messages;
        self.pool
            .interact(move |conn| chunks::append_buffer_sync(conn, &session_id, &entries, cap))
            .await
    }

    /// Recent messages oldest→newest, at most the cap.
    pub async fn recent(&self, session_id: &str) -> Result<Vec<BufferedMessage>> {
        let session_id = session_id.to_string();
        let cap = self.max_messages;
        self.pool
            .interact_raw(move |conn| chunks::recent_buffer_sync(conn, &session_id, cap))
            .await
    }

    /// Persist evicted messages as one conversation chunk for later
    /// summarization. No-op on an empty overflow.
    pub async fn persist_overflow(
        &self,
        session_id: &str,
        overflow: &[BufferedMessage],
    ) -> Result<Option<i64>> {
        if overflow.is_empty() {
            return Ok(None);
        }
        let content = format_chunk(overflow);
        let session_id = session_id.to_string();
        let id = self
            .pool
            .interact_raw(move |conn| chunks::insert_chunk_sync(conn, &session_id, &content))
            .await?;
        Ok(Some(id))
    }
}

/// Render evicted messages as chunk text, one `role: content` line each.
fn format_chunk(messages: &[BufferedMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
