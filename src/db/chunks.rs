// src/db/chunks.rs
// Durable conversation history: the recent-message buffer, overflow chunks,
// and daily summaries.

use rusqlite::{params, Connection};
use serde::Serialize;

/// One row of the recent-conversation buffer.
#[derive(Debug, Clone, Serialize)]
pub struct BufferedMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Raw conversation overflow captured for later summarization.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationChunk {
    pub id: i64,
    pub session_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub id: i64,
    pub session_id: String,
    pub summary_date: String,
    pub summary: String,
    pub created_at: String,
}

fn parse_buffered_row(row: &rusqlite::Row) -> rusqlite::Result<BufferedMessage> {
    Ok(BufferedMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn parse_chunk_row(row: &rusqlite::Row) -> rusqlite::Result<ConversationChunk> {
    Ok(ConversationChunk {
        id: row.get(0)?,
        session_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Append messages to a session's buffer, trimming keep-newest to `cap`.
/// Returns the evicted rows oldest-first (empty when under cap).
pub fn append_buffer_sync(
    conn: &Connection,
    session_id: &str,
    entries: &[(String, String)],
    cap: usize,
) -> anyhow::Result<Vec<BufferedMessage>> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO buffer_messages (session_id, role, content) VALUES (?, ?, ?)",
        )?;
        for (role, content) in entries {
            stmt.execute(params![session_id, role, content])?;
        }
    }

    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM buffer_messages WHERE session_id = ?",
        [session_id],
        |r| r.get(0),
    )?;

    let mut evicted = Vec::new();
    if count > cap as i64 {
        let overflow = count - cap as i64;
        let mut stmt = tx.prepare(
            "SELECT id, session_id, role, content, created_at FROM buffer_messages \
             WHERE session_id = ? ORDER BY id LIMIT ?",
        )?;
        let rows = stmt.query_map(params![session_id, overflow], parse_buffered_row)?;
        for row in rows {
            evicted.push(row?);
        }
        drop(stmt);

        let mut del = tx.prepare("DELETE FROM buffer_messages WHERE id = ?")?;
        for msg in &evicted {
            del.execute([msg.id])?;
        }
    }

    tx.commit()?;
    Ok(evicted)
}

/// Recent buffer contents oldest→newest, up to `cap`.
pub fn recent_buffer_sync(
    conn: &Connection,
    session_id: &str,
    cap: usize,
) -> rusqlite::Result<Vec<BufferedMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, content, created_at FROM \
         (SELECT id, session_id, role, content, created_at FROM buffer_messages \
          WHERE session_id = ? ORDER BY id DESC LIMIT ?) \
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![session_id, cap as i64], parse_buffered_row)?;
    rows.collect()
}

/// Write an overflow chunk.
pub fn insert_chunk_sync(
    conn: &Connection,
    session_id: &str,
    content: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO conversation_chunks (session_id, content) VALUES (?, ?)",
        params![session_id, content],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Dates strictly before `today` (YYYY-MM-DD) that have chunks but no
/// summary yet, oldest first.
pub fn pending_chunk_dates_sync(
    conn: &Connection,
    session_id: &str,
    today: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT date(c.created_at) AS d FROM conversation_chunks c \
         WHERE c.session_id = ?1 AND date(c.created_at) < ?2 \
           AND NOT EXISTS (SELECT 1 FROM daily_summaries s \
                           WHERE s.session_id = ?1 AND s.summary_date = date(c.created_at)) \
         ORDER BY d",
    )?;
    let rows = stmt.query_map(params![session_id, today], |row| row.get(0))?;
    rows.collect()
}

/// Chunks for one session-day, oldest first.
pub fn chunks_for_date_sync(
    conn: &Connection,
    session_id: &str,
    date: &str,
) -> rusqlite::Result<Vec<ConversationChunk>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, content, created_at FROM conversation_chunks \
         WHERE session_id = ? AND date(created_at) = ? ORDER BY id",
    )?;
    let rows = stmt.query_map(params![session_id, date], parse_chunk_row)?;
    rows.collect()
}

/// Insert or replace the summary for a `(session, date)` pair.
pub fn upsert_daily_summary_sync(
    conn: &Connection,
    session_id: &str,
    date: &str,
    summary: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO daily_summaries (session_id, summary_date, summary) VALUES (?, ?, ?) \
         ON CONFLICT(session_id, summary_date) DO UPDATE SET summary = excluded.summary",
        params![session_id, date, summary],
    )?;
    conn.query_row(
        "SELECT id FROM daily_summaries WHERE session_id = ? AND summary_date = ?",
        params![session_id, date],
        |r| r.get(0),
    )
}

pub fn get_daily_summary_sync(
    conn: &Connection,
    session_id: &str,
    date: &str,
) -> rusqlite::Result<Option<DailySummary>> {
    conn.query_row(
        "SELECT id, session_id, summary_date, summary, created_at FROM daily_summaries \
         WHERE session_id = ? AND summary_date = ?",
        params![session_id, date],
        |row| {
            Ok(DailySummary {
                id: row.get(0)?,
                session_id: row.get(1)?,
                summary_date: row.get(2)?,
                summary: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

/// Store an embedding for a summary (replacing any previous row).
pub fn upsert_summary_embedding_sync(
    conn: &Connection,
    summary_id: i64,
    embedding: &[f32],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM vec_summaries WHERE summary_id = ?", [summary_id])?;
    conn.execute(
        "INSERT INTO vec_summaries (embedding, summary_id) VALUES (?, ?)",
        params![super::embedding_to_bytes(embedding), summary_id],
    )?;
    Ok(())
}

/// Drop summarized chunks older than `days`. Chunks without a summary are
/// kept so the pipeline can still catch up.
pub fn delete_summarized_chunks_older_than_sync(
    conn: &Connection,
    days: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM conversation_chunks WHERE created_at < datetime('now', '-' || ?1 || ' days') \
         AND EXISTS (SELECT 1 FROM daily_summaries s \
                     WHERE s.session_id = conversation_chunks.session_id \
                       AND s.summary_date = date(conversation_chunks.created_at))",
        [days],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn test_conn() -> Connection {
        crate::db::ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    fn pair(i: usize) -> [(String, String); 2] {
        [
            ("user".to_string(), format!("question {i}")),
            ("assistant".to_string(), format!("answer {i}")),
        ]
    }

    #[test]
    fn test_buffer_under_cap_no_eviction() {
        let conn = test_conn();
        for i in 0..6 {
            let evicted = append_buffer_sync(&conn, "s1", &pair(i), 12).unwrap();
            assert!(evicted.is_empty());
        }
        assert_eq!(recent_buffer_sync(&conn, "s1", 12).unwrap().len(), 12);
    }

    #[test]
    fn test_buffer_evicts_oldest_verbatim() {
        let conn = test_conn();
        for i in 0..6 {
            append_buffer_sync(&conn, "s1", &pair(i), 12).unwrap();
        }
        let evicted = append_buffer_sync(&conn, "s1", &pair(6), 12).unwrap();
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].content, "question 0");
        assert_eq!(evicted[1].content, "answer 0");

        let recent = recent_buffer_sync(&conn, "s1", 12).unwrap();
        assert_eq!(recent.len(), 12);
        assert_eq!(recent[0].content, "question 1");
        assert_eq!(recent.last().unwrap().content, "answer 6");
    }

    #[test]
    fn test_buffer_sessions_are_isolated() {
        let conn = test_conn();
        append_buffer_sync(&conn, "a", &pair(0), 12).unwrap();
        append_buffer_sync(&conn, "b", &pair(1), 12).unwrap();

        assert_eq!(recent_buffer_sync(&conn, "a", 12).unwrap().len(), 2);
        assert_eq!(recent_buffer_sync(&conn, "b", 12).unwrap().len(), 2);
    }

    #[test]
    fn test_pending_dates_and_summary_upsert() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO conversation_chunks (session_id, content, created_at) \
             VALUES ('s1', 'user: hi', datetime('now', '-2 days'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO conversation_chunks (session_id, content, created_at) \
             VALUES ('s1', 'user: again', datetime('now', '-2 days'))",
            [],
        )
        .unwrap();

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let pending = pending_chunk_dates_sync(&conn, "s1", &today).unwrap();
        assert_eq!(pending.len(), 1);

        let date = pending[0].clone();
        let chunks = chunks_for_date_sync(&conn, "s1", &date).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "user: hi");

        let id1 = upsert_daily_summary_sync(&conn, "s1", &date, "first draft").unwrap();
        let id2 = upsert_daily_summary_sync(&conn, "s1", &date, "second draft").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(
            get_daily_summary_sync(&conn, "s1", &date)
                .unwrap()
                .unwrap()
                .summary,
            "second draft"
        );

        // Summarized date no longer pending
        assert!(pending_chunk_dates_sync(&conn, "s1", &today)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_today_chunks_not_pending() {
        let conn = test_conn();
        insert_chunk_sync(&conn, "s1", "user: hi").unwrap();
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        assert!(pending_chunk_dates_sync(&conn, "s1", &today)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_summarized_chunk_cleanup_keeps_unsummarized() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO conversation_chunks (session_id, content, created_at) \
             VALUES ('s1', 'old summarized', datetime('now', '-40 days'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO conversation_chunks (session_id, content, created_at) \
             VALUES ('s2', 'old unsummarized', datetime('now', '-40 days'))",
            [],
        )
        .unwrap();
        let date: String = conn
            .query_row(
                "SELECT date(created_at) FROM conversation_chunks WHERE session_id = 's1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        upsert_daily_summary_sync(&conn, "s1", &date, "done").unwrap();

        let deleted = delete_summarized_chunks_older_than_sync(&conn, 30).unwrap();
        assert_eq!(deleted, 1);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversation_chunks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
