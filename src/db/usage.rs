// src/db/usage.rs
// Per-request LLM usage rows, aggregated by day for budget enforcement.

use rusqlite::{params, Connection};

/// Record one request's token usage.
pub fn record_usage_sync(
    conn: &Connection,
    day: &str,
    provider: &str,
    model: &str,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO llm_usage (day, provider, model, prompt_tokens, completion_tokens, total_tokens) \
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            day,
            provider,
            model,
            prompt_tokens,
            completion_tokens,
            prompt_tokens + completion_tokens
        ],
    )?;
    Ok(())
}

/// Total tokens spent on a day.
pub fn tokens_for_day_sync(conn: &Connection, day: &str) -> rusqlite::Result<u64> {
    conn.query_row(
        "SELECT COALESCE(SUM(total_tokens), 0) FROM llm_usage WHERE day = ?",
        [day],
        |r| r.get::<_, i64>(0).map(|v| v as u64),
    )
}

/// Per-provider totals for a day, for the `usage` tool.
pub fn usage_breakdown_sync(
    conn: &Connection,
    day: &str,
) -> rusqlite::Result<Vec<(String, String, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT provider, model, SUM(total_tokens) FROM llm_usage \
         WHERE day = ? GROUP BY provider, model ORDER BY 3 DESC",
    )?;
    let rows = stmt.query_map([day], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get::<_, i64>(2)? as u64,
        ))
    })?;
    rows.collect()
}
