// src/db/crons.rs
// Persisted cron schedules. Expression parsing and next-run computation
// live in the scheduler; this module only stores rows and timestamps
// (UTC, "YYYY-MM-DD HH:MM:SS", comparable to datetime('now')).

use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CronRow {
    pub id: i64,
    pub keyword: String,
    pub schedule: String,
    pub chat_id: i64,
    pub expires_at: Option<String>,
    pub next_run: String,
    pub created_at: String,
}

fn parse_cron_row(row: &rusqlite::Row) -> rusqlite::Result<CronRow> {
    Ok(CronRow {
        id: row.get(0)?,
        keyword: row.get(1)?,
        schedule: row.get(2)?,
        chat_id: row.get(3)?,
        expires_at: row.get(4)?,
        next_run: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const CRON_COLUMNS: &str = "id, keyword, schedule, chat_id, expires_at, next_run, created_at";

pub fn insert_cron_sync(
    conn: &Connection,
    keyword: &str,
    schedule: &str,
    chat_id: i64,
    expires_at: Option<&str>,
    next_run: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO crons (keyword, schedule, chat_id, expires_at, next_run) \
         VALUES (?, ?, ?, ?, ?)",
        params![keyword, schedule, chat_id, expires_at, next_run],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_crons_sync(conn: &Connection) -> rusqlite::Result<Vec<CronRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {CRON_COLUMNS} FROM crons ORDER BY next_run"))?;
    let rows = stmt.query_map([], parse_cron_row)?;
    rows.collect()
}

pub fn delete_cron_sync(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM crons WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

/// Delete every cron carrying a keyword. Returns the number removed.
pub fn delete_crons_by_keyword_sync(conn: &Connection, keyword: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM crons WHERE keyword = ?", [keyword])
}

/// Eagerly drop expired rows. Called at the top of every tick.
pub fn delete_expired_crons_sync(conn: &Connection, now: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM crons WHERE expires_at IS NOT NULL AND expires_at <= ?",
        [now],
    )
}

/// Rows due at `now` that have not expired.
pub fn due_crons_sync(conn: &Connection, now: &str) -> rusqlite::Result<Vec<CronRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CRON_COLUMNS} FROM crons \
         WHERE next_run <= ?1 AND (expires_at IS NULL OR expires_at > ?1) \
         ORDER BY next_run, id"
    ))?;
    let rows = stmt.query_map([now], parse_cron_row)?;
    rows.collect()
}

pub fn set_next_run_sync(conn: &Connection, id: i64, next_run: &str) -> rusqlite::Result<()> {
    conn.execute("UPDATE crons SET next_run = ? WHERE id = ?", params![next_run, id])?;
    Ok(())
}
