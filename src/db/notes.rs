// src/db/notes.rs
// Key-addressed notes: small always-active context the agent pins into
// its system prompt.

use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub key: String,
    pub content: String,
    pub tier: String,
    pub updated_at: String,
}

fn parse_note_row(row: &rusqlite::Row) -> rusqlite::Result<Note> {
    Ok(Note {
        key: row.get(0)?,
        content: row.get(1)?,
        tier: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Upsert a note by key. Tier defaults to `working` when None.
pub fn save_note_sync(
    conn: &Connection,
    key: &str,
    content: &str,
    tier: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO notes (key, content, tier, updated_at) \
         VALUES (?1, ?2, COALESCE(?3, 'working'), datetime('now')) \
         ON CONFLICT(key) DO UPDATE SET \
             content = excluded.content, \
             tier = COALESCE(?3, notes.tier), \
             updated_at = datetime('now')",
        params![key, content, tier],
    )?;
    Ok(())
}

pub fn get_note_sync(conn: &Connection, key: &str) -> rusqlite::Result<Option<Note>> {
    conn.query_row(
        "SELECT key, content, tier, updated_at FROM notes WHERE key = ?",
        [key],
        parse_note_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

pub fn list_notes_sync(conn: &Connection) -> rusqlite::Result<Vec<Note>> {
    let mut stmt =
        conn.prepare("SELECT key, content, tier, updated_at FROM notes ORDER BY key")?;
    let rows = stmt.query_map([], parse_note_row)?;
    rows.collect()
}

pub fn delete_note_sync(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM notes WHERE key = ?", [key])?;
    Ok(deleted > 0)
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

    #[test]
    fn test_upsert_by_key() {
        let conn = test_conn();
        save_note_sync(&conn, "groceries", "milk", None).unwrap();
        save_note_sync(&conn, "groceries", "milk, eggs", None).unwrap();

        let notes = list_notes_sync(&conn).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "milk, eggs");
        assert_eq!(notes[0].tier, "working");
    }

    #[test]
    fn test_upsert_keeps_tier_when_not_given() {
        let conn = test_conn();
        save_note_sync(&conn, "plan", "v1", Some("pinned")).unwrap();
        save_note_sync(&conn, "plan", "v2", None).unwrap();

        let note = get_note_sync(&conn, "plan").unwrap().unwrap();
        assert_eq!(note.tier, "pinned");
        assert_eq!(note.content, "v2");
    }

    #[test]
    fn test_delete() {
        let conn = test_conn();
        save_note_sync(&conn, "tmp", "x", None).unwrap();
        assert!(delete_note_sync(&conn, "tmp").unwrap());
        assert!(!delete_note_sync(&conn, "tmp").unwrap());
        assert!(get_note_sync(&conn, "tmp").unwrap().is_none());
    }
}
