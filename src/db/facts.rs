// src/db/facts.rs
// Fact storage: supersession chains, sensitivity, salience touch, and the
// sync halves of hybrid search. All functions here run inside pool.interact.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::embedding_to_bytes;

/// A domain-tagged fact attached to an entity (or free-floating).
#[derive(Debug, Clone, Serialize)]
pub struct Fact {
    pub id: i64,
    pub entity_id: Option<i64>,
    pub domain_id: i64,
    pub field: String,
    pub value: String,
    pub confidence: f64,
    pub access_count: i64,
    pub last_accessed: Option<String>,
    pub supersedes: Option<i64>,
    pub active: bool,
    pub sensitive: bool,
    pub created_at: String,
}

const FACT_COLUMNS: &str = "id, entity_id, domain_id, field, value, confidence, access_count, \
                            last_accessed, supersedes, active, sensitive, created_at";

/// Parse a Fact from a row selected with [`FACT_COLUMNS`].
pub fn parse_fact_row(row: &rusqlite::Row) -> rusqlite::Result<Fact> {
    Ok(Fact {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        domain_id: row.get(2)?,
        field: row.get(3)?,
        value: row.get(4)?,
        confidence: row.get(5)?,
        access_count: row.get(6)?,
        last_accessed: row.get(7)?,
        supersedes: row.get(8)?,
        active: row.get::<_, i64>(9)? != 0,
        sensitive: row.get::<_, i64>(10)? != 0,
        created_at: row.get(11)?,
    })
}

/// Fetch a fact by id.
pub fn get_fact_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<Fact>> {
    conn.query_row(
        &format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?"),
        [id],
        parse_fact_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

/// Find the single active fact for a `(entity, domain, field)` key.
///
/// `entity_id IS ?` so a NULL entity matches NULL, keeping the
/// one-active-fact invariant for free-floating facts too.
pub fn find_active_exact_sync(
    conn: &Connection,
    entity_id: Option<i64>,
    domain_id: i64,
    field: &str,
) -> rusqlite::Result<Option<Fact>> {
    conn.query_row(
        &format!(
            "SELECT {FACT_COLUMNS} FROM facts \
             WHERE entity_id IS ? AND domain_id = ? AND field = ? AND active = 1"
        ),
        params![entity_id, domain_id, field],
        parse_fact_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

/// Insert a fresh fact and return it.
#[allow(clippy::too_many_arguments)]
pub fn insert_fact_sync(
    conn: &Connection,
    entity_id: Option<i64>,
    domain_id: i64,
    field: &str,
    value: &str,
    confidence: f64,
    sensitive: bool,
    supersedes: Option<i64>,
) -> rusqlite::Result<Fact> {
    conn.execute(
        "INSERT INTO facts (entity_id, domain_id, field, value, confidence, sensitive, supersedes) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            entity_id,
            domain_id,
            field,
            value,
            confidence,
            sensitive as i64,
            supersedes
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_fact_sync(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Touch a fact for salience: bump access_count and set last_accessed.
pub fn touch_fact_sync(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE facts SET access_count = access_count + 1, last_accessed = datetime('now') \
         WHERE id = ?",
        [id],
    )?;
    Ok(())
}

/// Touch a batch of facts.
pub fn touch_facts_sync(conn: &Connection, ids: &[i64]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "UPDATE facts SET access_count = access_count + 1, last_accessed = datetime('now') \
         WHERE id = ?",
    )?;
    for id in ids {
        stmt.execute([id])?;
    }
    Ok(())
}

/// Atomically replace `old_id` with a new active fact carrying the same key.
///
/// Deactivates the old fact, drops its embedding row, and inserts the new
/// fact with `supersedes = old_id`, all in one transaction.
#[allow(clippy::too_many_arguments)]
pub fn supersede_fact_sync(
    conn: &Connection,
    old_id: i64,
    entity_id: Option<i64>,
    domain_id: i64,
    field: &str,
    value: &str,
    confidence: f64,
    sensitive: bool,
) -> Result<Fact> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE facts SET active = 0 WHERE id = ?", [old_id])?;
    tx.execute("DELETE FROM vec_facts WHERE fact_id = ?", [old_id])?;
    let new = insert_fact_sync(
        &tx,
        entity_id,
        domain_id,
        field,
        value,
        confidence,
        sensitive,
        Some(old_id),
    )?;
    tx.commit()?;
    Ok(new)
}

/// Flip the sensitive flag. Never changes `active`.
pub fn mark_sensitive_sync(conn: &Connection, id: i64, sensitive: bool) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE facts SET sensitive = ? WHERE id = ?",
        params![sensitive as i64, id],
    )?;
    Ok(updated > 0)
}

/// Inactive history for a field: the supersession chain, newest first.
pub fn superseded_facts_sync(
    conn: &Connection,
    field: &str,
    entity_id: Option<i64>,
) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts \
         WHERE field = ?1 AND (?2 IS NULL OR entity_id = ?2) AND active = 0 \
         ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map(params![field, entity_id], parse_fact_row)?;
    rows.collect()
}

/// Active facts for an entity, newest first.
pub fn facts_by_entity_sync(conn: &Connection, entity_id: i64) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts \
         WHERE entity_id = ? AND active = 1 \
         ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([entity_id], parse_fact_row)?;
    rows.collect()
}

/// Hard-delete a fact and its embedding row. Embedding first.
pub fn delete_fact_sync(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    conn.execute("DELETE FROM vec_facts WHERE fact_id = ?", [id])?;
    let deleted = conn.execute("DELETE FROM facts WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

/// Store an embedding for a fact (replacing any previous row).
pub fn upsert_fact_embedding_sync(
    conn: &Connection,
    fact_id: i64,
    embedding: &[f32],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM vec_facts WHERE fact_id = ?", [fact_id])?;
    conn.execute(
        "INSERT INTO vec_facts (embedding, fact_id) VALUES (?, ?)",
        params![embedding_to_bytes(embedding), fact_id],
    )?;
    Ok(())
}

/// Nearest active fact to `embedding` within `(entity, domain)`.
/// Returns the fact and its cosine distance.
pub fn nearest_fact_sync(
    conn: &Connection,
    entity_id: i64,
    domain_id: i64,
    embedding: &[f32],
) -> rusqlite::Result<Option<(Fact, f32)>> {
    let bytes = embedding_to_bytes(embedding);
    conn.query_row(
        &format!(
            "SELECT {}, vec_distance_cosine(v.embedding, ?1) AS distance \
             FROM facts f JOIN vec_facts v ON f.id = v.fact_id \
             WHERE f.entity_id = ?2 AND f.domain_id = ?3 AND f.active = 1 \
             ORDER BY distance LIMIT 1",
            fact_columns_aliased("f")
        ),
        params![bytes, entity_id, domain_id],
        |row| Ok((parse_fact_row(row)?, row.get::<_, f32>(12)?)),
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

/// Semantic half of recall: k-NN over active facts in the given domains.
/// Returns (fact, distance) ordered nearest-first.
pub fn semantic_search_sync(
    conn: &Connection,
    embedding: &[f32],
    domain_ids: &[i64],
    limit: usize,
    exclude_sensitive: bool,
) -> rusqlite::Result<Vec<(Fact, f32)>> {
    let bytes = embedding_to_bytes(embedding);
    let domain_filter = domain_filter_clause("f", domain_ids);
    let sensitive_filter = if exclude_sensitive {
        " AND f.sensitive = 0"
    } else {
        ""
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {}, vec_distance_cosine(v.embedding, ?1) AS distance \
         FROM facts f JOIN vec_facts v ON f.id = v.fact_id \
         WHERE f.active = 1{domain_filter}{sensitive_filter} \
         ORDER BY distance LIMIT ?2",
        fact_columns_aliased("f")
    ))?;
    let rows = stmt.query_map(params![bytes, limit as i64], |row| {
        Ok((parse_fact_row(row)?, row.get::<_, f32>(12)?))
    })?;
    rows.collect()
}

/// Keyword half of recall: substring match over field and value, ranked by
/// `confidence*0.7 + recency*0.3`. Recency reads COALESCE(last_accessed,
/// created_at), normalized over a 90-day horizon.
pub fn keyword_search_sync(
    conn: &Connection,
    query: &str,
    domain_ids: &[i64],
    limit: usize,
    exclude_sensitive: bool,
) -> rusqlite::Result<Vec<Fact>> {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{}%", escaped);
    let domain_filter = domain_filter_clause("f", domain_ids);
    let sensitive_filter = if exclude_sensitive {
        " AND f.sensitive = 0"
    } else {
        ""
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts f \
         WHERE f.active = 1{domain_filter}{sensitive_filter} \
           AND (f.field LIKE ?1 ESCAPE '\\' OR f.value LIKE ?1 ESCAPE '\\') \
         ORDER BY (f.confidence * 0.7 + \
                   MAX(0.0, 1.0 - (julianday('now') - \
                       julianday(COALESCE(f.last_accessed, f.created_at))) / 90.0) * 0.3) DESC \
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![pattern, limit as i64], parse_fact_row)?;
    rows.collect()
}

/// Time-window fetch used when the query is empty or too broad to rank.
pub fn facts_in_range_sync(
    conn: &Connection,
    domain_ids: &[i64],
    since: Option<&str>,
    until: Option<&str>,
    limit: usize,
    exclude_sensitive: bool,
) -> rusqlite::Result<Vec<Fact>> {
    let domain_filter = domain_filter_clause("f", domain_ids);
    let sensitive_filter = if exclude_sensitive {
        " AND f.sensitive = 0"
    } else {
        ""
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts f \
         WHERE f.active = 1{domain_filter}{sensitive_filter} \
           AND (?1 IS NULL OR f.created_at >= ?1) \
           AND (?2 IS NULL OR f.created_at <= ?2) \
         ORDER BY f.created_at DESC LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![since, until, limit as i64], parse_fact_row)?;
    rows.collect()
}

/// Candidate row for the decay pass: id plus the salience inputs.
#[derive(Debug, Clone)]
pub struct DecayCandidate {
    pub id: i64,
    pub domain_id: i64,
    pub confidence: f64,
    pub access_count: i64,
    /// Days since last access (or creation when never accessed).
    pub days_idle: f64,
}

/// Active facts older than `max_age_days` for the given domain (or all
/// domains when None). Salience is computed by the caller.
pub fn decay_candidates_sync(
    conn: &Connection,
    domain_id: Option<i64>,
    max_age_days: i64,
) -> rusqlite::Result<Vec<DecayCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT id, domain_id, confidence, access_count, \
                julianday('now') - julianday(COALESCE(last_accessed, created_at)) \
         FROM facts \
         WHERE active = 1 AND (?1 IS NULL OR domain_id = ?1) \
           AND created_at < datetime('now', '-' || ?2 || ' days')",
    )?;
    let rows = stmt.query_map(params![domain_id, max_age_days], |row| {
        Ok(DecayCandidate {
            id: row.get(0)?,
            domain_id: row.get(1)?,
            confidence: row.get(2)?,
            access_count: row.get(3)?,
            days_idle: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// Column list aliased to a table prefix, for joined selects.
fn fact_columns_aliased(alias: &str) -> String {
    FACT_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `AND f.domain_id IN (...)` clause, or empty when no domains are given.
/// Ids are integers from our own fixed table, safe to inline.
fn domain_filter_clause(alias: &str, domain_ids: &[i64]) -> String {
    if domain_ids.is_empty() {
        String::new()
    } else {
        let list = domain_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(" AND {alias}.domain_id IN ({list})")
    }
}
