// src/db/schema.rs
// Database schema, migrations, and fixed seed rows

use anyhow::Result;
use rusqlite::{params, Connection};

/// The 14 fixed life domains: (id, name, slug, layer).
///
/// Seeded at open, immutable at runtime. The slugs form the closed set the
/// extraction pipeline maps onto; unknown slugs fall back to `identity`.
pub const DOMAINS: [(i64, &str, &str, &str); 14] = [
    (1, "Identity", "identity", "core"),
    (2, "Preferences", "preferences", "core"),
    (3, "Relationships", "relationships", "core"),
    (4, "Health", "health", "core"),
    (5, "Career", "career", "core"),
    (6, "Finance", "finance", "core"),
    (7, "Education", "education", "core"),
    (8, "Places", "places", "context"),
    (9, "Goals", "goals", "temporal"),
    (10, "Routines", "routines", "temporal"),
    (11, "Events", "events", "temporal"),
    (12, "Projects", "projects", "context"),
    (13, "Knowledge", "knowledge", "context"),
    (14, "Meta", "meta", "context"),
];

/// Domain ids consulted by the cron runner when fabricating reminders.
pub const TEMPORAL_DOMAIN_IDS: [i64; 3] = [9, 10, 11];

/// Fallback domain for unknown slugs from the extractor.
pub const DEFAULT_DOMAIN_ID: i64 = 1;

/// Resolve a domain slug to its id. Unknown slugs map to the identity domain.
pub fn domain_id_for_slug(slug: &str) -> i64 {
    DOMAINS
        .iter()
        .find(|(_, _, s, _)| *s == slug)
        .map(|(id, _, _, _)| *id)
        .unwrap_or(DEFAULT_DOMAIN_ID)
}

const SCHEMA: &str = r#"
-- ═══════════════════════════════════════
-- MEMORY GRAPH
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    layer TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,          -- 'agent' | 'user' | 'person' | 'place' | 'organization'
    domain_id INTEGER NOT NULL DEFAULT 1,
    metadata TEXT,                      -- JSON
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (domain_id) REFERENCES domains(id)
);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

CREATE TABLE IF NOT EXISTS facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER,
    domain_id INTEGER NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.8,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    supersedes INTEGER,
    active INTEGER NOT NULL DEFAULT 1,
    sensitive INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (entity_id) REFERENCES entities(id),
    FOREIGN KEY (domain_id) REFERENCES domains(id),
    FOREIGN KEY (supersedes) REFERENCES facts(id)
);
CREATE INDEX IF NOT EXISTS idx_facts_key ON facts(entity_id, domain_id, field, active);
CREATE INDEX IF NOT EXISTS idx_facts_domain ON facts(domain_id, active);
CREATE INDEX IF NOT EXISTS idx_facts_created ON facts(created_at);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL,
    target_id INTEGER NOT NULL,
    relation TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 0.5,
    metadata TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (source_id) REFERENCES entities(id),
    FOREIGN KEY (target_id) REFERENCES entities(id)
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

CREATE TABLE IF NOT EXISTS notes (
    key TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    tier TEXT NOT NULL DEFAULT 'working',
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- ═══════════════════════════════════════
-- CONVERSATION HISTORY
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS buffer_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_buffer_session ON buffer_messages(session_id, id);

CREATE TABLE IF NOT EXISTS conversation_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_chunks_session ON conversation_chunks(session_id, created_at);

CREATE TABLE IF NOT EXISTS daily_summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    summary_date TEXT NOT NULL,         -- YYYY-MM-DD
    summary TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(session_id, summary_date)
);

-- ═══════════════════════════════════════
-- SCHEDULES
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS crons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL,
    schedule TEXT NOT NULL,             -- 5-field cron expression
    chat_id INTEGER NOT NULL,
    expires_at TEXT,
    next_run TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_crons_next_run ON crons(next_run);

-- ═══════════════════════════════════════
-- BUDGET ACCOUNTING
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS llm_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    day TEXT NOT NULL,                  -- YYYY-MM-DD
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_llm_usage_day ON llm_usage(day);

-- ═══════════════════════════════════════
-- VECTOR TABLES (sqlite-vec)
-- ═══════════════════════════════════════
CREATE VIRTUAL TABLE IF NOT EXISTS vec_facts USING vec0(
    embedding float[768],
    +fact_id INTEGER
);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_summaries USING vec0(
    embedding float[768],
    +summary_id INTEGER
);
"#;

/// Run all schema setup and migrations.
///
/// Called during database initialization. Idempotent: existing tables and
/// seed rows are left alone.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    seed_domains(conn)?;
    seed_self_entity(conn)?;
    Ok(())
}

/// Insert the 14 fixed domains if missing.
fn seed_domains(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO domains (id, name, slug, layer) VALUES (?, ?, ?, ?)",
    )?;
    for (id, name, slug, layer) in DOMAINS {
        stmt.execute(params![id, name, slug, layer])?;
    }
    Ok(())
}

/// Insert the reserved assistant entity ("Self") if missing.
fn seed_self_entity(conn: &Connection) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM entities WHERE entity_type = 'agent' AND name = 'Self'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !exists {
        conn.execute(
            "INSERT INTO entities (name, entity_type, domain_id) VALUES ('Self', 'agent', ?)",
            [DEFAULT_DOMAIN_ID],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_slug_lookup() {
        assert_eq!(domain_id_for_slug("identity"), 1);
        assert_eq!(domain_id_for_slug("goals"), 9);
        assert_eq!(domain_id_for_slug("nonsense"), DEFAULT_DOMAIN_ID);
    }

    #[test]
    fn test_temporal_domains_are_temporal_layer() {
        for id in TEMPORAL_DOMAIN_IDS {
            let (_, _, _, layer) = DOMAINS.iter().find(|(d, _, _, _)| *d == id).unwrap();
            assert_eq!(*layer, "temporal");
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        crate::db::ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();

        let domains: i64 = conn
            .query_row("SELECT COUNT(*) FROM domains", [], |r| r.get(0))
            .unwrap();
        assert_eq!(domains, 14);

        let agents: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE entity_type = 'agent'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(agents, 1);
    }
}
