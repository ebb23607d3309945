// src/db/entities.rs
// Entity and edge storage: the graph half of the memory engine.

use rusqlite::{params, Connection};
use serde::Serialize;

/// A named node in the memory graph.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub domain_id: i64,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A directed relation between two entities.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub relation: String,
    pub strength: f64,
    pub metadata: Option<String>,
    pub created_at: String,
}

const ENTITY_COLUMNS: &str = "id, name, entity_type, domain_id, metadata, created_at, updated_at";

pub fn parse_entity_row(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        domain_id: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn parse_edge_row(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation: row.get(3)?,
        strength: row.get(4)?,
        metadata: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Create an entity and return its id.
pub fn create_entity_sync(
    conn: &Connection,
    name: &str,
    entity_type: &str,
    domain_id: i64,
    metadata: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO entities (name, entity_type, domain_id, metadata) VALUES (?, ?, ?, ?)",
        params![name, entity_type, domain_id, metadata],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_entity_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<Entity>> {
    conn.query_row(
        &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"),
        [id],
        parse_entity_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

/// Look up an entity by exact name. Names are not unique; first match wins.
pub fn find_entity_by_name_sync(conn: &Connection, name: &str) -> rusqlite::Result<Option<Entity>> {
    conn.query_row(
        &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE name = ? ORDER BY id LIMIT 1"),
        [name],
        parse_entity_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    })
}

/// Find by exact name or create with the given type and domain.
pub fn find_or_create_entity_sync(
    conn: &Connection,
    name: &str,
    entity_type: &str,
    domain_id: i64,
) -> rusqlite::Result<i64> {
    if let Some(existing) = find_entity_by_name_sync(conn, name)? {
        return Ok(existing.id);
    }
    create_entity_sync(conn, name, entity_type, domain_id, None)
}

/// The reserved assistant entity, seeded at open.
pub fn self_entity_sync(conn: &Connection) -> rusqlite::Result<Entity> {
    conn.query_row(
        &format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE entity_type = 'agent' AND name = 'Self' ORDER BY id LIMIT 1"
        ),
        [],
        parse_entity_row,
    )
}

/// Entities whose name contains `query` (case-insensitive LIKE).
pub fn entities_matching_sync(
    conn: &Connection,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Entity>> {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{}%", escaped);
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE name LIKE ? ESCAPE '\\' \
         ORDER BY id LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![pattern, limit as i64], parse_entity_row)?;
    rows.collect()
}

/// Insert a directed edge. Additive: no deduplication.
pub fn add_edge_sync(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    relation: &str,
    strength: f64,
    metadata: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO edges (source_id, target_id, relation, strength, metadata) \
         VALUES (?, ?, ?, ?, ?)",
        params![source_id, target_id, relation, strength, metadata],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A neighbor reached during traversal: the entity on the far side of an
/// edge, with the relation as seen from the near side (`inverse:` prefix
/// when the edge was walked against its direction).
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub entity_id: i64,
    pub relation: String,
}

/// Both outgoing and incoming edges of an entity, as neighbors.
pub fn neighbors_sync(conn: &Connection, entity_id: i64) -> rusqlite::Result<Vec<Neighbor>> {
    let mut neighbors = Vec::new();

    let mut out = conn.prepare(
        "SELECT id, source_id, target_id, relation, strength, metadata, created_at \
         FROM edges WHERE source_id = ?",
    )?;
    for edge in out.query_map([entity_id], parse_edge_row)? {
        let edge = edge?;
        neighbors.push(Neighbor {
            entity_id: edge.target_id,
            relation: edge.relation,
        });
    }

    let mut inc = conn.prepare(
        "SELECT id, source_id, target_id, relation, strength, metadata, created_at \
         FROM edges WHERE target_id = ?",
    )?;
    for edge in inc.query_map([entity_id], parse_edge_row)? {
        let edge = edge?;
        neighbors.push(Neighbor {
            entity_id: edge.source_id,
            relation: format!("inverse:{}", edge.relation),
        });
    }

    Ok(neighbors)
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
    fn test_find_by_name_returns_first_match() {
        let conn = test_conn();
        let first = create_entity_sync(&conn, "Alex", "person", 3, None).unwrap();
        let _second = create_entity_sync(&conn, "Alex", "person", 3, None).unwrap();

        let found = find_entity_by_name_sync(&conn, "Alex").unwrap().unwrap();
        assert_eq!(found.id, first);
    }

    #[test]
    fn test_find_or_create_is_stable() {
        let conn = test_conn();
        let a = find_or_create_entity_sync(&conn, "Lagos", "place", 8).unwrap();
        let b = find_or_create_entity_sync(&conn, "Lagos", "place", 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_self_entity_seeded() {
        let conn = test_conn();
        let this = self_entity_sync(&conn).unwrap();
        assert_eq!(this.entity_type, "agent");
        assert_eq!(this.name, "Self");
    }

    #[test]
    fn test_neighbors_walk_both_directions() {
        let conn = test_conn();
        let ada = create_entity_sync(&conn, "Ada", "person", 3, None).unwrap();
        let acme = create_entity_sync(&conn, "Acme", "organization", 5, None).unwrap();
        add_edge_sync(&conn, ada, acme, "works_at", 0.9, None).unwrap();

        let from_ada = neighbors_sync(&conn, ada).unwrap();
        assert_eq!(from_ada.len(), 1);
        assert_eq!(from_ada[0].entity_id, acme);
        assert_eq!(from_ada[0].relation, "works_at");

        let from_acme = neighbors_sync(&conn, acme).unwrap();
        assert_eq!(from_acme.len(), 1);
        assert_eq!(from_acme[0].entity_id, ada);
        assert_eq!(from_acme[0].relation, "inverse:works_at");
    }
}
