// src/memory/mod.rs
// The memory engine: a facade over the database pool plus an optional
// embedder. Write-time semantic deduplication lives here; hybrid recall
// and decay live in the sibling modules.

pub mod decay;
pub mod recall;

pub use decay::{run_decay, spawn_decay_loop, DecayConfig};
pub use recall::{EntityRecall, RecallOptions, RecallResult};

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::{entities, facts, notes, usage, DatabasePool, Entity, Fact, Note};
use crate::embeddings::Embedder;

/// Cosine-distance cutoff for write-time deduplication: an incoming fact
/// this close to an existing one for the same (entity, domain) is treated
/// as the same fact.
pub const DEDUP_DISTANCE: f32 = 0.15;

/// Result of an add_fact call.
#[derive(Debug)]
pub struct FactWrite {
    pub fact: Fact,
    /// Id of the fact this write superseded, when it replaced one.
    pub superseded: Option<i64>,
    /// False when the write touched an existing identical fact.
    pub created: bool,
}

pub struct MemoryStore {
    pool: Arc<DatabasePool>,
    embedder: Option<Arc<Embedder>>,
}

impl MemoryStore {
    pub fn new(pool: Arc<DatabasePool>, embedder: Option<Arc<Embedder>>) -> Self {
        Self { pool, embedder }
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Store a fact with supersession and write-time deduplication.
    ///
    /// 1. Exact active match on (entity, domain, field): same value touches
    ///    the existing fact, a different value supersedes it.
    /// 2. Otherwise, with an embedder and an entity, the nearest stored fact
    ///    within (entity, domain) closer than [`DEDUP_DISTANCE`] is treated
    ///    the same way.
    /// 3. Otherwise the fact is inserted fresh.
    ///
    /// Embedding failures never fail the write; the fact lands without a
    /// vector row.
    pub async fn add_fact(
        &self,
        entity_id: Option<i64>,
        domain_id: i64,
        field: &str,
        value: &str,
        confidence: f64,
        sensitive: bool,
    ) -> Result<FactWrite> {
        let key_field = field.to_string();
        let exact = self
            .pool
            .interact_raw(move |conn| {
                facts::find_active_exact_sync(conn, entity_id, domain_id, &key_field)
            })
            .await?;

        if let Some(existing) = exact {
            return self
                .resolve_against(existing, entity_id, domain_id, field, value, confidence, sensitive)
                .await;
        }

        // No exact key match: try semantic dedup against the entity's facts.
        let embedding = self.embed_fact(field, value).await;
        if let (Some(embedding), Some(entity)) = (embedding.as_ref(), entity_id) {
            let probe = embedding.clone();
            let nearest = self
                .pool
                .interact_raw(move |conn| {
                    facts::nearest_fact_sync(conn, entity, domain_id, &probe)
                })
                .await?;

            if let Some((near, distance)) = nearest {
                if distance <= DEDUP_DISTANCE {
                    debug!(
                        fact_id = near.id,
                        distance, "Write-time dedup matched an existing fact"
                    );
                    return self
                        .resolve_against(
                            near, entity_id, domain_id, field, value, confidence, sensitive,
                        )
                        .await;
                }
            }
        }

        // Fresh insert.
        let (f, v) = (field.to_string(), value.to_string());
        let fact = self
            .pool
            .interact_raw(move |conn| {
                facts::insert_fact_sync(conn, entity_id, domain_id, &f, &v, confidence, sensitive, None)
            })
            .await?;
        self.store_embedding(fact.id, embedding).await;

        Ok(FactWrite {
            fact,
            superseded: None,
            created: true,
        })
    }

    /// Shared tail of both match paths: touch on equal value, supersede on
    /// a differing one.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_against(
        &self,
        existing: Fact,
        entity_id: Option<i64>,
        domain_id: i64,
        field: &str,
        value: &str,
        confidence: f64,
        sensitive: bool,
    ) -> Result<FactWrite> {
        if existing.value == value {
            let id = existing.id;
            self.pool
                .interact_raw(move |conn| facts::touch_fact_sync(conn, id))
                .await?;
            let refreshed = self
                .pool
                .interact_raw(move |conn| facts::get_fact_sync(conn, id))
                .await?
                .unwrap_or(existing);
            return Ok(FactWrite {
                fact: refreshed,
                superseded: None,
                created: false,
            });
        }

        let old_id = existing.id;
        let (f, v) = (field.to_string(), value.to_string());
        let new = self
            .pool
            .interact(move |conn| {
                facts::supersede_fact_sync(
                    conn, old_id, entity_id, domain_id, &f, &v, confidence, sensitive,
                )
            })
            .await?;

        let embedding = self.embed_fact(field, value).await;
        self.store_embedding(new.id, embedding).await;

        Ok(FactWrite {
            fact: new,
            superseded: Some(old_id),
            created: true,
        })
    }

    /// Embed `field: value`, logging and swallowing failures.
    async fn embed_fact(&self, field: &str, value: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(&format!("{field}: {value}")).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Fact embedding failed (continuing without): {}", e);
                None
            }
        }
    }

    /// Best-effort vector row write.
    async fn store_embedding(&self, fact_id: i64, embedding: Option<Vec<f32>>) {
        if let Some(embedding) = embedding {
            self.pool
                .try_interact("store fact embedding", move |conn| {
                    facts::upsert_fact_embedding_sync(conn, fact_id, &embedding)
                        .map_err(Into::into)
                })
                .await;
        }
    }

    /// Embed arbitrary text through the configured embedder, if any.
    pub(crate) async fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Embedding failed: {}", e);
                None
            }
        }
    }

    // ═══════════════════════════════════════
    // Facts
    // ═══════════════════════════════════════

    pub async fn mark_sensitive(&self, id: i64, sensitive: bool) -> Result<bool> {
        self.pool
            .interact_raw(move |conn| facts::mark_sensitive_sync(conn, id, sensitive))
            .await
    }

    pub async fn superseded_facts(
        &self,
        field: &str,
        entity_id: Option<i64>,
    ) -> Result<Vec<Fact>> {
        let field = field.to_string();
        self.pool
            .interact_raw(move |conn| facts::superseded_facts_sync(conn, &field, entity_id))
            .await
    }

    pub async fn facts_by_entity(&self, entity_id: i64) -> Result<Vec<Fact>> {
        self.pool
            .interact_raw(move |conn| facts::facts_by_entity_sync(conn, entity_id))
            .await
    }

    /// Hard-delete a fact and its embedding row.
    pub async fn delete_fact(&self, id: i64) -> Result<bool> {
        self.pool
            .interact_raw(move |conn| facts::delete_fact_sync(conn, id))
            .await
    }

    // ═══════════════════════════════════════
    // Entities and edges
    // ═══════════════════════════════════════

    pub async fn create_entity(
        &self,
        name: &str,
        entity_type: &str,
        domain_id: i64,
    ) -> Result<i64> {
        let (n, t) = (name.to_string(), entity_type.to_string());
        self.pool
            .interact_raw(move |conn| entities::create_entity_sync(conn, &n, &t, domain_id, None))
            .await
    }

    pub async fn find_entity(&self, name: &str) -> Result<Option<Entity>> {
        let name = name.to_string();
        self.pool
            .interact_raw(move |conn| entities::find_entity_by_name_sync(conn, &name))
            .await
    }

    pub async fn find_or_create_entity(
        &self,
        name: &str,
        entity_type: &str,
        domain_id: i64,
    ) -> Result<i64> {
        let (n, t) = (name.to_string(), entity_type.to_string());
        self.pool
            .interact_raw(move |conn| {
                entities::find_or_create_entity_sync(conn, &n, &t, domain_id)
            })
            .await
    }

    /// The reserved assistant entity.
    pub async fn self_entity(&self) -> Result<Entity> {
        self.pool
            .interact_raw(entities::self_entity_sync)
            .await
    }

    pub async fn add_edge(
        &self,
        source_id: i64,
        target_id: i64,
        relation: &str,
        strength: f64,
    ) -> Result<i64> {
        let relation = relation.to_string();
        self.pool
            .interact_raw(move |conn| {
                entities::add_edge_sync(conn, source_id, target_id, &relation, strength, None)
            })
            .await
    }

    // ═══════════════════════════════════════
    // Notes
    // ═══════════════════════════════════════

    pub async fn save_note(&self, key: &str, content: &str, tier: Option<&str>) -> Result<()> {
        let (k, c, t) = (key.to_string(), content.to_string(), tier.map(String::from));
        self.pool
            .interact_raw(move |conn| notes::save_note_sync(conn, &k, &c, t.as_deref()))
            .await
    }

    pub async fn get_note(&self, key: &str) -> Result<Option<Note>> {
        let key = key.to_string();
        self.pool
            .interact_raw(move |conn| notes::get_note_sync(conn, &key))
            .await
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        self.pool.interact_raw(notes::list_notes_sync).await
    }

    pub async fn delete_note(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.pool
            .interact_raw(move |conn| notes::delete_note_sync(conn, &key))
            .await
    }

    // ═══════════════════════════════════════
    // Usage
    // ═══════════════════════════════════════

    pub async fn usage_breakdown(&self, day: &str) -> Result<Vec<(String, String, u64)>> {
        let day = day.to_string();
        self.pool
            .interact_raw(move |conn| usage::usage_breakdown_sync(conn, &day))
            .await
    }
}
