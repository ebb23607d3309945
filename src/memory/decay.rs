// src/memory/decay.rs
// Salience-weighted decay: periodically hard-deletes old facts nobody
// recalls. Touch-on-recall is what keeps a fact alive past its max age.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::db::facts::{self, DecayCandidate};
use crate::db::DatabasePool;

/// Facts below this salience are eligible for deletion once past max age.
pub const DEFAULT_SALIENCE_THRESHOLD: f64 = 0.2;

/// How long summarized conversation chunks are kept before cleanup.
pub const DEFAULT_CHUNK_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct DecayConfig {
    /// Default max age in days before a fact becomes decay-eligible.
    pub max_age_days: i64,
    pub salience_threshold: f64,
    /// Per-domain max-age overrides (domain_id -> days).
    pub domain_overrides: HashMap<i64, i64>,
    /// Age after which already-summarized chunks are dropped.
    pub chunk_retention_days: i64,
}

impl DecayConfig {
    pub fn new(max_age_days: i64) -> Self {
        Self {
            max_age_days,
            salience_threshold: DEFAULT_SALIENCE_THRESHOLD,
            domain_overrides: HashMap::new(),
            chunk_retention_days: DEFAULT_CHUNK_RETENTION_DAYS,
        }
    }

    pub fn max_age_for(&self, domain_id: i64) -> i64 {
        self.domain_overrides
            .get(&domain_id)
            .copied()
            .unwrap_or(self.max_age_days)
    }
}

/// Composite salience in [0, 1]:
/// 0.4 recency (linear falloff over 90 days since last access) +
/// 0.4 access frequency (saturating at 10 accesses) +
/// 0.2 confidence.
pub fn salience(candidate: &DecayCandidate) -> f64 {
    let recency = (1.0 - candidate.days_idle / 90.0).max(0.0);
    let frequency = (candidate.access_count as f64 / 10.0).min(1.0);
    0.4 * recency + 0.4 * frequency + 0.2 * candidate.confidence
}

/// One decay pass. Returns the number of facts deleted.
///
/// Deletion is hard and unrecoverable by contract; the embedding row goes
/// first so the vector index never points at a missing fact.
pub async fn run_decay(pool: &Arc<DatabasePool>, config: &DecayConfig) -> Result<usize> {
    let config = config.clone();
    let deleted = pool
        .interact(move |conn| {
            let mut candidates: Vec<DecayCandidate> = Vec::new();

            for (&domain_id, &max_age) in &config.domain_overrides {
                candidates.extend(facts::decay_candidates_sync(conn, Some(domain_id), max_age)?);
            }
            // Default pass covers every domain without an override.
            let default_pass = facts::decay_candidates_sync(conn, None, config.max_age_days)?;
            candidates.extend(
                default_pass
                    .into_iter()
                    .filter(|c| !config.domain_overrides.contains_key(&c.domain_id)),
            );

            let mut deleted = 0usize;
            for candidate in candidates {
                let score = salience(&candidate);
                if score < config.salience_threshold {
                    debug!(
                        fact_id = candidate.id,
                        salience = score,
                        "Decaying low-salience fact"
                    );
                    if facts::delete_fact_sync(conn, candidate.id)? {
                        deleted += 1;
                    }
                }
            }

            let purged_chunks = crate::db::chunks::delete_summarized_chunks_older_than_sync(
                conn,
                config.chunk_retention_days,
            )?;
            if purged_chunks > 0 {
                debug!("Dropped {} summarized chunk(s)", purged_chunks);
            }

            Ok(deleted)
        })
        .await?;

    if deleted > 0 {
        info!("Decay pass removed {} facts", deleted);
    }
    Ok(deleted)
}

/// Periodic decay loop. Runs once per `interval` until the task is aborted.
pub fn spawn_decay_loop(
    pool: Arc<DatabasePool>,
    config: DecayConfig,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = run_decay(&pool, &config).await {
                tracing::warn!("Decay pass failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, RecallOptions};

    fn candidate(days_idle: f64, access_count: i64, confidence: f64) -> DecayCandidate {
        DecayCandidate {
            id: 0,
            domain_id: 1,
            confidence,
            access_count,
            days_idle,
        }
    }

    #[test]
    fn test_salience_formula() {
        // Fresh, often-accessed, confident: maximal
        let hot = candidate(0.0, 10, 1.0);
        assert!((salience(&hot) - 1.0).abs() < 1e-9);

        // Idle 400 days, never accessed, low confidence
        let cold = candidate(400.0, 0, 0.3);
        assert!((salience(&cold) - 0.06).abs() < 1e-9);

        // Recency clamps at zero rather than going negative
        let ancient = candidate(10_000.0, 0, 0.0);
        assert_eq!(salience(&ancient), 0.0);
    }

    #[test]
    fn test_max_age_override() {
        let mut config = DecayConfig::new(180);
        config.domain_overrides.insert(11, 30);
        assert_eq!(config.max_age_for(11), 30);
        assert_eq!(config.max_age_for(1), 180);
    }

    #[tokio::test]
    async fn test_decay_preserves_recalled_fact() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let store = MemoryStore::new(pool.clone(), None);

        // Two low-confidence facts, both backdated 400 days.
        pool.interact_raw(|conn| {
            conn.execute_batch(
                "INSERT INTO facts (domain_id, field, value, confidence, created_at) \
                 VALUES (1, 'foo habit', 'daily', 0.3, datetime('now', '-400 days'));
                 INSERT INTO facts (domain_id, field, value, confidence, created_at) \
                 VALUES (1, 'bar habit', 'weekly', 0.3, datetime('now', '-400 days'));",
            )
        })
        .await
        .unwrap();

        // Recall matches only the first.
        let hit = store
            .recall("foo", &[1], 5, RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(hit.facts.len(), 1);

        let deleted = run_decay(&pool, &DecayConfig::new(180)).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: Vec<String> = pool
            .interact_raw(|conn| {
                let mut stmt = conn.prepare("SELECT field FROM facts")?;
                let rows = stmt.query_map([], |r| r.get(0))?;
                rows.collect()
            })
            .await
            .unwrap();
        assert_eq!(remaining, vec!["foo habit".to_string()]);
    }

    #[tokio::test]
    async fn test_decay_never_touches_young_facts() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let store = MemoryStore::new(pool.clone(), None);

        // Low salience but young.
        store
            .add_fact(None, 1, "fresh", "fact", 0.0, false)
            .await
            .unwrap();

        let deleted = run_decay(&pool, &DecayConfig::new(180)).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_decay_respects_domain_override() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());

        pool.interact_raw(|conn| {
            conn.execute_batch(
                // 60 days old, in the events domain (id 11)
                "INSERT INTO facts (domain_id, field, value, confidence, created_at) \
                 VALUES (11, 'event', 'expired party', 0.0, datetime('now', '-60 days'));
                 -- same age in identity: default max age protects it
                 INSERT INTO facts (domain_id, field, value, confidence, created_at) \
                 VALUES (1, 'quirk', 'still young', 0.0, datetime('now', '-60 days'));",
            )
        })
        .await
        .unwrap();

        let mut config = DecayConfig::new(180);
        config.domain_overrides.insert(11, 30);
        let deleted = run_decay(&pool, &config).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: i64 = pool
            .interact_raw(|conn| conn.query_row("SELECT COUNT(*) FROM facts", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
