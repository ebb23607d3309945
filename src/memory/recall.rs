// src/memory/recall.rs
// Hybrid recall: semantic k-NN merged with keyword search, graph traversal
// from name-matched entities, time and sensitivity filters, and the
// salience touch on everything returned.

use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::db::{entities, facts, Entity, Fact};

use super::MemoryStore;

/// Depth bounds for graph traversal.
const MIN_DEPTH: i64 = 1;
const MAX_DEPTH: i64 = 3;

/// How many name-matched entities seed the traversal.
const ENTITY_MATCH_LIMIT: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    /// Graph traversal depth, clamped to [1, 3]. 0 means default (1).
    pub depth: i64,
    pub exclude_sensitive: bool,
    /// Inclusive creation-time window bounds ("YYYY-MM-DD" or full timestamps).
    pub since: Option<String>,
    pub until: Option<String>,
}

/// An entity reached by recall, with how it was reached and its facts.
#[derive(Debug)]
pub struct EntityRecall {
    pub entity: Entity,
    /// Relation that led here; None for a direct name match.
    pub relation: Option<String>,
    pub depth: i64,
    pub facts: Vec<Fact>,
}

#[derive(Debug)]
pub struct RecallResult {
    pub facts: Vec<Fact>,
    pub entities: Vec<EntityRecall>,
}

/// A query too vague to rank by: recall falls back to pure time-window
/// retrieval when a window is present.
fn is_broad_query(query: &str) -> bool {
    let trimmed = query.trim();
    trimmed.is_empty() || trimmed == "*" || trimmed.eq_ignore_ascii_case("everything")
}

impl MemoryStore {
    /// Recall facts and related entities for a query.
    pub async fn recall(
        &self,
        query: &str,
        domain_ids: &[i64],
        limit: usize,
        options: RecallOptions,
    ) -> Result<RecallResult> {
        let depth = options.depth.clamp(MIN_DEPTH, MAX_DEPTH);

        // Broad query + time window: strict time-range fetch, no ranking.
        if is_broad_query(query) && (options.since.is_some() || options.until.is_some()) {
            let domains = domain_ids.to_vec();
            let (since, until) = (options.since.clone(), options.until.clone());
            let exclude_sensitive = options.exclude_sensitive;
            let found = self
                .pool()
                .interact_raw(move |conn| {
                    facts::facts_in_range_sync(
                        conn,
                        &domains,
                        since.as_deref(),
                        until.as_deref(),
                        limit,
                        exclude_sensitive,
                    )
                })
                .await?;
            let ids: Vec<i64> = found.iter().map(|f| f.id).collect();
            self.touch(&ids).await;
            return Ok(RecallResult {
                facts: found,
                entities: Vec::new(),
            });
        }

        // Hybrid: semantic results first, keyword results fill the rest.
        let semantic = self.semantic_candidates(query, domain_ids, limit, &options).await;

        let keyword = {
            let q = query.to_string();
            let domains = domain_ids.to_vec();
            let exclude_sensitive = options.exclude_sensitive;
            self.pool()
                .interact_raw(move |conn| {
                    facts::keyword_search_sync(conn, &q, &domains, limit, exclude_sensitive)
                })
                .await?
        };

        let mut seen: HashSet<i64> = HashSet::new();
        let mut merged: Vec<Fact> = Vec::new();
        for fact in semantic.into_iter().chain(keyword) {
            if !in_window(&fact, &options) {
                continue;
            }
            if seen.insert(fact.id) {
                merged.push(fact);
            }
            if merged.len() >= limit {
                break;
            }
        }

        // Graph side: name-matched entities, expanded along edges.
        let entity_results = self
            .traverse_entities(query, depth, options.exclude_sensitive)
            .await?;

        // Salience touch: every fact returned, from either side.
        let mut touched: Vec<i64> = merged.iter().map(|f| f.id).collect();
        for er in &entity_results {
            touched.extend(er.facts.iter().map(|f| f.id));
        }
        self.touch(&touched).await;

        Ok(RecallResult {
            facts: merged,
            entities: entity_results,
        })
    }

    /// Semantic candidates, nearest first. Any failure (no embedder, embed
    /// error, vector query error) degrades to an empty list so recall
    /// continues keyword-only.
    async fn semantic_candidates(
        &self,
        query: &str,
        domain_ids: &[i64],
        limit: usize,
        options: &RecallOptions,
    ) -> Vec<Fact> {
        let Some(embedding) = self.embed_text(query).await else {
            return Vec::new();
        };

        let domains = domain_ids.to_vec();
        let exclude_sensitive = options.exclude_sensitive;
        let result = self
            .pool()
            .interact_raw(move |conn| {
                facts::semantic_search_sync(conn, &embedding, &domains, limit, exclude_sensitive)
            })
            .await;

        match result {
            Ok(hits) => hits.into_iter().map(|(fact, _distance)| fact).collect(),
            Err(e) => {
                debug!("Semantic search failed, degrading to keyword-only: {}", e);
                Vec::new()
            }
        }
    }

    /// Name-match entities and walk their edges breadth-first up to `depth`,
    /// returning each unique entity with its active facts.
    async fn traverse_entities(
        &self,
        query: &str,
        depth: i64,
        exclude_sensitive: bool,
    ) -> Result<Vec<EntityRecall>> {
        let q = query.to_string();
        self.pool()
            .interact_raw(move |conn| {
                let seeds = entities::entities_matching_sync(conn, &q, ENTITY_MATCH_LIMIT)?;

                let mut visited: HashMap<i64, (Option<String>, i64)> = HashMap::new();
                let mut queue: VecDeque<i64> = VecDeque::new();
                let mut order: Vec<i64> = Vec::new();

                for seed in &seeds {
                    if visited.insert(seed.id, (None, 0)).is_none() {
                        order.push(seed.id);
                        queue.push_back(seed.id);
                    }
                }

                while let Some(current) = queue.pop_front() {
                    let current_depth = visited[&current].1;
                    if current_depth >= depth {
                        continue;
                    }
                    for neighbor in entities::neighbors_sync(conn, current)? {
                        if let std::collections::hash_map::Entry::Vacant(slot) =
                            visited.entry(neighbor.entity_id)
                        {
                            slot.insert((Some(neighbor.relation), current_depth + 1));
                            order.push(neighbor.entity_id);
                            queue.push_back(neighbor.entity_id);
                        }
                    }
                }

                let mut results = Vec::new();
                for id in order {
                    let Some(entity) = entities::get_entity_sync(conn, id)? else {
                        continue;
                    };
                    let (relation, found_depth) = visited[&id].clone();
                    let mut entity_facts = facts::facts_by_entity_sync(conn, id)?;
                    if exclude_sensitive {
                        entity_facts.retain(|f| !f.sensitive);
                    }
                    results.push(EntityRecall {
                        entity,
                        relation,
                        depth: found_depth,
                        facts: entity_facts,
                    });
                }
                Ok(results)
            })
            .await
    }

    /// Best-effort salience touch.
    async fn touch(&self, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        let ids = ids.to_vec();
        self.pool()
            .try_interact("salience touch", move |conn| {
                facts::touch_facts_sync(conn, &ids).map_err(Into::into)
            })
            .await;
    }
}

/// Creation-time window check for merged results.
fn in_window(fact: &Fact, options: &RecallOptions) -> bool {
    if let Some(since) = &options.since {
        if fact.created_at.as_str() < since.as_str() {
            return false;
        }
    }
    if let Some(until) = &options.until {
        if fact.created_at.as_str() > until.as_str() {
            return false;
        }
    }
    true
}
