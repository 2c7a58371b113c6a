//! Fused semantic + lexical search (§4.9). Grounded in the teacher's
//! `crates/search/src/hybrid.rs` for the overall shape of a stateless
//! orchestrator holding its substructures and composing their scores,
//! and `crates/search/src/scorer.rs` for the BM25-to-score squashing
//! idea — but kept BM25 pure (§4.8) and fusion a separate, independently
//! weighted stage, rather than folding recency into the per-document
//! score the way the teacher's `BM25LiteScorer` does.

use std::collections::HashMap;

use memcore::{
    Level, NodeId, DEFAULT_EXACT_WEIGHT, DEFAULT_LEVEL_WEIGHT, DEFAULT_MAX_CANDIDATES, DEFAULT_RECENCY_WEIGHT,
    DEFAULT_RELEVANCE_WEIGHT, DEFAULT_SEMANTIC_WEIGHT, DEFAULT_TOKEN_BUDGET, RECENCY_HALF_LIFE_NANOS,
};

use crate::hnsw::{Hnsw, HnswConfig};
use crate::inverted_index::InvertedIndex;

/// Per-component weights and caps (§4.9).
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub semantic_weight: f32,
    pub exact_weight: f32,
    pub relevance_weight: f32,
    pub recency_weight: f32,
    pub level_weight: f32,
    pub max_candidates: usize,
    pub token_budget: u32,
    pub hnsw: HnswConfig,
}

impl Default for SearchConfig {
    fn default() -> SearchConfig {
        SearchConfig {
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            exact_weight: DEFAULT_EXACT_WEIGHT,
            relevance_weight: DEFAULT_RELEVANCE_WEIGHT,
            recency_weight: DEFAULT_RECENCY_WEIGHT,
            level_weight: DEFAULT_LEVEL_WEIGHT,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            token_budget: DEFAULT_TOKEN_BUDGET,
            hnsw: HnswConfig::default(),
        }
    }
}

/// A query against the fused search engine.
#[derive(Debug, Clone)]
pub struct Query {
    pub embedding: Option<Vec<f32>>,
    pub tokens: Vec<String>,
    pub k: usize,
    pub min_level: Level,
    pub max_level: Level,
    /// Nanosecond timestamp used as "now" for recency scoring.
    pub now: u64,
}

impl Query {
    pub fn new(now: u64, k: usize) -> Query {
        Query { embedding: None, tokens: Vec::new(), k, min_level: Level::Statement, max_level: Level::Agent, now }
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeMeta {
    level: Level,
    created_at: u64,
}

/// A scored search result (§4.9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: NodeId,
    pub semantic_score: f32,
    pub exact_score: f32,
    pub relevance: f32,
    pub recency: f32,
    pub level_boost: f32,
    pub final_score: f32,
}

/// Composes the HNSW graph and the inverted index into one ranked search (§4.9).
pub struct SearchEngine {
    config: SearchConfig,
    hnsw: Hnsw,
    inverted: InvertedIndex,
    meta: HashMap<NodeId, NodeMeta>,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> SearchEngine {
        SearchEngine { hnsw: Hnsw::new(config.hnsw.clone()), inverted: InvertedIndex::new(), config, meta: HashMap::new() }
    }

    /// Insert `id` into both substructures, recording its level and timestamp
    /// for later recency/level scoring.
    pub fn index(
        &mut self,
        id: NodeId,
        embedding: &[f32],
        tokens: &[String],
        level: Level,
        created_at: u64,
    ) -> memcore::Result<()> {
        self.hnsw.add(id, embedding.to_vec())?;
        self.inverted.index(id, tokens);
        self.meta.insert(id, NodeMeta { level, created_at });
        tracing::debug!(id, level = ?level, "search engine index");
        Ok(())
    }

    /// Tombstone `id` in both substructures.
    pub fn remove(&mut self, id: NodeId) {
        self.hnsw.remove(id);
        self.inverted.remove(id);
        tracing::debug!(id, "search engine remove");
    }

    fn recency(&self, created_at: u64, now: u64) -> f32 {
        let age = now.saturating_sub(created_at) as f64;
        (-age / RECENCY_HALF_LIFE_NANOS).exp() as f32
    }

    fn fuse(&self, id: NodeId, semantic: Option<f32>, exact: Option<f32>, now: u64) -> Option<SearchHit> {
        let meta = *self.meta.get(&id)?;
        let semantic_score = semantic.unwrap_or(0.0).clamp(0.0, 1.0);
        let exact_score = exact.unwrap_or(0.0).clamp(0.0, 1.0);
        let relevance = self.config.semantic_weight * semantic_score + self.config.exact_weight * exact_score;
        let recency = self.recency(meta.created_at, now);
        let level_boost = meta.level.boost();
        let final_score =
            self.config.relevance_weight * relevance + self.config.recency_weight * recency + self.config.level_weight * level_boost;
        Some(SearchHit { id, semantic_score, exact_score, relevance, recency, level_boost, final_score })
    }

    fn in_level_range(&self, id: NodeId, min_level: Level, max_level: Level) -> bool {
        self.meta.get(&id).is_some_and(|m| m.level >= min_level && m.level <= max_level)
    }

    fn rank(&self, mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
        hits.sort_by(|a, b| {
            b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }

    /// Fan out to both sub-searches, fuse, and return the top `query.k` hits
    /// within `[min_level, max_level]` (§4.9).
    pub fn search(&self, query: &Query) -> Vec<SearchHit> {
        let semantic: HashMap<NodeId, f32> = match &query.embedding {
            Some(v) => self
                .hnsw
                .search(v, self.config.max_candidates)
                .into_iter()
                .map(|(id, dist)| (id, 1.0 - dist))
                .collect(),
            None => HashMap::new(),
        };
        let exact: HashMap<NodeId, f32> = self
            .inverted
            .search_any(&query.tokens, self.config.max_candidates)
            .into_iter()
            .map(|(id, bm25)| (id, bm25 / (bm25 + 1.0)))
            .collect();

        let mut ids: Vec<NodeId> = semantic.keys().chain(exact.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let hits: Vec<SearchHit> = ids
            .into_iter()
            .filter(|id| self.in_level_range(*id, query.min_level, query.max_level))
            .filter_map(|id| self.fuse(id, semantic.get(&id).copied(), exact.get(&id).copied(), query.now))
            .collect();
        let ranked = self.rank(hits, query.k);
        tracing::debug!(k = query.k, found = ranked.len(), "search engine fused query");
        ranked
    }

    /// Single-path semantic search; exact contribution is zeroed (§4.9).
    pub fn semantic(&self, embedding: &[f32], k: usize, now: u64) -> Vec<SearchHit> {
        let hits: Vec<SearchHit> = self
            .hnsw
            .search(embedding, self.config.max_candidates)
            .into_iter()
            .filter_map(|(id, dist)| self.fuse(id, Some(1.0 - dist), None, now))
            .collect();
        self.rank(hits, k)
    }

    /// Single-path exact search; semantic contribution is zeroed (§4.9).
    pub fn exact(&self, tokens: &[String], k: usize, now: u64) -> Vec<SearchHit> {
        let hits: Vec<SearchHit> = self
            .inverted
            .search_any(tokens, self.config.max_candidates)
            .into_iter()
            .filter_map(|(id, bm25)| self.fuse(id, None, Some(bm25 / (bm25 + 1.0)), now))
            .collect();
        self.rank(hits, k)
    }

    /// The shared inverted index, exposed so callers can read its
    /// document-frequency bookkeeping for a coupled TF-IDF computation
    /// (§9: keyword extraction and BM25 intentionally share one corpus-level
    /// `doc_freqs`/`total_docs` state).
    pub fn inverted(&self) -> &InvertedIndex {
        &self.inverted
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.meta.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }
}

/// Walk `results` in rank order, admitting a prefix whose cumulative
/// per-level token cost does not exceed `budget` (§4.9).
pub fn apply_budget(results: &[(SearchHit, Level)], budget: u32) -> usize {
    let mut cumulative: u64 = 0;
    let mut count = 0;
    for (_, level) in results {
        let cost = level.token_cost() as u64;
        if cumulative + cost > budget as u64 {
            break;
        }
        cumulative += cost;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        v
    }

    fn terms(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    #[test]
    fn scenario_6_ranking_and_recency() {
        let mut engine = SearchEngine::new(SearchConfig::default());
        let query_vec = unit(8, 0);
        engine.index(0, &query_vec, &terms("test"), Level::Statement, 1).unwrap();
        engine.index(1, &query_vec, &terms("test"), Level::Statement, 9_999_999_999).unwrap();

        let mut q = Query::new(10_000_000_000, 10);
        q.embedding = Some(query_vec);
        q.tokens = terms("test");
        let hits = engine.search(&q);

        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 0);
        assert!(hits[0].final_score > hits[1].final_score);
    }

    #[test]
    fn scenario_7_budget_truncation() {
        let results: Vec<(SearchHit, Level)> = (0..100)
            .map(|i| {
                (
                    SearchHit {
                        id: i,
                        semantic_score: 1.0,
                        exact_score: 1.0,
                        relevance: 1.0,
                        recency: 1.0,
                        level_boost: 0.0,
                        final_score: 1.0,
                    },
                    Level::Statement,
                )
            })
            .collect();
        assert_eq!(apply_budget(&results, 150), 3);
        assert_eq!(apply_budget(&results, 1000), 20);
        assert_eq!(apply_budget(&results, 0), 0);
    }

    #[test]
    fn invariant_8_budget_monotone_and_admits_statement_times_n() {
        let results: Vec<(SearchHit, Level)> = (0..10)
            .map(|i| {
                (
                    SearchHit {
                        id: i,
                        semantic_score: 1.0,
                        exact_score: 1.0,
                        relevance: 1.0,
                        recency: 1.0,
                        level_boost: 0.0,
                        final_score: 1.0,
                    },
                    Level::Statement,
                )
            })
            .collect();
        assert_eq!(apply_budget(&results, 0), 0);
        assert_eq!(apply_budget(&results, 500), 10);
        let mut prev = 0;
        for budget in [0, 50, 100, 250, 500, 1000] {
            let n = apply_budget(&results, budget);
            assert!(n >= prev);
            prev = n;
        }
    }

    #[test]
    fn semantic_only_search_zeroes_exact_contribution() {
        let mut engine = SearchEngine::new(SearchConfig::default());
        engine.index(0, &unit(8, 0), &terms("alpha"), Level::Message, 1).unwrap();
        let hits = engine.semantic(&unit(8, 0), 5, 2);
        assert_eq!(hits[0].id, 0);
        assert_eq!(hits[0].exact_score, 0.0);
    }

    #[test]
    fn exact_only_search_zeroes_semantic_contribution() {
        let mut engine = SearchEngine::new(SearchConfig::default());
        engine.index(0, &unit(8, 0), &terms("alpha beta"), Level::Message, 1).unwrap();
        let hits = engine.exact(&terms("alpha"), 5, 2);
        assert_eq!(hits[0].id, 0);
        assert_eq!(hits[0].semantic_score, 0.0);
    }

    #[test]
    fn removed_nodes_are_excluded_from_fused_search() {
        let mut engine = SearchEngine::new(SearchConfig::default());
        engine.index(0, &unit(8, 0), &terms("alpha"), Level::Message, 1).unwrap();
        engine.remove(0);
        let mut q = Query::new(2, 10);
        q.embedding = Some(unit(8, 0));
        q.tokens = terms("alpha");
        assert!(engine.search(&q).is_empty());
    }

    #[test]
    fn level_range_filters_results() {
        let mut engine = SearchEngine::new(SearchConfig::default());
        engine.index(0, &unit(8, 0), &terms("alpha"), Level::Statement, 1).unwrap();
        engine.index(1, &unit(8, 0), &terms("alpha"), Level::Agent, 1).unwrap();
        let mut q = Query::new(2, 10);
        q.embedding = Some(unit(8, 0));
        q.tokens = terms("alpha");
        q.min_level = Level::Message;
        let hits = engine.search(&q);
        let ids: Vec<NodeId> = hits.iter().map(|h| h.id).collect();
        assert!(ids.contains(&1));
        assert!(!ids.contains(&0));
    }

    proptest::proptest! {
        /// Invariant 8, §8: `apply_budget` is monotone non-decreasing in the
        /// budget, for any mix of node levels.
        #[test]
        fn apply_budget_is_monotone_over_random_levels_and_budgets(
            levels in proptest::collection::vec(0u8..5, 1..30),
            budgets in proptest::collection::vec(0u32..5000, 1..10),
        ) {
            let results: Vec<(SearchHit, Level)> = levels
                .iter()
                .enumerate()
                .map(|(i, l)| {
                    let level = match l {
                        0 => Level::Statement,
                        1 => Level::Block,
                        2 => Level::Message,
                        3 => Level::Session,
                        _ => Level::Agent,
                    };
                    (
                        SearchHit {
                            id: i as NodeId,
                            semantic_score: 1.0,
                            exact_score: 1.0,
                            relevance: 1.0,
                            recency: 1.0,
                            level_boost: 0.0,
                            final_score: 1.0,
                        },
                        level,
                    )
                })
                .collect();

            let mut sorted = budgets.clone();
            sorted.sort_unstable();
            let mut prev = 0;
            for budget in sorted {
                let n = apply_budget(&results, budget);
                proptest::prop_assert!(n >= prev);
                proptest::prop_assert!(n <= results.len());
                prev = n;
            }
        }
    }
}
