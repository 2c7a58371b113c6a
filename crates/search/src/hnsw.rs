//! HNSW (§4.7): an approximate nearest-neighbor graph over unit vectors,
//! keyed by `NodeId`, with `distance = 1 - cosine_similarity`.
//!
//! Grounded directly in the teacher's
//! `crates/engine/src/primitives/vector/hnsw.rs`: the splitmix64-seeded
//! deterministic level assignment (fixed seed 42), `search_layer` /
//! `greedy_search_to_layer` / `select_neighbors` (paper Algorithms 2/5/4),
//! `BTreeMap`-keyed node storage for deterministic iteration, and
//! tombstone-based soft delete are reused near-verbatim with the node
//! payload narrowed from the teacher's `VectorId` to this spec's `NodeId`
//! (u32) and dropped the teacher's temporal/range search and mmap-backed
//! compact graph variants, which have no counterpart in §4.7.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use memcore::{Error, NodeId, Result};

/// HNSW configuration (§4.7): `max_elements`, `M`, `ef_construction`, `ef_search`.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    pub max_elements: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    ml: f64,
}

impl HnswConfig {
    pub fn new(max_elements: usize, m: usize, ef_construction: usize, ef_search: usize) -> HnswConfig {
        HnswConfig { max_elements, m, ef_construction, ef_search, ml: 1.0 / (m as f64).ln() }
    }

    fn max_connections_layer0(&self) -> usize {
        self.m * 2
    }
}

impl Default for HnswConfig {
    fn default() -> HnswConfig {
        HnswConfig::new(
            1_000_000,
            memcore::HNSW_M,
            memcore::HNSW_EF_CONSTRUCTION,
            memcore::HNSW_EF_SEARCH,
        )
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

struct Node {
    vector: Vec<f32>,
    neighbors: Vec<BTreeSet<NodeId>>,
    deleted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Similarity (higher = closer); converted to distance at the API boundary.
    score: f32,
    id: NodeId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.id == other.id
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            // tie-break: lower id is "greater" so it survives eviction/ordering ties
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Approximate nearest-neighbor graph over unit vectors (§4.7).
pub struct Hnsw {
    config: HnswConfig,
    nodes: BTreeMap<NodeId, Node>,
    entry_point: Option<NodeId>,
    max_level: usize,
    rng_seed: u64,
    rng_counter: u64,
}

impl Hnsw {
    pub fn new(config: HnswConfig) -> Hnsw {
        Hnsw { config, nodes: BTreeMap::new(), entry_point: None, max_level: 0, rng_seed: 42, rng_counter: 0 }
    }

    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let mut x = self.rng_seed.wrapping_add(self.rng_counter);
        x = x.wrapping_add(0x9e3779b97f4a7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
        x ^= x >> 31;
        let uniform = ((x as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.config.ml) as usize
    }

    /// Insert a new node. Fails with `Error::Exists` if `id` is already present (§4.7).
    pub fn add(&mut self, id: NodeId, vector: Vec<f32>) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(Error::Exists(format!("vector for node {id}")));
        }
        if self.nodes.len() >= self.config.max_elements {
            return Err(Error::Capacity { component: "hnsw", capacity: self.config.max_elements });
        }

        let level = self.assign_level();
        let neighbors = (0..=level).map(|_| BTreeSet::new()).collect();
        self.nodes.insert(id, Node { vector: vector.clone(), neighbors, deleted: false });

        let entry_id = match self.entry_point {
            Some(e) => e,
            None => {
                self.entry_point = Some(id);
                self.max_level = level;
                tracing::debug!(id, layer = level, "hnsw add (entry point)");
                return Ok(());
            }
        };

        let mut current_entry = entry_id;
        if self.max_level > level {
            current_entry = self.greedy_search_to_layer(&vector, entry_id, self.max_level, level + 1);
        }

        let start_layer = level.min(self.max_level);
        for layer in (0..=start_layer).rev() {
            let candidates = self.search_layer(&vector, current_entry, self.config.ef_construction, layer);
            let selected: Vec<NodeId> = candidates.iter().take(self.config.m).map(|c| c.id).collect();

            if let Some(new_node) = self.nodes.get_mut(&id) {
                for &n in &selected {
                    new_node.neighbors[layer].insert(n);
                }
            }

            let max_conn = if layer == 0 { self.config.max_connections_layer0() } else { self.config.m };
            for &n in &selected {
                let needs_prune = if let Some(neighbor) = self.nodes.get_mut(&n) {
                    if layer < neighbor.neighbors.len() {
                        neighbor.neighbors[layer].insert(id);
                        neighbor.neighbors[layer].len() > max_conn
                    } else {
                        false
                    }
                } else {
                    false
                };
                if needs_prune {
                    self.prune_neighbors(n, layer, max_conn);
                }
            }

            if let Some(closest) = candidates.first() {
                current_entry = closest.id;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
        tracing::debug!(id, layer = level, "hnsw add");
        Ok(())
    }

    fn prune_neighbors(&mut self, id: NodeId, layer: usize, max_conn: usize) {
        let vector = match self.nodes.get(&id) {
            Some(n) => n.vector.clone(),
            None => return,
        };
        let neighbor_ids: Vec<NodeId> = match self.nodes.get(&id) {
            Some(n) if layer < n.neighbors.len() => n.neighbors[layer].iter().copied().collect(),
            _ => return,
        };
        let mut scored: Vec<Candidate> = neighbor_ids
            .iter()
            .filter_map(|&nid| self.nodes.get(&nid).map(|n| Candidate { score: cosine(&vector, &n.vector), id: nid }))
            .collect();
        scored.sort();
        scored.reverse();
        let keep: BTreeSet<NodeId> = scored.into_iter().take(max_conn).map(|c| c.id).collect();
        if let Some(n) = self.nodes.get_mut(&id) {
            if layer < n.neighbors.len() {
                n.neighbors[layer] = keep;
            }
        }
    }

    fn search_layer(&self, query: &[f32], entry_id: NodeId, ef: usize, layer: usize) -> Vec<Candidate> {
        let entry = match self.nodes.get(&entry_id) {
            Some(n) => n,
            None => return Vec::new(),
        };
        let entry_score = cosine(query, &entry.vector);

        let mut visited = BTreeSet::new();
        visited.insert(entry_id);

        let mut candidates = BinaryHeap::new();
        candidates.push(Candidate { score: entry_score, id: entry_id });

        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        if !entry.deleted {
            results.push(Reverse(Candidate { score: entry_score, id: entry_id }));
        }

        while let Some(nearest) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if nearest.score < worst && results.len() >= ef {
                break;
            }
            let neighbor_ids: Vec<NodeId> = match self.nodes.get(&nearest.id) {
                Some(n) if layer < n.neighbors.len() => n.neighbors[layer].iter().copied().collect(),
                _ => continue,
            };
            for nid in neighbor_ids {
                if !visited.insert(nid) {
                    continue;
                }
                let node = match self.nodes.get(&nid) {
                    Some(n) => n,
                    None => continue,
                };
                let score = cosine(query, &node.vector);
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                if results.len() < ef || score > worst {
                    candidates.push(Candidate { score, id: nid });
                    if !node.deleted {
                        results.push(Reverse(Candidate { score, id: nid }));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort();
        out.reverse();
        out
    }

    fn greedy_search_to_layer(&self, query: &[f32], entry_id: NodeId, from_layer: usize, to_layer: usize) -> NodeId {
        let mut current = entry_id;
        for layer in (to_layer..=from_layer).rev() {
            let mut improved = true;
            while improved {
                improved = false;
                let current_score = match self.nodes.get(&current) {
                    Some(n) => cosine(query, &n.vector),
                    None => break,
                };
                let mut best_score = current_score;
                let mut best_id = current;
                if let Some(node) = self.nodes.get(&current) {
                    if layer < node.neighbors.len() {
                        for &nid in &node.neighbors[layer] {
                            if let Some(n) = self.nodes.get(&nid) {
                                let score = cosine(query, &n.vector);
                                if score > best_score || (score == best_score && nid < best_id) {
                                    best_score = score;
                                    best_id = nid;
                                }
                            }
                        }
                    }
                }
                if best_id != current {
                    current = best_id;
                    improved = true;
                }
            }
        }
        current
    }

    /// Top-`k` nearest neighbors by ascending distance, excluding tombstoned ids.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(NodeId, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let entry_id = match self.entry_point {
            Some(id) => id,
            None => return Vec::new(),
        };
        if self.nodes.values().all(|n| n.deleted) {
            return Vec::new();
        }

        let mut current = entry_id;
        if self.max_level > 0 {
            current = self.greedy_search_to_layer(query, entry_id, self.max_level, 1);
        }
        let ef = self.config.ef_search.max(k);
        let candidates = self.search_layer(query, current, ef, 0);
        let results: Vec<(NodeId, f32)> = candidates
            .into_iter()
            .filter(|c| self.nodes.get(&c.id).is_some_and(|n| !n.deleted))
            .take(k)
            .map(|c| (c.id, 1.0 - c.score))
            .collect();
        tracing::debug!(k, found = results.len(), "hnsw search");
        results
    }

    /// Tombstone `id`; the graph structure is retained for its neighbors (§4.7).
    pub fn remove(&mut self, id: NodeId) -> bool {
        let was_alive = self.nodes.get(&id).is_some_and(|n| !n.deleted);
        if let Some(n) = self.nodes.get_mut(&id) {
            n.deleted = true;
        }
        if was_alive && self.entry_point == Some(id) {
            self.entry_point = self.nodes.iter().find(|(_, n)| !n.deleted).map(|(&id, _)| id);
            self.max_level = match self.entry_point {
                Some(ep) => self.nodes[&ep].neighbors.len().saturating_sub(1),
                None => 0,
            };
        }
        tracing::trace!(id, was_alive, "hnsw remove");
        was_alive
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| !n.deleted)
    }

    /// Count of non-tombstoned nodes.
    pub fn size(&self) -> usize {
        self.nodes.values().filter(|n| !n.deleted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn scenario_4_hnsw_orthogonal_distances() {
        let mut hnsw = Hnsw::new(HnswConfig::default());
        hnsw.add(0, unit(3, 0)).unwrap();
        hnsw.add(1, unit(3, 1)).unwrap();
        let results = hnsw.search(&unit(3, 0), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert!(results[0].1 <= 1e-2);
        assert_eq!(results[1].0, 1);
        assert!((results[1].1 - 1.0).abs() <= 1e-2);
    }

    #[test]
    fn invariant_6_self_lookup_returns_first() {
        let mut hnsw = Hnsw::new(HnswConfig::default());
        for i in 0..20u32 {
            let mut v = vec![0.0f32; 8];
            v[(i % 8) as usize] = 1.0;
            v[((i + 1) % 8) as usize] = 0.1 * i as f32;
            hnsw.add(i, v).unwrap();
        }
        let query = {
            let mut v = vec![0.0f32; 8];
            v[5 % 8] = 1.0;
            v[6 % 8] = 0.1 * 5.0;
            v
        };
        let results = hnsw.search(&query, 1);
        assert_eq!(results[0].0, 5);
        assert!(results[0].1 <= 1e-2);
    }

    #[test]
    fn duplicate_add_is_exists_error() {
        let mut hnsw = Hnsw::new(HnswConfig::default());
        hnsw.add(0, unit(3, 0)).unwrap();
        let err = hnsw.add(0, unit(3, 1)).unwrap_err();
        assert!(matches!(err, Error::Exists(_)));
    }

    #[test]
    fn removed_ids_are_excluded_from_results_but_graph_persists() {
        let mut hnsw = Hnsw::new(HnswConfig::default());
        hnsw.add(0, unit(3, 0)).unwrap();
        hnsw.add(1, unit(3, 1)).unwrap();
        hnsw.add(2, unit(3, 2)).unwrap();
        assert!(hnsw.remove(0));
        assert_eq!(hnsw.size(), 2);
        let results = hnsw.search(&unit(3, 0), 10);
        assert!(results.iter().all(|(id, _)| *id != 0));
    }

    #[test]
    fn empty_graph_returns_no_results() {
        let hnsw = Hnsw::new(HnswConfig::default());
        assert_eq!(hnsw.search(&unit(3, 0), 5), Vec::new());
    }

    #[test]
    fn contains_reflects_tombstone_state() {
        let mut hnsw = Hnsw::new(HnswConfig::default());
        hnsw.add(0, unit(3, 0)).unwrap();
        assert!(hnsw.contains(0));
        hnsw.remove(0);
        assert!(!hnsw.contains(0));
    }

    proptest::proptest! {
        /// Invariant 6, §8: searching with a vector that was indexed returns
        /// that id first, regardless of how many other random vectors share
        /// the graph.
        #[test]
        fn self_lookup_wins_among_random_neighbors(
            vectors in proptest::collection::vec(proptest::collection::vec(-1.0f32..1.0, 16), 2..30)
        ) {
            let mut hnsw = Hnsw::new(HnswConfig::default());
            for (i, v) in vectors.iter().enumerate() {
                // Skip near-zero vectors: cosine against them is ill-defined.
                if v.iter().any(|x| x.abs() > 1e-6) {
                    hnsw.add(i as u32, v.clone()).unwrap();
                }
            }
            let target = 0u32;
            if hnsw.contains(target) {
                let results = hnsw.search(&vectors[0], 1);
                proptest::prop_assert_eq!(results[0].0, target);
                proptest::prop_assert!(results[0].1 <= 1e-2);
            }
        }
    }
}
