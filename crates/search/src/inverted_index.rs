//! Inverted index with Okapi BM25 scoring (§4.8). Grounded in the
//! teacher's `crates/engine/src/search/index.rs`: `PostingEntry`
//! (doc_id/tf/doc_len) and the `tf_comp` formula are reused verbatim;
//! the teacher's segmented active/sealed-mmap storage has no
//! counterpart here since §4.8 describes a single in-memory index with
//! no seal threshold.

use std::collections::HashMap;

use memcore::{NodeId, BM25_B, BM25_K1};

#[derive(Debug, Clone, Copy)]
struct PostingEntry {
    doc_id: NodeId,
    tf: u32,
}

#[derive(Default)]
struct PostingList {
    entries: Vec<PostingEntry>,
}

impl PostingList {
    fn add(&mut self, doc_id: NodeId, tf: u32) {
        self.entries.push(PostingEntry { doc_id, tf });
    }

    fn remove(&mut self, doc_id: NodeId) {
        self.entries.retain(|e| e.doc_id != doc_id);
    }
}

/// In-memory inverted index, BM25-scored (§4.8).
#[derive(Default)]
pub struct InvertedIndex {
    postings: HashMap<String, PostingList>,
    doc_lengths: HashMap<NodeId, u32>,
    tombstones: std::collections::HashSet<NodeId>,
    total_len: u64,
}

impl InvertedIndex {
    pub fn new() -> InvertedIndex {
        InvertedIndex::default()
    }

    fn avg_doc_len(&self) -> f32 {
        let live = self.doc_lengths.len().saturating_sub(self.tombstones.len());
        if live == 0 {
            0.0
        } else {
            self.total_len as f32 / live as f32
        }
    }

    /// Index `doc_id` under its pre-tokenized `terms` (§4.8). Re-indexing
    /// an existing `doc_id` first removes its prior postings.
    pub fn index(&mut self, doc_id: NodeId, terms: &[String]) {
        self.remove(doc_id);
        self.tombstones.remove(&doc_id);

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for term in terms {
            *counts.entry(term.as_str()).or_insert(0) += 1;
        }
        let doc_len = terms.len() as u32;
        for (term, tf) in counts {
            self.postings.entry(term.to_string()).or_default().add(doc_id, tf);
        }
        self.doc_lengths.insert(doc_id, doc_len);
        self.total_len += doc_len as u64;
        tracing::trace!(doc_id, doc_len, "inverted index indexed");
    }

    /// Tombstone `doc_id`, removing it from every posting list it appears in.
    pub fn remove(&mut self, doc_id: NodeId) {
        if let Some(len) = self.doc_lengths.remove(&doc_id) {
            self.total_len = self.total_len.saturating_sub(len as u64);
        }
        for postings in self.postings.values_mut() {
            postings.remove(doc_id);
        }
        self.tombstones.insert(doc_id);
        tracing::trace!(doc_id, "inverted index removed");
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_lengths.len().saturating_sub(self.tombstones.len()) as f32;
        let df = self.postings.get(term).map(|p| p.entries.len()).unwrap_or(0) as f32;
        if df == 0.0 {
            return 0.0;
        }
        (((n - df + 0.5) / (df + 0.5)) + 1.0).ln()
    }

    fn score_term(&self, term: &str, doc_id: NodeId, tf: u32) -> f32 {
        let avg_dl = self.avg_doc_len().max(1.0);
        let dl = *self.doc_lengths.get(&doc_id).unwrap_or(&0) as f32;
        let idf = self.idf(term);
        let tf = tf as f32;
        let tf_comp = (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avg_dl));
        idf * tf_comp
    }

    /// Documents containing **every** query term, ranked by summed BM25 score
    /// (§4.8 `search_all`, an AND query).
    pub fn search_all(&self, terms: &[String], limit: usize) -> Vec<(NodeId, f32)> {
        if terms.is_empty() {
            return Vec::new();
        }
        let lists: Vec<&PostingList> = match terms.iter().map(|t| self.postings.get(t)).collect::<Option<Vec<_>>>() {
            Some(l) => l,
            None => return Vec::new(),
        };

        let mut scores: HashMap<NodeId, f32> = HashMap::new();
        let (shortest_idx, shortest) = lists
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| l.entries.len())
            .expect("terms is non-empty");

        for entry in &shortest.entries {
            let doc_id = entry.doc_id;
            if self.tombstones.contains(&doc_id) {
                continue;
            }
            let mut in_all = true;
            let mut total = 0.0f32;
            for (i, term) in terms.iter().enumerate() {
                if i == shortest_idx {
                    total += self.score_term(term, doc_id, entry.tf);
                    continue;
                }
                match lists[i].entries.iter().find(|e| e.doc_id == doc_id) {
                    Some(e) => total += self.score_term(term, doc_id, e.tf),
                    None => {
                        in_all = false;
                        break;
                    }
                }
            }
            if in_all {
                scores.insert(doc_id, total);
            }
        }

        rank(scores, limit)
    }

    /// Documents containing **any** query term, ranked by summed BM25 score
    /// (§4.8 `search_any`, an OR query).
    pub fn search_any(&self, terms: &[String], limit: usize) -> Vec<(NodeId, f32)> {
        let mut scores: HashMap<NodeId, f32> = HashMap::new();
        for term in terms {
            let Some(postings) = self.postings.get(term) else { continue };
            for entry in &postings.entries {
                if self.tombstones.contains(&entry.doc_id) {
                    continue;
                }
                *scores.entry(entry.doc_id).or_insert(0.0) += self.score_term(term, entry.doc_id, entry.tf);
            }
        }
        rank(scores, limit)
    }

    /// Number of non-deleted documents containing `term` (for external TF-IDF
    /// consumers that share this index's document-frequency bookkeeping, §9).
    pub fn doc_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map(|p| p.entries.len()).unwrap_or(0)
    }

    /// Count of non-deleted documents (the `N` in BM25's IDF, shared with §9's
    /// TF-IDF keyword extraction).
    pub fn total_docs(&self) -> usize {
        self.doc_lengths.len().saturating_sub(self.tombstones.len())
    }

    pub fn contains(&self, doc_id: NodeId) -> bool {
        self.doc_lengths.contains_key(&doc_id) && !self.tombstones.contains(&doc_id)
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len().saturating_sub(self.tombstones.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn rank(scores: HashMap<NodeId, f32>, limit: usize) -> Vec<(NodeId, f32)> {
    let mut out: Vec<(NodeId, f32)> = scores.into_iter().collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    out.truncate(limit);
    out
}
