//! `Embedder` collaborator (§4.12): the interface a real model-backed
//! embedder implements, plus the deterministic hash-based fallback the
//! core is allowed to own.
//!
//! Grounded in the teacher's `crates/intelligence/src/embed/mod.rs` for
//! the lazy-loaded, cached-failure collaborator shape
//! (`OnceCell<Result<Arc<Model>, String>>`); generalized here to a plain
//! trait object since this crate owns only the interface and the
//! deterministic fallback, not model loading.

use memcore::{Error, Result, BATCH_SIZE, EMBEDDING_DIM};
use mem_search::tokenize_all;

/// Produces unit-length embeddings from text. Implementations must be
/// deterministic: the same input text always yields the same vector.
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Deterministic pseudo-embedding: tokenize, hash each token with a
/// fixed-seed hasher, scatter-add into `D` buckets weighted by token
/// frequency, L2-normalize. Not meaningful for semantic similarity;
/// exists so the core and its tests can run without a real model and so
/// a real embedder's `EmbedderFailure` has a deterministic escape hatch
/// to fall back to (§6, §9).
pub struct HashEmbedder {
    seed: u64,
}

impl HashEmbedder {
    pub fn new() -> HashEmbedder {
        HashEmbedder { seed: 0x9e3779b97f4a7c15 }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize_all(text);
        let mut buckets = vec![0.0f32; EMBEDDING_DIM];
        for token in &tokens {
            let h = self.hash_token(token);
            let bucket = (h % EMBEDDING_DIM as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            buckets[bucket] += sign;
        }
        l2_normalize(&mut buckets);
        buckets
    }

    fn hash_token(&self, token: &str) -> u64 {
        let mut h = self.seed;
        for byte in token.as_bytes() {
            h ^= *byte as u64;
            h = h.wrapping_mul(0x100000001b3);
            h ^= h >> 33;
        }
        h
    }
}

impl Default for HashEmbedder {
    fn default() -> HashEmbedder {
        HashEmbedder::new()
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            for text in chunk {
                out.push(self.embed_one(text));
            }
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Wraps a fallible primary embedder; on `EmbedderFailure` falls back to
/// `HashEmbedder` so callers always get a result (§6, §9). The fallback
/// is strictly for continued operation, not production search quality.
pub struct FallbackEmbedder<E: Embedder> {
    primary: E,
    fallback: HashEmbedder,
}

impl<E: Embedder> FallbackEmbedder<E> {
    pub fn new(primary: E) -> FallbackEmbedder<E> {
        FallbackEmbedder { primary, fallback: HashEmbedder::new() }
    }
}

impl<E: Embedder> Embedder for FallbackEmbedder<E> {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        match self.primary.embed_batch(texts) {
            Ok(vectors) => Ok(vectors),
            Err(err) => {
                tracing::warn!(error = %err, "embedder failed, falling back to hash embedder");
                self.fallback.embed_batch(texts)
            }
        }
    }

    fn dimension(&self) -> usize {
        self.primary.dimension()
    }
}
