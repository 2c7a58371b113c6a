//! Lexical and semantic search (§4.7-§4.9): the shared tokenizer, the
//! HNSW approximate nearest-neighbor graph, the BM25 inverted index, and
//! the fused search engine that composes them.

mod engine;
mod hnsw;
mod inverted_index;
mod tokenizer;

pub use engine::{apply_budget, Query, SearchConfig, SearchEngine, SearchHit};
pub use hnsw::{Hnsw, HnswConfig};
pub use inverted_index::InvertedIndex;
pub use tokenizer::{tokenize, tokenize_all};
