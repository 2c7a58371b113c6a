//! Relations (C3) and Embeddings (C4) column stores.

pub mod embeddings;
pub mod relations;

pub use embeddings::{cosine_similarity, l2_normalize, Embeddings};
pub use relations::Relations;
