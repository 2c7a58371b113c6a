//! Numeric and identifier constants pinned by §6, plus the validation
//! helpers that enforce them. Grounded in the teacher's
//! `crates/core/src/limits.rs` (`Limits` struct + `validate_*` free
//! functions returning a typed error rather than panicking).

use crate::error::{Error, Result};

/// Fixed embedding dimension `D`.
pub const EMBEDDING_DIM: usize = 384;

/// Maximum bytes of ingested text content per node.
pub const MAX_TEXT_LEN: usize = 65_536;

/// Maximum length (excluding NUL terminator) of an agent id string.
pub const MAX_AGENT_ID_LEN: usize = 64;

/// Maximum length (excluding NUL terminator) of a session id string.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Embedder batch chunk size.
pub const BATCH_SIZE: usize = 32;

/// Hard cap on a single WAL record's payload length.
pub const MAX_WAL_DATA_LEN: usize = 64 * 1024 * 1024;

/// Okapi BM25 parameters (§4.8).
pub const BM25_K1: f32 = 1.2;
pub const BM25_B: f32 = 0.75;

/// HNSW defaults (§4.7).
pub const HNSW_M: usize = 16;
pub const HNSW_EF_CONSTRUCTION: usize = 200;
pub const HNSW_EF_SEARCH: usize = 50;

/// Recency half-life, in nanoseconds (§4.9, design note confirms 7 days).
pub const RECENCY_HALF_LIFE_NANOS: f64 = 7.0 * 24.0 * 3600.0 * 1_000_000_000.0;

/// Search fusion weight defaults (§4.9).
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.7;
pub const DEFAULT_EXACT_WEIGHT: f32 = 0.3;
pub const DEFAULT_RELEVANCE_WEIGHT: f32 = 0.6;
pub const DEFAULT_RECENCY_WEIGHT: f32 = 0.3;
pub const DEFAULT_LEVEL_WEIGHT: f32 = 0.1;
pub const DEFAULT_MAX_CANDIDATES: usize = 100;
pub const DEFAULT_TOKEN_BUDGET: u32 = 4096;

/// Keyword extractor output caps (§4.11).
pub const MAX_KEYWORDS: usize = 32;
pub const MAX_KEYWORD_LEN: usize = 64;
pub const MAX_IDENTIFIERS: usize = 128;
pub const MAX_FILE_PATHS: usize = 32;

pub fn validate_agent_id(id: &str) -> Result<()> {
    validate_id_len(id, MAX_AGENT_ID_LEN, "agent_id")
}

pub fn validate_session_id(id: &str) -> Result<()> {
    validate_id_len(id, MAX_SESSION_ID_LEN, "session_id")
}

fn validate_id_len(id: &str, max: usize, field: &'static str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Argument(format!("{field} must not be empty")));
    }
    if id.len() > max {
        return Err(Error::Argument(format!(
            "{field} exceeds {max} bytes (got {})",
            id.len()
        )));
    }
    Ok(())
}

pub fn validate_text(text: &[u8]) -> Result<()> {
    if text.len() > MAX_TEXT_LEN {
        return Err(Error::Argument(format!(
            "text exceeds MAX_TEXT_LEN={MAX_TEXT_LEN} (got {})",
            text.len()
        )));
    }
    Ok(())
}

pub fn validate_wal_payload_len(len: usize) -> Result<()> {
    if len > MAX_WAL_DATA_LEN {
        return Err(Error::Corruption {
            file: "wal/operations.log".into(),
            reason: format!("declared payload length {len} exceeds MAX_WAL_DATA_LEN={MAX_WAL_DATA_LEN}"),
        });
    }
    Ok(())
}
