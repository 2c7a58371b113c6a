//! Crate-wide error type.
//!
//! One variant per error kind named in §7; each carries the structured
//! context a caller needs instead of an opaque string, following the
//! teacher's `thiserror`-derived `Error` (crates/core/src/error.rs).

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("{component} at capacity {capacity}")]
    Capacity { component: &'static str, capacity: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("invalid level: child level {child} is not strictly less than parent level {parent}")]
    InvalidLevel { child: u8, parent: u8 },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corruption in {file}: {reason}")]
    Corruption { file: PathBuf, reason: String },

    #[error("magic mismatch in {file}: expected {expected:#x}, found {found:#x}")]
    MagicMismatch { file: PathBuf, expected: u32, found: u32 },

    #[error("version mismatch in {file}: expected {expected}, found {found}")]
    VersionMismatch { file: PathBuf, expected: u32, found: u32 },

    #[error("embedder failed: {0}")]
    EmbedderFailure(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io { path: path.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, Error::Exists(_))
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::Capacity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_their_variant() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(Error::Exists("x".into()).is_exists());
        assert!(Error::Capacity { component: "arena", capacity: 10 }.is_capacity());
        assert!(!Error::Argument("x".into()).is_not_found());
    }
}
