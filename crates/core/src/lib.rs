//! Shared types, error kinds, and limits for the memory store crates.
//!
//! Every other crate in the workspace depends on this one for `NodeId`,
//! `Level`, `Error`, and the numeric constants pinned by the external
//! interface contract (embedding dimension, id length caps, WAL payload
//! cap, BM25/HNSW defaults).

pub mod error;
pub mod limits;
pub mod types;
pub mod wal_op;

pub use error::{Error, Result};
pub use limits::*;
pub use types::{Level, NodeId, INVALID};
pub use wal_op::WalOp;
