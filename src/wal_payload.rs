//! Typed payloads carried inside WAL records (§4.2: "opaque bytes;
//! interpretation determined by op_type"). The facade is the only writer
//! and reader of these shapes, so they live here rather than in `mem-wal`
//! itself — grounded in the teacher's pattern of keeping wire payload
//! structs next to the component that interprets them rather than in the
//! generic log crate.
//!
//! Relations, node metadata, and embeddings are themselves durable
//! (mapped files under §6's file layout), so a reopened [`Hierarchy`]
//! already reflects every synced mutation without help from the WAL.
//! What the WAL restores on replay is the state nothing else persists:
//! the hierarchy's text cache, the in-memory search indexes, and the
//! session registry.

use serde::{Deserialize, Serialize};

use memcore::NodeId;

/// Restores `Hierarchy::set_text` for a node whose text cache does not
/// survive a reopen.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeInsertPayload {
    pub id: NodeId,
    pub text: Vec<u8>,
}

/// Records a relation mutation (a node's creation under its parent) for
/// WAL sequence-ordering. Relations are themselves durable via the mapped
/// `parent`/`first_child`/`next_sibling`/`level` arenas, so replay does
/// not need to reapply this — it exists so every write path that mutates
/// the hierarchy gets a sequence number, per §5's total-ordering guarantee.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelationSetPayload {
    pub id: NodeId,
    pub parent_id: NodeId,
    pub level: u8,
}

/// Records an embedding write (leaf embed or ancestor pooling) for WAL
/// sequence-ordering. The vector itself is not carried — like
/// `IndexInsertPayload`, it is read back from the already-durable
/// `Embeddings` arena when needed.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingSetPayload {
    pub id: NodeId,
    pub level: u8,
}

/// Restores a node's entry in the search engine. The embedding vector
/// itself is not carried here — it is read back from the already-durable
/// `Embeddings` arena via `Hierarchy::get_embedding`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexInsertPayload {
    pub id: NodeId,
    pub tokens: Vec<String>,
    pub level: u8,
    pub created_at: u64,
}

/// Restores a `SessionRegistry::register` call.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreatePayload {
    pub session_id: String,
    pub agent_id: String,
    pub root_node_id: NodeId,
    pub created_at: u64,
}

/// Restores a `SessionRegistry::update_content` call.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionUpdatePayload {
    pub session_id: String,
    pub text: String,
    pub now: u64,
}
