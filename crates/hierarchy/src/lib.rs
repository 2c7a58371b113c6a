//! Hierarchy (§4.5): binds `Relations` and `Embeddings` together with the
//! `node_meta` side file and an in-memory text cache, and exposes the
//! typed node-creation API the rest of the core builds on.
//!
//! No direct teacher analog exists at this exact granularity; grounded
//! in the teacher's general pattern of a facade type composing primitive
//! stores (`crates/engine/src/primitives/vector/mod.rs`'s `VectorStore`
//! wrapping a heap + index), generalized here to compose the relations
//! and embeddings column stores plus the metadata side file.

mod node_meta;
mod pooler;

pub use node_meta::{MetadataStore, NodeMeta};
pub use pooler::Pooler;

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;

use memcore::{Error, Level, NodeId, Result, EMBEDDING_DIM};
use mem_storage::{cosine_similarity, Embeddings, Relations};

/// Outcome of an idempotent create call (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    Created,
    Exists,
}

/// Snapshot assembled from `Relations` + `node_meta` (§4.5 `get_node`).
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    pub level: Level,
    pub parent: NodeId,
    pub first_child: NodeId,
    pub next_sibling: NodeId,
    pub embedding_idx: u32,
    pub created_at: u64,
    pub agent_id: String,
    pub session_id: String,
}

/// Binds one `Relations` and one `Embeddings`, plus node_meta and a text cache.
pub struct Hierarchy {
    relations: Relations,
    embeddings: Embeddings,
    meta: RwLock<MetadataStore>,
    text: RwLock<Vec<Option<Vec<u8>>>>,
    agents: RwLock<HashMap<String, NodeId>>,
    sessions: RwLock<HashMap<(NodeId, String), NodeId>>,
}

impl Hierarchy {
    pub fn create(capacity_per_level: u32) -> Hierarchy {
        Hierarchy {
            relations: Relations::create(capacity_per_level * 5),
            embeddings: Embeddings::create(capacity_per_level),
            meta: RwLock::new(MetadataStore::create()),
            text: RwLock::new(Vec::new()),
            agents: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_mapped(root: &Path, capacity_per_level: u32) -> Result<Hierarchy> {
        let relations = Relations::create_mapped(&root.join("relations"), capacity_per_level * 5)?;
        let embeddings = Embeddings::create_mapped(&root.join("embeddings"), capacity_per_level)?;
        let meta = MetadataStore::create_mapped(&root.join("metadata.dat"))?;
        Ok(Hierarchy {
            relations,
            embeddings,
            meta: RwLock::new(meta),
            text: RwLock::new(Vec::new()),
            agents: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn open_mapped(root: &Path) -> Result<Hierarchy> {
        let relations = Relations::open_mapped(&root.join("relations"))?;
        let embeddings = Embeddings::open_mapped(&root.join("embeddings"))?;
        let meta = MetadataStore::open_mapped(&root.join("metadata.dat"))?;

        let mut agents = HashMap::new();
        let mut sessions = HashMap::new();
        for id in 0..relations.count() {
            let level = relations.level(id)?;
            let m = meta.get(id)?;
            match level {
                Level::Agent => {
                    agents.insert(m.agent_id.clone(), id);
                }
                Level::Session => {
                    let parent = relations.parent(id)?;
                    sessions.insert((parent, m.session_id.clone()), id);
                }
                _ => {}
            }
        }

        Ok(Hierarchy {
            relations,
            embeddings,
            meta: RwLock::new(meta),
            text: RwLock::new(Vec::new()),
            agents: RwLock::new(agents),
            sessions: RwLock::new(sessions),
        })
    }

    fn alloc_with_meta(&self, level: Level, agent_id: &str, session_id: &str, created_at: u64) -> Result<NodeId> {
        let id = self.relations.alloc_node()?;
        self.relations.set_level(id, level)?;
        let embedding_idx = self.embeddings.alloc(level)?;
        self.meta.write().set(
            id,
            NodeMeta { created_at, embedding_idx, agent_id: agent_id.to_string(), session_id: session_id.to_string() },
        );
        self.ensure_text_slot(id);
        Ok(id)
    }

    fn ensure_text_slot(&self, id: NodeId) {
        let mut text = self.text.write();
        let needed = id as usize + 1;
        if text.len() < needed {
            text.resize_with(needed, || None);
        }
    }

    /// Idempotent top-level agent creation (§4.5).
    pub fn create_agent(&self, agent_id: &str, now: u64) -> Result<(NodeId, CreateStatus)> {
        memcore::validate_agent_id(agent_id)?;
        if let Some(&id) = self.agents.read().get(agent_id) {
            return Ok((id, CreateStatus::Exists));
        }
        let id = self.alloc_with_meta(Level::Agent, agent_id, "", now)?;
        self.agents.write().insert(agent_id.to_string(), id);
        tracing::debug!(id, agent_id, "hierarchy create_agent");
        Ok((id, CreateStatus::Created))
    }

    /// Idempotent session creation under `agent_node` (§4.5).
    pub fn create_session(&self, agent_node: NodeId, session_id: &str, now: u64) -> Result<(NodeId, CreateStatus)> {
        memcore::validate_session_id(session_id)?;
        let key = (agent_node, session_id.to_string());
        if let Some(&id) = self.sessions.read().get(&key) {
            return Ok((id, CreateStatus::Exists));
        }
        let agent_id = self.meta.read().get(agent_node)?.agent_id.clone();
        let id = self.alloc_with_meta(Level::Session, &agent_id, session_id, now)?;
        self.relations.link_child(agent_node, id)?;
        self.sessions.write().insert(key, id);
        tracing::debug!(id, agent_node, session_id, "hierarchy create_session");
        Ok((id, CreateStatus::Created))
    }

    /// Generic child creation at an arbitrary `level < level(parent)` (§4.5).
    pub fn create_child(&self, parent: NodeId, level: Level, now: u64) -> Result<NodeId> {
        let parent_level = self.relations.level(parent)?;
        if level >= parent_level {
            return Err(Error::InvalidLevel { child: level as u8, parent: parent_level as u8 });
        }
        let parent_meta = self.meta.read().get(parent)?.clone();
        let id = self.alloc_with_meta(level, &parent_meta.agent_id, &parent_meta.session_id, now)?;
        self.relations.link_child(parent, id)?;
        tracing::trace!(id, parent, level = ?level, "hierarchy create_child");
        Ok(id)
    }

    fn create_typed(&self, parent: NodeId, expected_parent: Level, child: Level, now: u64) -> Result<NodeId> {
        let parent_level = self.relations.level(parent)?;
        if parent_level != expected_parent {
            return Err(Error::InvalidLevel { child: child as u8, parent: parent_level as u8 });
        }
        self.create_child(parent, child, now)
    }

    pub fn create_message(&self, session: NodeId, now: u64) -> Result<NodeId> {
        self.create_typed(session, Level::Session, Level::Message, now)
    }

    pub fn create_block(&self, message: NodeId, now: u64) -> Result<NodeId> {
        self.create_typed(message, Level::Message, Level::Block, now)
    }

    pub fn create_statement(&self, block: NodeId, now: u64) -> Result<NodeId> {
        self.create_typed(block, Level::Block, Level::Statement, now)
    }

    pub fn get_node(&self, id: NodeId) -> Result<NodeInfo> {
        let level = self.relations.level(id)?;
        let parent = self.relations.parent(id)?;
        let first_child = self.relations.first_child(id)?;
        let next_sibling = self.relations.next_sibling(id)?;
        let meta = self.meta.read().get(id)?.clone();
        Ok(NodeInfo {
            id,
            level,
            parent,
            first_child,
            next_sibling,
            embedding_idx: meta.embedding_idx,
            created_at: meta.created_at,
            agent_id: meta.agent_id,
            session_id: meta.session_id,
        })
    }

    pub fn set_text(&self, id: NodeId, bytes: &[u8]) -> Result<()> {
        memcore::validate_text(bytes)?;
        self.ensure_text_slot(id);
        self.text.write()[id as usize] = Some(bytes.to_vec());
        Ok(())
    }

    pub fn get_text(&self, id: NodeId) -> Result<Vec<u8>> {
        self.text
            .read()
            .get(id as usize)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| Error::NotFound(format!("text for node {id}")))
    }

    pub fn set_embedding(&self, id: NodeId, vector: &[f32]) -> Result<()> {
        let level = self.relations.level(id)?;
        let idx = self.meta.read().get(id)?.embedding_idx;
        self.embeddings.set(level, idx, vector)
    }

    pub fn get_embedding(&self, id: NodeId) -> Result<[f32; EMBEDDING_DIM]> {
        let level = self.relations.level(id)?;
        let idx = self.meta.read().get(id)?.embedding_idx;
        self.embeddings.get(level, idx)
    }

    /// Cosine similarity between `a` and `b`; `0.0` if their levels differ (§4.5).
    pub fn similarity(&self, a: NodeId, b: NodeId) -> Result<f32> {
        let level_a = self.relations.level(a)?;
        let level_b = self.relations.level(b)?;
        if level_a != level_b {
            return Ok(0.0);
        }
        let va = self.get_embedding(a)?;
        let vb = self.get_embedding(b)?;
        Ok(cosine_similarity(&va, &vb))
    }

    /// Visit every session-level node, streaming `(id, agent_id, session_id)`.
    /// Stops early if `cb` returns `false`.
    pub fn iter_sessions(&self, mut cb: impl FnMut(NodeId, &str, &str) -> bool) -> Result<()> {
        for id in 0..self.relations.count() {
            if self.relations.level(id)? != Level::Session {
                continue;
            }
            let meta = self.meta.read().get(id)?.clone();
            if !cb(id, &meta.agent_id, &meta.session_id) {
                break;
            }
        }
        Ok(())
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.relations.children(id)
    }

    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.relations.ancestors(id)
    }

    pub fn level(&self, id: NodeId) -> Result<Level> {
        self.relations.level(id)
    }

    pub fn sync(&self) -> Result<()> {
        self.relations.sync()?;
        self.embeddings.sync()?;
        self.meta.read().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_agent_is_idempotent() {
        let hier = Hierarchy::create(16);
        let (id1, status1) = hier.create_agent("agent-1", 1).unwrap();
        assert_eq!(status1, CreateStatus::Created);
        let (id2, status2) = hier.create_agent("agent-1", 2).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(status2, CreateStatus::Exists);
    }

    #[test]
    fn create_session_is_idempotent_per_agent() {
        let hier = Hierarchy::create(16);
        let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
        let (s1, status1) = hier.create_session(agent, "session-1", 1).unwrap();
        assert_eq!(status1, CreateStatus::Created);
        let (s2, status2) = hier.create_session(agent, "session-1", 2).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(status2, CreateStatus::Exists);
    }

    #[test]
    fn create_child_rejects_invalid_level() {
        let hier = Hierarchy::create(16);
        let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
        let (session, _) = hier.create_session(agent, "session-1", 1).unwrap();
        let err = hier.create_child(session, Level::Agent, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidLevel { .. }));
    }

    #[test]
    fn typed_helpers_enforce_exact_parent_level() {
        let hier = Hierarchy::create(16);
        let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
        let (session, _) = hier.create_session(agent, "session-1", 1).unwrap();
        let message = hier.create_message(session, 1).unwrap();
        let block = hier.create_block(message, 1).unwrap();
        let statement = hier.create_statement(block, 1).unwrap();
        assert_eq!(hier.level(statement).unwrap(), Level::Statement);

        let err = hier.create_block(session, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidLevel { .. }));
    }

    #[test]
    fn set_text_and_get_text_round_trip() {
        let hier = Hierarchy::create(16);
        let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
        hier.set_text(agent, b"hello world").unwrap();
        assert_eq!(hier.get_text(agent).unwrap(), b"hello world");
    }

    #[test]
    fn similarity_is_zero_across_levels() {
        let hier = Hierarchy::create(16);
        let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
        let (session, _) = hier.create_session(agent, "session-1", 1).unwrap();
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        hier.set_embedding(agent, &v).unwrap();
        hier.set_embedding(session, &v).unwrap();
        assert_eq!(hier.similarity(agent, session).unwrap(), 0.0);
    }

    #[test]
    fn iter_sessions_visits_every_session_and_can_stop_early() {
        let hier = Hierarchy::create(16);
        let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
        hier.create_session(agent, "s1", 1).unwrap();
        hier.create_session(agent, "s2", 1).unwrap();

        let mut seen = Vec::new();
        hier.iter_sessions(|id, a, s| {
            seen.push((id, a.to_string(), s.to_string()));
            true
        })
        .unwrap();
        assert_eq!(seen.len(), 2);

        let mut first_only = Vec::new();
        hier.iter_sessions(|id, _, _| {
            first_only.push(id);
            false
        })
        .unwrap();
        assert_eq!(first_only.len(), 1);
    }

    #[test]
    fn mapped_hierarchy_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let agent_id;
        {
            let hier = Hierarchy::create_mapped(root, 16).unwrap();
            let (agent, _) = hier.create_agent("agent-1", 1).unwrap();
            agent_id = agent;
            hier.create_session(agent, "session-1", 2).unwrap();
            hier.sync().unwrap();
        }
        let hier = Hierarchy::open_mapped(root).unwrap();
        let (reopened, status) = hier.create_session(agent_id, "session-1", 3).unwrap();
        assert_eq!(status, CreateStatus::Exists);
        let info = hier.get_node(reopened).unwrap();
        assert_eq!(info.session_id, "session-1");
    }
}
