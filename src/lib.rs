//! # memstore
//!
//! A persistent, hierarchical memory store for conversational AI agents.
//! Ingested text is organized as a five-level tree (agent → session →
//! message → block → statement, §3), embedded into fixed-dimensional
//! vectors, and later retrieved by fusing approximate-nearest-neighbor
//! vector search with BM25 lexical search, recency, and a hierarchy-level
//! boost (§4.9), subject to a token budget.
//!
//! This crate wires together the lower-level components — `mem_hierarchy`,
//! `mem_search`, `mem_session`, `mem_embedder`, and `mem_wal` — behind one
//! entry point, [`MemoryStore`] (§4.13), that a caller (an RPC façade, a
//! test, a CLI) constructs and drives through two operations:
//! [`MemoryStore::ingest`] and [`MemoryStore::query`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use memstore::{Filters, MemoryStore, MemoryStoreConfig};
//! use mem_embedder::HashEmbedder;
//!
//! fn main() -> memcore::Result<()> {
//!     let store = MemoryStore::open(
//!         std::path::Path::new("./agent-memory"),
//!         MemoryStoreConfig::default(),
//!         Arc::new(HashEmbedder::new()),
//!     )?;
//!
//!     let ack = store.ingest("agent-1", "session-1", "user", "Hello there. How are you?")?;
//!     assert!(ack.new_session);
//!
//!     let _hits = store.query("hello", Filters::default())?;
//!     Ok(())
//! }
//! ```

mod segment;
mod wal_payload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use memcore::{Error, Level, NodeId, Result, WalOp, INVALID};
use mem_embedder::Embedder;
use mem_hierarchy::{CreateStatus, Hierarchy, Pooler};
use mem_search::{Query, SearchConfig, SearchEngine, SearchHit};
use mem_session::SessionRegistry;
use mem_wal::{DurabilityMode, Wal};

use wal_payload::{
    EmbeddingSetPayload, IndexInsertPayload, NodeInsertPayload, RelationSetPayload, SessionCreatePayload,
    SessionUpdatePayload,
};

/// Recognized options for the inverted index (§9 Configuration surfaces).
/// `max_tokens` is the only one this façade currently enforces (by capping
/// the tokenizer at ingest time); `max_documents`/`max_token_len` are
/// accepted for a future `InvertedIndex` capacity check but the in-memory
/// index of §4.8 has no such cap today.
#[derive(Debug, Clone)]
pub struct InvertedIndexConfig {
    pub max_tokens: usize,
    pub max_documents: usize,
    pub max_token_len: usize,
}

impl Default for InvertedIndexConfig {
    fn default() -> InvertedIndexConfig {
        InvertedIndexConfig { max_tokens: 4096, max_documents: 1_000_000, max_token_len: 64 }
    }
}

/// Recognized options for the Embedder collaborator (§9 Configuration
/// surfaces). The façade does not construct the embedder itself (callers
/// hand in an already-built `Arc<dyn Embedder>`), so this struct is
/// informational context a caller's own embedder construction can read.
#[derive(Debug, Clone, Default)]
pub struct EmbedderConfig {
    pub model_path: Option<PathBuf>,
    pub batch_size: usize,
    pub max_seq_len: usize,
}

/// Aggregates every per-component config surface named in §9 into the one
/// struct `MemoryStore::open` needs.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Node capacity reserved per hierarchy level when creating a fresh store.
    pub capacity_per_level: u32,
    pub durability: DurabilityMode,
    pub search: SearchConfig,
    pub inverted_index: InvertedIndexConfig,
    pub embedder: EmbedderConfig,
}

impl Default for MemoryStoreConfig {
    fn default() -> MemoryStoreConfig {
        MemoryStoreConfig {
            capacity_per_level: 1 << 20,
            durability: DurabilityMode::Batched { batch_size: 32 },
            search: SearchConfig::default(),
            inverted_index: InvertedIndexConfig::default(),
            embedder: EmbedderConfig::default(),
        }
    }
}

/// Restricts a [`MemoryStore::query`] call (§4.9's `[min_level, max_level]`
/// plus the façade-level agent/session scoping no single lower component owns).
#[derive(Debug, Clone)]
pub struct Filters {
    pub min_level: Level,
    pub max_level: Level,
    pub k: usize,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

impl Default for Filters {
    fn default() -> Filters {
        Filters { min_level: Level::Statement, max_level: Level::Agent, k: 10, agent_id: None, session_id: None }
    }
}

/// The `{message_id, sequence_num, new_session}` contract the outer
/// JSON-RPC façade (out of scope) would serialize directly (§4.13, §8
/// scenario 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestAck {
    pub message_id: NodeId,
    pub sequence_num: u64,
    pub new_session: bool,
}

/// Owns one instance of every component (§4.13) and implements the two
/// end-to-end data flows of §2: ingest and query.
pub struct MemoryStore {
    hierarchy: Hierarchy,
    search: RwLock<SearchEngine>,
    sessions: SessionRegistry,
    wal: Wal,
    embedder: Arc<dyn Embedder>,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    /// Opens or creates the file layout of §6 under `root`, replays the WAL
    /// to rebuild the state nothing else persists (the hierarchy's text
    /// cache, the search indexes, and the session registry — relations,
    /// node metadata, and embeddings are themselves durable via mapped
    /// files and need no replay), and returns a ready store.
    pub fn open(root: &Path, config: MemoryStoreConfig, embedder: Arc<dyn Embedder>) -> Result<MemoryStore> {
        std::fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        let metadata_path = root.join("metadata.dat");
        let hierarchy = if metadata_path.exists() {
            Hierarchy::open_mapped(root)?
        } else {
            Hierarchy::create_mapped(root, config.capacity_per_level)?
        };

        let wal = Wal::open(&root.join("wal").join("operations.log"), config.durability)?;
        let search = RwLock::new(SearchEngine::new(config.search.clone()));
        let sessions = SessionRegistry::new();

        wal.replay(0, |record| {
            match record.op {
                WalOp::NodeInsert => {
                    let payload: NodeInsertPayload = decode(&record.payload, wal.path())?;
                    hierarchy.set_text(payload.id, &payload.text)?;
                }
                WalOp::IndexInsert => {
                    let payload: IndexInsertPayload = decode(&record.payload, wal.path())?;
                    let level = Level::from_u8(payload.level).ok_or_else(|| Error::Corruption {
                        file: wal.path().to_path_buf(),
                        reason: format!("unknown level tag {}", payload.level),
                    })?;
                    let vector = hierarchy.get_embedding(payload.id)?;
                    search.write().index(payload.id, &vector, &payload.tokens, level, payload.created_at)?;
                }
                WalOp::SessionCreate => {
                    let payload: SessionCreatePayload = decode(&record.payload, wal.path())?;
                    match sessions.register(&payload.session_id, &payload.agent_id, payload.root_node_id, payload.created_at)
                    {
                        Ok(()) | Err(Error::Exists(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                // Relations and embeddings are durable via mapped files (§6);
                // these records exist only to carry a WAL sequence number for
                // the write that produced them (§5's total-ordering guarantee)
                // and need no replay action.
                WalOp::RelationSet | WalOp::EmbeddingSet => {}
                WalOp::SessionUpdate => {
                    let payload: SessionUpdatePayload = decode(&record.payload, wal.path())?;
                    let search_guard = search.read();
                    sessions.update_content(&payload.session_id, &payload.text, search_guard.inverted(), payload.now)?;
                }
                _ => {}
            }
            Ok(())
        })?;

        tracing::info!(root = %root.display(), "memory store opened");
        Ok(MemoryStore { hierarchy, search, sessions, wal, embedder, config })
    }

    /// Implements the ingest data flow of §2: creates/looks up the agent
    /// and session nodes, splits `content` into message/block/statement
    /// nodes, extracts session metadata, embeds and pools, updates the
    /// search indexes, and WAL-records each mutation before acknowledging.
    pub fn ingest(&self, agent_id: &str, session_id: &str, role: &str, content: &str) -> Result<IngestAck> {
        memcore::validate_text(content.as_bytes())?;
        let now = now_nanos();

        let (agent_node, agent_status) = self.hierarchy.create_agent(agent_id, now)?;
        if agent_status == CreateStatus::Created {
            self.record_relation_set(agent_node, INVALID, Level::Agent)?;
        }
        let (session_node, session_status) = self.hierarchy.create_session(agent_node, session_id, now)?;
        let new_session = session_status == CreateStatus::Created;
        if new_session {
            self.record_relation_set(session_node, agent_node, Level::Session)?;
            self.record_session_create(session_id, agent_id, session_node, now)?;
        }

        let message_node = self.hierarchy.create_message(session_node, now)?;
        self.record_relation_set(message_node, session_node, Level::Message)?;
        self.record_node_text(message_node, role.as_bytes())?;

        let mut leaf_ids = Vec::new();
        let mut leaf_texts: Vec<String> = Vec::new();
        let mut block_ids: Vec<(NodeId, String)> = Vec::new();

        for block_text in segment::split_blocks(content) {
            let block_node = self.hierarchy.create_block(message_node, now)?;
            self.record_relation_set(block_node, message_node, Level::Block)?;
            self.record_node_text(block_node, block_text.as_bytes())?;

            for statement_text in segment::split_statements(&block_text) {
                let statement_node = self.hierarchy.create_statement(block_node, now)?;
                self.record_relation_set(statement_node, block_node, Level::Statement)?;
                self.record_node_text(statement_node, statement_text.as_bytes())?;
                leaf_ids.push(statement_node);
                leaf_texts.push(statement_text);
            }
            block_ids.push((block_node, block_text));
        }

        let leaf_refs: Vec<&str> = leaf_texts.iter().map(String::as_str).collect();
        Pooler::embed_message(&self.hierarchy, self.embedder.as_ref(), message_node, &leaf_ids, &leaf_refs)?;

        for statement_id in &leaf_ids {
            self.record_embedding_set(*statement_id, Level::Statement)?;
        }
        for (block_id, _) in &block_ids {
            self.record_embedding_set(*block_id, Level::Block)?;
        }
        self.record_embedding_set(message_node, Level::Message)?;
        self.record_embedding_set(session_node, Level::Session)?;

        for (statement_id, text) in leaf_ids.iter().zip(leaf_texts.iter()) {
            self.index_node(*statement_id, Level::Statement, text, now)?;
        }
        for (block_id, text) in &block_ids {
            self.index_node(*block_id, Level::Block, text, now)?;
        }
        self.index_node(message_node, Level::Message, content, now)?;

        let keywords = self.record_session_update(session_id, content, now)?;
        self.index_node(session_node, Level::Session, &keywords.join(" "), now)?;

        self.sessions.update_stats(session_id, 1, block_ids.len() as u64, leaf_ids.len() as u64)?;

        let sequence_num = self.sessions.next_sequence();
        Ok(IngestAck { message_id: message_node, sequence_num, new_session })
    }

    fn record_relation_set(&self, id: NodeId, parent_id: NodeId, level: Level) -> Result<()> {
        let payload = RelationSetPayload { id, parent_id, level: level as u8 };
        let bytes = bincode::serialize(&payload).expect("RelationSetPayload always serializes");
        self.wal.append(WalOp::RelationSet, &bytes)?;
        Ok(())
    }

    fn record_embedding_set(&self, id: NodeId, level: Level) -> Result<()> {
        let payload = EmbeddingSetPayload { id, level: level as u8 };
        let bytes = bincode::serialize(&payload).expect("EmbeddingSetPayload always serializes");
        self.wal.append(WalOp::EmbeddingSet, &bytes)?;
        Ok(())
    }

    fn record_node_text(&self, id: NodeId, text: &[u8]) -> Result<()> {
        self.hierarchy.set_text(id, text)?;
        let payload = NodeInsertPayload { id, text: text.to_vec() };
        let bytes = bincode::serialize(&payload).expect("NodeInsertPayload always serializes");
        self.wal.append(WalOp::NodeInsert, &bytes)?;
        Ok(())
    }

    fn index_node(&self, id: NodeId, level: Level, text: &str, created_at: u64) -> Result<()> {
        let tokens = mem_search::tokenize(text, self.config.inverted_index.max_tokens);
        let vector = self.hierarchy.get_embedding(id)?;
        self.search.write().index(id, &vector, &tokens, level, created_at)?;
        let payload = IndexInsertPayload { id, tokens, level: level as u8, created_at };
        let bytes = bincode::serialize(&payload).expect("IndexInsertPayload always serializes");
        self.wal.append(WalOp::IndexInsert, &bytes)?;
        Ok(())
    }

    fn record_session_create(&self, session_id: &str, agent_id: &str, root_node_id: NodeId, now: u64) -> Result<()> {
        self.sessions.register(session_id, agent_id, root_node_id, now)?;
        let payload = SessionCreatePayload {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            root_node_id,
            created_at: now,
        };
        let bytes = bincode::serialize(&payload).expect("SessionCreatePayload always serializes");
        self.wal.append(WalOp::SessionCreate, &bytes)?;
        Ok(())
    }

    /// Extracts keywords/identifiers/file paths from `content` into the
    /// session registry (§4.10/§4.11) and returns the keyword words alone,
    /// used to give the session node's search-index entry lexical content.
    fn record_session_update(&self, session_id: &str, content: &str, now: u64) -> Result<Vec<String>> {
        let keywords = {
            let search = self.search.read();
            self.sessions.update_content(session_id, content, search.inverted(), now)?;
            mem_session::extract_keywords(content, search.inverted())
        };
        let payload = SessionUpdatePayload { session_id: session_id.to_string(), text: content.to_string(), now };
        let bytes = bincode::serialize(&payload).expect("SessionUpdatePayload always serializes");
        self.wal.append(WalOp::SessionUpdate, &bytes)?;
        Ok(keywords.into_iter().map(|(word, _)| word).collect())
    }

    /// Implements the query data flow of §2: embeds `text`, tokenizes it,
    /// fans out to the search engine, and returns the fused,
    /// budget-truncated hits within `filters`.
    pub fn query(&self, text: &str, filters: Filters) -> Result<Vec<SearchHit>> {
        let now = now_nanos();
        let embedding = self.embedder.embed_batch(&[text])?.into_iter().next().unwrap_or_default();
        let tokens = mem_search::tokenize_all(text);

        let mut query = Query::new(now, filters.k.max(self.config.search.max_candidates));
        query.embedding = Some(embedding);
        query.tokens = tokens;
        query.min_level = filters.min_level;
        query.max_level = filters.max_level;

        let hits = self.search.read().search(&query);

        let mut scoped: Vec<(SearchHit, Level)> = Vec::with_capacity(hits.len());
        for hit in hits {
            let info = self.hierarchy.get_node(hit.id)?;
            if let Some(agent) = &filters.agent_id {
                if &info.agent_id != agent {
                    continue;
                }
            }
            if let Some(session) = &filters.session_id {
                if &info.session_id != session {
                    continue;
                }
            }
            scoped.push((hit, info.level));
        }

        let admitted = mem_search::apply_budget(&scoped, self.config.search.token_budget);
        scoped.truncate(admitted);
        scoped.truncate(filters.k);
        Ok(scoped.into_iter().map(|(hit, _)| hit).collect())
    }

    /// Flushes the hierarchy's mapped regions and marks the WAL's durable
    /// barrier (§4.13).
    pub fn sync(&self) -> Result<()> {
        self.hierarchy.sync()?;
        self.wal.checkpoint()?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], wal_path: &Path) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Corruption { file: wal_path.to_path_buf(), reason: e.to_string() })
}

fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
