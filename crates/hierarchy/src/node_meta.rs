//! `node_meta` side file (§4.5): `{created_at, embedding_idx, agent_id,
//! session_id}` per node, grown lazily and rewritten wholesale on
//! `sync()`. Framed with its own magic (`"MEMO"`) the way `Relations`
//! and `Embeddings` frame theirs, but as a single flat file rather than
//! a bump-allocated arena, since §9's design note chose fixed-width
//! records over a pointer-bearing layout and the whole table is small
//! enough to rewrite each sync.

use std::fs;
use std::path::{Path, PathBuf};

use memcore::{Error, NodeId, Result};

const MEMO_MAGIC: u32 = 0x4D45_4D4F; // "MEMO"
const MEMO_VERSION: u32 = 1;
const MEMO_HEADER_SIZE: usize = 12; // magic:4 version:4 node_count:4
const ID_FIELD_LEN: usize = 65; // 64 chars + NUL, matches MAX_AGENT_ID_LEN/MAX_SESSION_ID_LEN
const RECORD_SIZE: usize = 8 + 4 + ID_FIELD_LEN + ID_FIELD_LEN;

/// One node's rarely-changing metadata.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub created_at: u64,
    pub embedding_idx: u32,
    pub agent_id: String,
    pub session_id: String,
}

impl Default for NodeMeta {
    fn default() -> NodeMeta {
        NodeMeta { created_at: 0, embedding_idx: 0, agent_id: String::new(), session_id: String::new() }
    }
}

fn pack_id(field: &str) -> Result<[u8; ID_FIELD_LEN]> {
    let bytes = field.as_bytes();
    if bytes.len() >= ID_FIELD_LEN {
        return Err(Error::Argument(format!("id field exceeds {} bytes: {field}", ID_FIELD_LEN - 1)));
    }
    let mut out = [0u8; ID_FIELD_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn unpack_id(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn encode(meta: &NodeMeta) -> Result<[u8; RECORD_SIZE]> {
    let mut out = [0u8; RECORD_SIZE];
    out[0..8].copy_from_slice(&meta.created_at.to_le_bytes());
    out[8..12].copy_from_slice(&meta.embedding_idx.to_le_bytes());
    out[12..12 + ID_FIELD_LEN].copy_from_slice(&pack_id(&meta.agent_id)?);
    out[12 + ID_FIELD_LEN..RECORD_SIZE].copy_from_slice(&pack_id(&meta.session_id)?);
    Ok(out)
}

fn decode(buf: &[u8]) -> NodeMeta {
    let created_at = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let embedding_idx = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let agent_id = unpack_id(&buf[12..12 + ID_FIELD_LEN]);
    let session_id = unpack_id(&buf[12 + ID_FIELD_LEN..RECORD_SIZE]);
    NodeMeta { created_at, embedding_idx, agent_id, session_id }
}

/// In-memory table, optionally bound to a path for `MEMO`-framed persistence.
pub struct MetadataStore {
    records: Vec<NodeMeta>,
    path: Option<PathBuf>,
}

impl MetadataStore {
    pub fn create() -> MetadataStore {
        MetadataStore { records: Vec::new(), path: None }
    }

    pub fn create_mapped(path: &Path) -> Result<MetadataStore> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let store = MetadataStore { records: Vec::new(), path: Some(path.to_path_buf()) };
        store.sync()?;
        Ok(store)
    }

    pub fn open_mapped(path: &Path) -> Result<MetadataStore> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        if bytes.len() < MEMO_HEADER_SIZE {
            return Err(Error::Corruption { file: path.to_path_buf(), reason: "file shorter than header".into() });
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let node_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        if magic != MEMO_MAGIC {
            return Err(Error::MagicMismatch { file: path.to_path_buf(), expected: MEMO_MAGIC, found: magic });
        }
        if version != MEMO_VERSION {
            return Err(Error::VersionMismatch { file: path.to_path_buf(), expected: MEMO_VERSION, found: version });
        }
        let expected_len = MEMO_HEADER_SIZE + node_count * RECORD_SIZE;
        if bytes.len() < expected_len {
            return Err(Error::Corruption {
                file: path.to_path_buf(),
                reason: format!("expected {expected_len} bytes for {node_count} records, found {}", bytes.len()),
            });
        }
        let mut records = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let start = MEMO_HEADER_SIZE + i * RECORD_SIZE;
            records.push(decode(&bytes[start..start + RECORD_SIZE]));
        }
        Ok(MetadataStore { records, path: Some(path.to_path_buf()) })
    }

    /// Grow the table to hold `id`, zero-initializing any gap.
    pub fn ensure(&mut self, id: NodeId) {
        let needed = id as usize + 1;
        if self.records.len() < needed {
            self.records.resize_with(needed, NodeMeta::default);
        }
    }

    pub fn get(&self, id: NodeId) -> Result<&NodeMeta> {
        self.records.get(id as usize).ok_or_else(|| Error::NotFound(format!("node_meta {id}")))
    }

    pub fn set(&mut self, id: NodeId, meta: NodeMeta) {
        self.ensure(id);
        self.records[id as usize] = meta;
    }

    pub fn sync(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let mut buf = Vec::with_capacity(MEMO_HEADER_SIZE + self.records.len() * RECORD_SIZE);
        buf.extend_from_slice(&MEMO_MAGIC.to_le_bytes());
        buf.extend_from_slice(&MEMO_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for meta in &self.records {
            buf.extend_from_slice(&encode(meta)?);
        }
        fs::write(path, buf).map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_round_trip() {
        let mut store = MetadataStore::create();
        store.set(0, NodeMeta { created_at: 42, embedding_idx: 3, agent_id: "a".into(), session_id: "s".into() });
        let got = store.get(0).unwrap();
        assert_eq!(got.created_at, 42);
        assert_eq!(got.agent_id, "a");
    }

    #[test]
    fn ensure_zero_initializes_gap() {
        let mut store = MetadataStore::create();
        store.ensure(3);
        assert_eq!(store.get(0).unwrap().created_at, 0);
        assert_eq!(store.get(3).unwrap().created_at, 0);
    }

    #[test]
    fn mapped_store_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.dat");
        {
            let mut store = MetadataStore::create_mapped(&path).unwrap();
            store.set(0, NodeMeta { created_at: 7, embedding_idx: 1, agent_id: "agent-1".into(), session_id: "".into() });
            store.sync().unwrap();
        }
        let store = MetadataStore::open_mapped(&path).unwrap();
        assert_eq!(store.get(0).unwrap().created_at, 7);
        assert_eq!(store.get(0).unwrap().agent_id, "agent-1");
    }

    #[test]
    fn id_field_over_limit_is_rejected_on_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.dat");
        let mut store = MetadataStore::create_mapped(&path).unwrap();
        store.set(0, NodeMeta { created_at: 1, embedding_idx: 0, agent_id: "a".repeat(65), session_id: "".into() });
        assert!(store.sync().is_err());
    }
}
