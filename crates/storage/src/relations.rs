//! Relations column store (§4.3): four parallel id-indexed columns
//! (parent, first_child, next_sibling, level) each backed by its own
//! arena, header-framed with magic `"REL0"`.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use memcore::{Error, Level, Result, NodeId, INVALID};

use mem_arena::Arena;

const REL_MAGIC: u32 = 0x5245_4C30; // "REL0"
const REL_VERSION: u32 = 1;
const REL_HEADER_SIZE: usize = 16; // magic:4 version:4 count:4 capacity:4

struct RelColumn {
    arena: Arena,
    elem_size: usize,
    count: AtomicU32,
    capacity: u32,
}

impl RelColumn {
    fn create_heap(capacity: u32, elem_size: usize) -> RelColumn {
        let region = REL_HEADER_SIZE + capacity as usize * elem_size;
        let arena = Arena::create(region);
        arena.alloc(REL_HEADER_SIZE, 4).expect("header fits freshly created arena");
        RelColumn { arena, elem_size, count: AtomicU32::new(0), capacity }
    }

    fn create_mapped(path: &Path, capacity: u32, elem_size: usize) -> Result<RelColumn> {
        let region = REL_HEADER_SIZE + capacity as usize * elem_size;
        let arena = Arena::create_mapped(path, region)?;
        arena.alloc(REL_HEADER_SIZE, 4)?;
        let col = RelColumn { arena, elem_size, count: AtomicU32::new(0), capacity };
        col.write_header()?;
        Ok(col)
    }

    fn open_mapped(path: &Path, elem_size: usize) -> Result<RelColumn> {
        let arena = Arena::open_mapped(path)?;
        let header = arena.ptr_at(0, REL_HEADER_SIZE)?;
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let count = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let capacity = u32::from_le_bytes(header[12..16].try_into().unwrap());
        if magic != REL_MAGIC {
            return Err(Error::MagicMismatch { file: path.to_path_buf(), expected: REL_MAGIC, found: magic });
        }
        if version != REL_VERSION {
            return Err(Error::VersionMismatch { file: path.to_path_buf(), expected: REL_VERSION, found: version });
        }
        arena.set_cursor(REL_HEADER_SIZE + count as usize * elem_size);
        Ok(RelColumn { arena, elem_size, count: AtomicU32::new(count), capacity })
    }

    fn write_header(&self) -> Result<()> {
        if !self.arena.is_mapped() {
            return Ok(());
        }
        let mut header = [0u8; REL_HEADER_SIZE];
        header[0..4].copy_from_slice(&REL_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&REL_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&self.count.load(Ordering::Relaxed).to_le_bytes());
        header[12..16].copy_from_slice(&self.capacity.to_le_bytes());
        self.arena.write_at(0, &header)
    }

    fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    fn slot_offset(&self, idx: u32) -> usize {
        REL_HEADER_SIZE + idx as usize * self.elem_size
    }

    fn bump(&self) -> Result<u32> {
        let idx = self.count.fetch_add(1, Ordering::AcqRel);
        if idx >= self.capacity {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Capacity { component: "relations", capacity: self.capacity as usize });
        }
        self.arena.alloc(self.elem_size, self.elem_size.min(4).max(1))?;
        Ok(idx)
    }

    fn sync(&self) -> Result<()> {
        self.write_header()?;
        self.arena.sync()
    }
}

/// The four relation columns bound together, one arena each.
pub struct Relations {
    parent: RelColumn,
    first_child: RelColumn,
    next_sibling: RelColumn,
    level: RelColumn,
}

impl Relations {
    pub fn create(capacity: u32) -> Relations {
        Relations {
            parent: RelColumn::create_heap(capacity, 4),
            first_child: RelColumn::create_heap(capacity, 4),
            next_sibling: RelColumn::create_heap(capacity, 4),
            level: RelColumn::create_heap(capacity, 1),
        }
    }

    pub fn create_mapped(dir: &Path, capacity: u32) -> Result<Relations> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        Ok(Relations {
            parent: RelColumn::create_mapped(&dir.join("parent.bin"), capacity, 4)?,
            first_child: RelColumn::create_mapped(&dir.join("first_child.bin"), capacity, 4)?,
            next_sibling: RelColumn::create_mapped(&dir.join("next_sibling.bin"), capacity, 4)?,
            level: RelColumn::create_mapped(&dir.join("level.bin"), capacity, 1)?,
        })
    }

    pub fn open_mapped(dir: &Path) -> Result<Relations> {
        Ok(Relations {
            parent: RelColumn::open_mapped(&dir.join("parent.bin"), 4)?,
            first_child: RelColumn::open_mapped(&dir.join("first_child.bin"), 4)?,
            next_sibling: RelColumn::open_mapped(&dir.join("next_sibling.bin"), 4)?,
            level: RelColumn::open_mapped(&dir.join("level.bin"), 1)?,
        })
    }

    pub fn count(&self) -> u32 {
        self.parent.count()
    }

    /// Allocate a fresh node id with all edges invalid and level zero
    /// (`Statement`); callers set level/parent immediately after.
    pub fn alloc_node(&self) -> Result<NodeId> {
        let id = self.parent.bump()?;
        self.first_child.bump()?;
        self.next_sibling.bump()?;
        self.level.bump()?;
        self.set_parent_raw(id, INVALID)?;
        self.set_first_child_raw(id, INVALID)?;
        self.set_next_sibling_raw(id, INVALID)?;
        tracing::trace!(id, "relations alloc_node");
        Ok(id)
    }

    fn check_bounds(&self, id: NodeId) -> Result<()> {
        if id >= self.count() {
            return Err(Error::NotFound(format!("node {id}")));
        }
        Ok(())
    }

    fn read_id_field(&self, col: &RelColumn, id: NodeId) -> Result<NodeId> {
        self.check_bounds(id)?;
        let bytes = col.arena.ptr_at(col.slot_offset(id), 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn write_id_field(&self, col: &RelColumn, id: NodeId, value: NodeId) -> Result<()> {
        self.check_bounds(id)?;
        col.arena.write_at(col.slot_offset(id), &value.to_le_bytes())
    }

    fn set_parent_raw(&self, id: NodeId, value: NodeId) -> Result<()> {
        self.write_id_field(&self.parent, id, value)
    }
    fn set_first_child_raw(&self, id: NodeId, value: NodeId) -> Result<()> {
        self.write_id_field(&self.first_child, id, value)
    }
    fn set_next_sibling_raw(&self, id: NodeId, value: NodeId) -> Result<()> {
        self.write_id_field(&self.next_sibling, id, value)
    }

    pub fn parent(&self, id: NodeId) -> Result<NodeId> {
        self.read_id_field(&self.parent, id)
    }
    pub fn first_child(&self, id: NodeId) -> Result<NodeId> {
        self.read_id_field(&self.first_child, id)
    }
    pub fn next_sibling(&self, id: NodeId) -> Result<NodeId> {
        self.read_id_field(&self.next_sibling, id)
    }

    pub fn level(&self, id: NodeId) -> Result<Level> {
        self.check_bounds(id)?;
        let byte = self.level.arena.ptr_at(self.level.slot_offset(id), 1)?[0];
        Level::from_u8(byte).ok_or_else(|| Error::Corruption {
            file: "relations/level.bin".into(),
            reason: format!("unknown level byte {byte} for node {id}"),
        })
    }

    pub fn set_level(&self, id: NodeId, level: Level) -> Result<()> {
        self.check_bounds(id)?;
        self.level.arena.write_at(self.level.slot_offset(id), &[level as u8])?;
        Ok(())
    }

    /// Link `child` as the newest child of `parent`: walk the sibling
    /// list to its tail and set `next_sibling` there, or set
    /// `first_child` if the list was empty (§4.3 child linking policy).
    pub fn link_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.set_parent_raw(child, parent)?;
        let head = self.first_child(parent)?;
        if head == INVALID {
            self.set_first_child_raw(parent, child)?;
            tracing::debug!(parent, child, "relations link_child (first)");
            return Ok(());
        }
        let mut cursor = head;
        loop {
            let next = self.next_sibling(cursor)?;
            if next == INVALID {
                self.set_next_sibling_raw(cursor, child)?;
                tracing::debug!(parent, child, tail = cursor, "relations link_child (append)");
                return Ok(());
            }
            cursor = next;
        }
    }

    /// Children of `id` in insertion order.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut cursor = self.first_child(id)?;
        while cursor != INVALID {
            out.push(cursor);
            cursor = self.next_sibling(cursor)?;
        }
        Ok(out)
    }

    /// Siblings of `id` (excluding `id` itself), in list order.
    pub fn siblings(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let parent = self.parent(id)?;
        if parent == INVALID {
            return Ok(Vec::new());
        }
        Ok(self.children(parent)?.into_iter().filter(|&n| n != id).collect())
    }

    /// Ancestor chain from `id`'s parent up to (and including) the root agent.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut cursor = self.parent(id)?;
        while cursor != INVALID {
            out.push(cursor);
            cursor = self.parent(cursor)?;
        }
        Ok(out)
    }

    pub fn count_descendants(&self, id: NodeId) -> Result<usize> {
        let mut total = 0usize;
        for child in self.children(id)? {
            total += 1 + self.count_descendants(child)?;
        }
        Ok(total)
    }

    pub fn sync(&self) -> Result<()> {
        self.parent.sync()?;
        self.first_child.sync()?;
        self.next_sibling.sync()?;
        self.level.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_hierarchy_shape() -> (Relations, NodeId, NodeId, NodeId, NodeId) {
        let rel = Relations::create(64);
        let agent = rel.alloc_node().unwrap();
        rel.set_level(agent, Level::Agent).unwrap();
        let session = rel.alloc_node().unwrap();
        rel.set_level(session, Level::Session).unwrap();
        rel.link_child(agent, session).unwrap();
        let message = rel.alloc_node().unwrap();
        rel.set_level(message, Level::Message).unwrap();
        rel.link_child(session, message).unwrap();
        let b0 = rel.alloc_node().unwrap();
        rel.set_level(b0, Level::Block).unwrap();
        rel.link_child(message, b0).unwrap();
        let b1 = rel.alloc_node().unwrap();
        rel.set_level(b1, Level::Block).unwrap();
        rel.link_child(message, b1).unwrap();
        for block in [b0, b1] {
            for _ in 0..3 {
                let stmt = rel.alloc_node().unwrap();
                rel.set_level(stmt, Level::Statement).unwrap();
                rel.link_child(block, stmt).unwrap();
            }
        }
        (rel, session, message, b0, b1)
    }

    #[test]
    fn scenario_1_hierarchy_shape() {
        let (rel, session, message, b0, b1) = build_hierarchy_shape();
        assert_eq!(rel.count(), 10);
        assert_eq!(rel.children(message).unwrap(), vec![b0, b1]);
        assert_eq!(rel.next_sibling(b0).unwrap(), b1);
        assert_eq!(rel.next_sibling(b1).unwrap(), INVALID);
        let stmt_0_2 = rel.children(b0).unwrap()[2];
        assert_eq!(rel.ancestors(stmt_0_2).unwrap(), vec![b0, message, session]);
        assert_eq!(rel.count_descendants(session).unwrap(), 9);
    }

    #[test]
    fn level_monotonicity_invariant() {
        let (rel, session, message, b0, _b1) = build_hierarchy_shape();
        assert!(rel.level(message).unwrap() < rel.level(session).unwrap());
        assert!(rel.level(b0).unwrap() < rel.level(message).unwrap());
    }

    #[test]
    fn alloc_node_fails_with_capacity_when_full() {
        let rel = Relations::create(1);
        rel.alloc_node().unwrap();
        let err = rel.alloc_node().unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn mapped_relations_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rel_dir = dir.path().join("relations");
        {
            let rel = Relations::create_mapped(&rel_dir, 8).unwrap();
            let a = rel.alloc_node().unwrap();
            rel.set_level(a, Level::Agent).unwrap();
            let s = rel.alloc_node().unwrap();
            rel.set_level(s, Level::Session).unwrap();
            rel.link_child(a, s).unwrap();
            rel.sync().unwrap();
        }
        let rel = Relations::open_mapped(&rel_dir).unwrap();
        assert_eq!(rel.count(), 2);
        assert_eq!(rel.children(0).unwrap(), vec![1]);
        assert_eq!(rel.level(1).unwrap(), Level::Session);
    }
}
