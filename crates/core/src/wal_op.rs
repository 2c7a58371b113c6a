//! WAL operation tags (§4.2). Kept in `memcore` rather than the `wal`
//! crate because every writer of WAL records (hierarchy, storage,
//! search) needs to name these variants without depending on the WAL
//! crate's file-format internals.

/// Tagged variant carried in a WAL record's `op_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WalOp {
    None = 0,
    NodeInsert = 1,
    NodeUpdate = 2,
    NodeDelete = 3,
    EmbeddingSet = 4,
    RelationSet = 5,
    IndexInsert = 6,
    IndexDelete = 7,
    SessionCreate = 8,
    SessionUpdate = 9,
    Checkpoint = 10,
    Commit = 11,
}

impl WalOp {
    pub fn from_u32(v: u32) -> Option<WalOp> {
        match v {
            0 => Some(WalOp::None),
            1 => Some(WalOp::NodeInsert),
            2 => Some(WalOp::NodeUpdate),
            3 => Some(WalOp::NodeDelete),
            4 => Some(WalOp::EmbeddingSet),
            5 => Some(WalOp::RelationSet),
            6 => Some(WalOp::IndexInsert),
            7 => Some(WalOp::IndexDelete),
            8 => Some(WalOp::SessionCreate),
            9 => Some(WalOp::SessionUpdate),
            10 => Some(WalOp::Checkpoint),
            11 => Some(WalOp::Commit),
            _ => None,
        }
    }

    pub fn is_checkpoint(self) -> bool {
        matches!(self, WalOp::Checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u32() {
        let all = [
            WalOp::None,
            WalOp::NodeInsert,
            WalOp::NodeUpdate,
            WalOp::NodeDelete,
            WalOp::EmbeddingSet,
            WalOp::RelationSet,
            WalOp::IndexInsert,
            WalOp::IndexDelete,
            WalOp::SessionCreate,
            WalOp::SessionUpdate,
            WalOp::Checkpoint,
            WalOp::Commit,
        ];
        for op in all {
            assert_eq!(WalOp::from_u32(op as u32), Some(op));
        }
        assert_eq!(WalOp::from_u32(999), None);
    }
}
