//! Embeddings column store (§4.4): one arena per hierarchy level,
//! each storing a header followed by `capacity × D × 4` bytes of
//! packed `f32` vectors. Cosine math is grounded in the teacher's
//! `crates/engine/src/primitives/vector/distance.rs`.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use memcore::{Error, Level, Result, EMBEDDING_DIM};
use mem_arena::Arena;

const EMB_MAGIC: u32 = 0x454D_4230; // "EMB0"
const EMB_VERSION: u32 = 1;
const EMB_HEADER_SIZE: usize = 32; // magic:4 version:4 dim:4 count:4 capacity:4 reserved:12

struct EmbColumn {
    arena: Arena,
    capacity: u32,
    count: AtomicU32,
}

impl EmbColumn {
    fn slot_offset(idx: u32) -> usize {
        EMB_HEADER_SIZE + idx as usize * EMBEDDING_DIM * 4
    }

    fn create_heap(capacity: u32) -> EmbColumn {
        let region = EMB_HEADER_SIZE + capacity as usize * EMBEDDING_DIM * 4;
        let arena = Arena::create(region);
        arena.alloc(EMB_HEADER_SIZE, 4).expect("header fits freshly created arena");
        EmbColumn { arena, capacity, count: AtomicU32::new(0) }
    }

    fn create_mapped(path: &Path, capacity: u32) -> Result<EmbColumn> {
        let region = EMB_HEADER_SIZE + capacity as usize * EMBEDDING_DIM * 4;
        let arena = Arena::create_mapped(path, region)?;
        arena.alloc(EMB_HEADER_SIZE, 4)?;
        let col = EmbColumn { arena, capacity, count: AtomicU32::new(0) };
        col.write_header()?;
        Ok(col)
    }

    fn open_mapped(path: &Path) -> Result<EmbColumn> {
        let arena = Arena::open_mapped(path)?;
        let header = arena.ptr_at(0, EMB_HEADER_SIZE)?;
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let dim = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let count = u32::from_le_bytes(header[12..16].try_into().unwrap());
        let capacity = u32::from_le_bytes(header[16..20].try_into().unwrap());
        if magic != EMB_MAGIC {
            return Err(Error::MagicMismatch { file: path.to_path_buf(), expected: EMB_MAGIC, found: magic });
        }
        if version != EMB_VERSION {
            return Err(Error::VersionMismatch { file: path.to_path_buf(), expected: EMB_VERSION, found: version });
        }
        if dim as usize != EMBEDDING_DIM {
            return Err(Error::Corruption {
                file: path.to_path_buf(),
                reason: format!("dimension mismatch: expected {EMBEDDING_DIM}, found {dim}"),
            });
        }
        arena.set_cursor(EmbColumn::slot_offset(count));
        Ok(EmbColumn { arena, capacity, count: AtomicU32::new(count) })
    }

    fn write_header(&self) -> Result<()> {
        if !self.arena.is_mapped() {
            return Ok(());
        }
        let mut header = [0u8; EMB_HEADER_SIZE];
        header[0..4].copy_from_slice(&EMB_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&EMB_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(EMBEDDING_DIM as u32).to_le_bytes());
        header[12..16].copy_from_slice(&self.count.load(Ordering::Relaxed).to_le_bytes());
        header[16..20].copy_from_slice(&self.capacity.to_le_bytes());
        self.arena.write_at(0, &header)
    }

    fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    fn alloc(&self) -> Result<u32> {
        let idx = self.count.fetch_add(1, Ordering::AcqRel);
        if idx >= self.capacity {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Capacity { component: "embeddings", capacity: self.capacity as usize });
        }
        self.arena.alloc(EMBEDDING_DIM * 4, 4)?;
        Ok(idx)
    }

    fn set(&self, idx: u32, vector: &[f32]) -> Result<()> {
        if idx >= self.count() {
            return Err(Error::NotFound(format!("embedding slot {idx}")));
        }
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.arena.write_at(Self::slot_offset(idx), &bytes)
    }

    fn get(&self, idx: u32) -> Result<[f32; EMBEDDING_DIM]> {
        if idx >= self.count() {
            return Err(Error::NotFound(format!("embedding slot {idx}")));
        }
        let bytes = self.arena.ptr_at(Self::slot_offset(idx), EMBEDDING_DIM * 4)?;
        let mut out = [0f32; EMBEDDING_DIM];
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            out[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        Ok(out)
    }

    fn sync(&self) -> Result<()> {
        self.write_header()?;
        self.arena.sync()
    }
}

/// Five arenas, one per `Level`, storing dense `D`-dimensional vectors.
pub struct Embeddings {
    columns: [EmbColumn; 5],
}

impl Embeddings {
    pub fn create(capacity_per_level: u32) -> Embeddings {
        Embeddings {
            columns: Level::ALL.map(|_| EmbColumn::create_heap(capacity_per_level)),
        }
    }

    pub fn create_mapped(dir: &Path, capacity_per_level: u32) -> Result<Embeddings> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let mut columns = Vec::with_capacity(5);
        for level in Level::ALL {
            let path = dir.join(format!("level_{}.bin", level as u8));
            columns.push(EmbColumn::create_mapped(&path, capacity_per_level)?);
        }
        Ok(Embeddings { columns: columns.try_into().ok().expect("exactly 5 levels") })
    }

    pub fn open_mapped(dir: &Path) -> Result<Embeddings> {
        let mut columns = Vec::with_capacity(5);
        for level in Level::ALL {
            let path = dir.join(format!("level_{}.bin", level as u8));
            columns.push(EmbColumn::open_mapped(&path)?);
        }
        Ok(Embeddings { columns: columns.try_into().ok().expect("exactly 5 levels") })
    }

    fn column(&self, level: Level) -> &EmbColumn {
        &self.columns[level as usize]
    }

    pub fn alloc(&self, level: Level) -> Result<u32> {
        self.column(level).alloc()
    }

    pub fn set(&self, level: Level, idx: u32, vector: &[f32]) -> Result<()> {
        if vector.len() != EMBEDDING_DIM {
            return Err(Error::Argument(format!(
                "expected {EMBEDDING_DIM}-dimensional vector, got {}",
                vector.len()
            )));
        }
        tracing::trace!(level = ?level, idx, "embeddings set");
        self.column(level).set(idx, vector)
    }

    pub fn get(&self, level: Level, idx: u32) -> Result<[f32; EMBEDDING_DIM]> {
        self.column(level).get(idx)
    }

    /// Cosine similarity between two vectors at the same level;
    /// similarity between different levels is undefined (§4.4).
    pub fn cosine(&self, level: Level, a: u32, b: u32) -> Result<f32> {
        let va = self.get(level, a)?;
        let vb = self.get(level, b)?;
        Ok(cosine_similarity(&va, &vb))
    }

    pub fn sync(&self) -> Result<()> {
        for col in &self.columns {
            col.sync()?;
        }
        Ok(())
    }
}

/// Standard dot / (‖a‖·‖b‖); returns 0 if either magnitude is 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// L2-normalize a vector in place; leaves a zero vector unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vec(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = unit_vec(0);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = unit_vec(0);
        let b = unit_vec(1);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        let zero = vec![0.0f32; EMBEDDING_DIM];
        let v = unit_vec(0);
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
    }

    #[test]
    fn scenario_2_pooling_arithmetic() {
        let mut mean = vec![0.0f32; EMBEDDING_DIM];
        let v1 = unit_vec(0);
        let v2 = unit_vec(1);
        for i in 0..EMBEDDING_DIM {
            mean[i] = (v1[i] + v2[i]) / 2.0;
        }
        l2_normalize(&mut mean);
        let expected = 1.0 / std::f32::consts::SQRT_2;
        assert!((mean[0] - expected).abs() < 1e-3);
        assert!((mean[1] - expected).abs() < 1e-3);
    }

    #[test]
    fn alloc_set_get_round_trip() {
        let emb = Embeddings::create(4);
        let idx = emb.alloc(Level::Statement).unwrap();
        let v = unit_vec(5);
        emb.set(Level::Statement, idx, &v).unwrap();
        let got = emb.get(Level::Statement, idx).unwrap();
        assert_eq!(got.as_slice(), v.as_slice());
    }

    #[test]
    fn alloc_fails_with_capacity_when_full() {
        let emb = Embeddings::create(1);
        emb.alloc(Level::Statement).unwrap();
        let err = emb.alloc(Level::Statement).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn set_rejects_wrong_dimension() {
        let emb = Embeddings::create(1);
        let idx = emb.alloc(Level::Statement).unwrap();
        let err = emb.set(Level::Statement, idx, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn mapped_embeddings_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let emb_dir = dir.path().join("embeddings");
        {
            let emb = Embeddings::create_mapped(&emb_dir, 4).unwrap();
            let idx = emb.alloc(Level::Block).unwrap();
            emb.set(Level::Block, idx, &unit_vec(3)).unwrap();
            emb.sync().unwrap();
        }
        let emb = Embeddings::open_mapped(&emb_dir).unwrap();
        let got = emb.get(Level::Block, 0).unwrap();
        assert_eq!(got[3], 1.0);
    }

    proptest::proptest! {
        /// Invariant 5, §8: `cosine(v, v) = 1` for any non-zero vector.
        #[test]
        fn cosine_of_a_vector_with_itself_is_one(raw in proptest::collection::vec(-10.0f32..10.0, EMBEDDING_DIM)) {
            let mut v = raw;
            l2_normalize(&mut v);
            if v.iter().any(|x| *x != 0.0) {
                proptest::prop_assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-3);
            }
        }

        /// Cosine similarity is symmetric regardless of vector order.
        #[test]
        fn cosine_is_symmetric(
            a in proptest::collection::vec(-10.0f32..10.0, EMBEDDING_DIM),
            b in proptest::collection::vec(-10.0f32..10.0, EMBEDDING_DIM),
        ) {
            proptest::prop_assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        }
    }
}
