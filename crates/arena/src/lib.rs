//! Arena: a fixed-capacity, bump-allocated byte region (§4.1).
//!
//! Two backings: an anonymous heap buffer, or a file-backed mapped
//! region whose on-disk length equals the arena's capacity. Grounded
//! in the teacher's `crates/engine/src/primitives/vector/mmap.rs`
//! (`MmapVectorData`: magic/version/header-then-data layout, atomic
//! rename-into-place durability) generalized from a typed `[f32; D]`
//! layout to an untyped byte region that Relations and Embeddings
//! build their own typed headers on top of.
//!
//! Mutation goes through `&self` (not `&mut self`): §5's concurrency
//! model names a single mutator owning all write paths, with readers
//! safe to run concurrently once a write is synced. `write_at` relies
//! on that single-writer discipline the same way the teacher's mmap
//! code relies on it for its raw pointer casts in `MmapVectorData::get`.

use std::cell::UnsafeCell;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use memcore::{Error, Result};
use memmap2::{MmapMut, MmapOptions};

enum Backing {
    Heap(Vec<u8>),
    Mapped { mmap: MmapMut, path: PathBuf, _file: File },
}

/// A bump allocator over a fixed-capacity byte region.
pub struct Arena {
    backing: UnsafeCell<Backing>,
    capacity: usize,
    /// High-water mark of allocated bytes; bump-allocated, never shrinks.
    cursor: AtomicUsize,
}

// SAFETY: all mutation is serialized by the single-writer contract of §5;
// concurrent access is reader-only once a writer's `sync` has returned.
unsafe impl Sync for Arena {}

impl Arena {
    /// Anonymous heap-backed arena of `size` bytes, zero-initialized.
    pub fn create(size: usize) -> Arena {
        Arena {
            backing: UnsafeCell::new(Backing::Heap(vec![0u8; size])),
            capacity: size,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Create a new file-backed mapped arena. The file is created (or
    /// truncated) to exactly `size` bytes before mapping, matching the
    /// fixed on-disk length the file layout (§6) requires.
    pub fn create_mapped(path: &Path, size: usize) -> Result<Arena> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        file.set_len(size as u64).map_err(|e| Error::io(path, e))?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| Error::io(path, e))?;
        Ok(Arena {
            backing: UnsafeCell::new(Backing::Mapped { mmap, path: path.to_path_buf(), _file: file }),
            capacity: size,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Open an existing mapped arena; capacity is the file's length.
    /// The caller is responsible for re-deriving `cursor` from whatever
    /// header/count field lives at the front of the region (the arena
    /// itself does not know about typed headers).
    pub fn open_mapped(path: &Path) -> Result<Arena> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        let len = file.metadata().map_err(|e| Error::io(path, e))?.len() as usize;
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| Error::io(path, e))?;
        Ok(Arena {
            backing: UnsafeCell::new(Backing::Mapped { mmap, path: path.to_path_buf(), _file: file }),
            capacity: len,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes allocated so far (the high-water mark).
    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bump-allocate `n` bytes aligned to `align` (a power of two).
    /// Fails with `Error::Capacity` if the resulting high-water mark
    /// would exceed capacity.
    pub fn alloc(&self, n: usize, align: usize) -> Result<usize> {
        debug_assert!(align.is_power_of_two());
        loop {
            let current = self.cursor.load(Ordering::Relaxed);
            let aligned = (current + align - 1) & !(align - 1);
            let end = aligned.checked_add(n).ok_or(Error::Capacity {
                component: "arena",
                capacity: self.capacity,
            })?;
            if end > self.capacity {
                return Err(Error::Capacity { component: "arena", capacity: self.capacity });
            }
            if self
                .cursor
                .compare_exchange(current, end, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                tracing::trace!(offset = aligned, n, "arena alloc");
                return Ok(aligned);
            }
        }
    }

    /// Set the high-water mark directly. Used when reopening a mapped
    /// arena whose typed header already records a `count`.
    pub fn set_cursor(&self, offset: usize) {
        self.cursor.store(offset, Ordering::Relaxed);
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: single-writer model; readers observe a stable slice
        // once the writer's mutation (via `write_at`) has returned.
        match unsafe { &*self.backing.get() } {
            Backing::Heap(v) => v.as_slice(),
            Backing::Mapped { mmap, .. } => &mmap[..],
        }
    }

    fn bytes_mut(&self) -> &mut [u8] {
        // SAFETY: see `write_at`; the single mutator serializes all writes.
        match unsafe { &mut *self.backing.get() } {
            Backing::Heap(v) => v.as_mut_slice(),
            Backing::Mapped { mmap, .. } => &mut mmap[..],
        }
    }

    /// Read-only view of `len` bytes starting at `offset`.
    pub fn ptr_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = self.checked_range(offset, len)?;
        Ok(&self.bytes()[offset..end])
    }

    /// Inverse of `ptr_at`: recover the offset a pointer into this
    /// arena's backing region corresponds to. Out-of-range pointers
    /// (from another arena, or dangling) are reported as `Argument`
    /// rather than silently clamped or pinned.
    pub fn offset_of(&self, ptr: *const u8) -> Result<usize> {
        let base = self.bytes().as_ptr() as usize;
        let addr = ptr as usize;
        if addr < base {
            return Err(Error::Argument("pointer precedes arena region".into()));
        }
        let offset = addr - base;
        if offset > self.capacity {
            return Err(Error::Argument(format!(
                "offset {offset} out of bounds for capacity {}",
                self.capacity
            )));
        }
        Ok(offset)
    }

    /// Overwrite `len` bytes starting at `offset` with `data`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        let end = self.checked_range(offset, data.len())?;
        self.bytes_mut()[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn checked_range(&self, offset: usize, len: usize) -> Result<usize> {
        let end = offset.checked_add(len).ok_or_else(|| Error::Argument("offset overflow".into()))?;
        if end > self.capacity {
            return Err(Error::Argument(format!(
                "range [{offset}, {end}) out of bounds for capacity {}",
                self.capacity
            )));
        }
        Ok(end)
    }

    /// Persist a mapped region to disk; no-op for heap arenas.
    pub fn sync(&self) -> Result<()> {
        // SAFETY: flush only reads the mmap and issues msync; no aliasing hazard.
        if let Backing::Mapped { mmap, path, .. } = unsafe { &*self.backing.get() } {
            mmap.flush().map_err(|e| Error::io(path, e))?;
        }
        Ok(())
    }

    /// Grow the arena. Only legal for heap-backed arenas (§9 open
    /// question, resolved: mapped regions always surface `Capacity`
    /// rather than attempting `ftruncate` + remap).
    pub fn grow(&mut self, new_size: usize) -> Result<()> {
        match self.backing.get_mut() {
            Backing::Heap(v) => {
                if new_size < self.capacity {
                    return Err(Error::Argument("grow cannot shrink an arena".into()));
                }
                v.resize(new_size, 0);
                self.capacity = new_size;
                Ok(())
            }
            Backing::Mapped { .. } => Err(Error::Capacity { component: "arena", capacity: self.capacity }),
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(unsafe { &*self.backing.get() }, Backing::Mapped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_alloc_respects_alignment_and_capacity() {
        let arena = Arena::create(64);
        let a = arena.alloc(3, 4).unwrap();
        assert_eq!(a, 0);
        let b = arena.alloc(5, 4).unwrap();
        assert_eq!(b, 4); // 3 bytes rounded up to 4-byte alignment
        assert_eq!(arena.len(), 9);
    }

    #[test]
    fn alloc_fails_with_capacity_when_full() {
        let arena = Arena::create(8);
        arena.alloc(8, 1).unwrap();
        let err = arena.alloc(1, 1).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn ptr_at_out_of_range_is_reported() {
        let arena = Arena::create(8);
        assert!(arena.ptr_at(4, 8).is_err());
        assert!(arena.ptr_at(0, 8).is_ok());
    }

    #[test]
    fn offset_of_is_the_inverse_of_ptr_at() {
        let arena = Arena::create(16);
        arena.write_at(0, &[1, 2, 3, 4]).unwrap();
        let slice = arena.ptr_at(4, 4).unwrap();
        let ptr = slice.as_ptr();
        assert_eq!(arena.offset_of(ptr).unwrap(), 4);
    }

    #[test]
    fn offset_of_reports_pointers_outside_the_region() {
        let arena = Arena::create(8);
        let other = Arena::create(8);
        let foreign_ptr = other.ptr_at(0, 4).unwrap().as_ptr();
        assert!(arena.offset_of(foreign_ptr).is_err());
    }

    #[test]
    fn heap_grow_extends_capacity() {
        let mut arena = Arena::create(8);
        arena.grow(16).unwrap();
        assert_eq!(arena.capacity(), 16);
        assert!(arena.alloc(16, 1).is_ok());
    }

    #[test]
    fn mapped_arena_round_trips_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        {
            let arena = Arena::create_mapped(&path, 64).unwrap();
            let off = arena.alloc(4, 4).unwrap();
            arena.write_at(off, &42u32.to_le_bytes()).unwrap();
            arena.sync().unwrap();
        }
        let arena = Arena::open_mapped(&path).unwrap();
        assert_eq!(arena.capacity(), 64);
        let bytes = arena.ptr_at(0, 4).unwrap();
        assert_eq!(u32::from_le_bytes(bytes.try_into().unwrap()), 42);
    }

    #[test]
    fn mapped_arena_grow_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let mut arena = Arena::create_mapped(&path, 16).unwrap();
        let err = arena.grow(32).unwrap_err();
        assert!(err.is_capacity());
    }
}
