//! Chunk records and the identities used to refer to them.
//!
//! A chunk describes one contiguous sub-range `[offset, offset + size)` of a
//! region. Records live in the pages of a
//! [`ChunkPool`](crate::chunk_pool::ChunkPool) and refer to each other through
//! [`ChunkId`] indices rather than pointers, so recycling a record never leaves
//! a dangling reference behind: a stale [`Handle`] is caught by its generation.

use crate::region::RegionId;

/// Index of a chunk record inside a [`ChunkPool`](crate::chunk_pool::ChunkPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{_0}")]
pub struct ChunkId(u32);

impl ChunkId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn value(self) -> u32 {
        self.0
    }
}

/// Reference to an allocated chunk, returned by
/// [`Registry::alloc`](crate::Registry::alloc).
///
/// A handle stays valid until the chunk is freed. Once the chunk record is
/// recycled its generation changes, and any copy of the old handle is rejected
/// with [`AllocError::UnknownHandle`](crate::AllocError::UnknownHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{id}@{generation}")]
pub struct Handle {
    id: ChunkId,
    generation: u32,
}

impl Handle {
    pub(crate) const fn new(id: ChunkId, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Returns the index of the chunk record this handle refers to.
    #[must_use]
    pub const fn id(self) -> ChunkId {
        self.id
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

/// Whether a chunk is handed out or available.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant,
)]
pub enum ChunkStatus {
    #[default]
    #[display("free")]
    Free,
    #[display("used")]
    Used,
}

/// A chunk record.
///
/// `prev`/`next` link the record into its region's address-ordered list.
/// `prev_free`/`next_free` link it into a size-class free list while it is
/// free. While the record sits unused in the pool, `next` links the pool's
/// free-record list instead.
#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkRecord {
    pub(crate) offset: u32,
    pub(crate) size: u32,
    pub(crate) status: ChunkStatus,
    pub(crate) domain_id: u32,
    pub(crate) user_data: u16,
    /// Region the chunk belongs to. Only consulted for validation and
    /// diagnostics.
    pub(crate) owner: Option<RegionId>,
    pub(crate) prev: Option<ChunkId>,
    pub(crate) next: Option<ChunkId>,
    pub(crate) prev_free: Option<ChunkId>,
    pub(crate) next_free: Option<ChunkId>,
    pub(crate) generation: u32,
}

impl ChunkRecord {
    /// One past the last offset covered by the chunk.
    pub(crate) fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }

    /// Clears everything except the generation.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            generation: self.generation,
            ..Self::default()
        };
    }

    pub(crate) fn info(&self) -> ChunkInfo {
        ChunkInfo {
            offset: self.offset,
            size: self.size,
            status: self.status,
            domain_id: self.domain_id,
            user_data: self.user_data,
        }
    }
}

/// A snapshot of one chunk, as reported by
/// [`Registry::chunks`](crate::Registry::chunks) and region dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkInfo {
    pub offset: u32,
    pub size: u32,
    pub status: ChunkStatus,
    pub domain_id: u32,
    pub user_data: u16,
}

impl ChunkInfo {
    /// One past the last offset covered by the chunk.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }
}
