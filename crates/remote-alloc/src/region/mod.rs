//! Region descriptors and their allocation algorithms.
//!
//! A [`Region`] manages the range `[base_offset, base_offset + max_size)` of
//! an address space it never touches. Only the prefix
//! `[base_offset, base_offset + committed_size)` is described by chunks; the
//! rest is handed out by growing that prefix, much like `sbrk`.
//!
//! ```text
//!  base_offset                     committed end               base + max
//!  |                               |                           |
//!  v                               v                           v
//!  +--------+------+--------+------+ - - - - - - - - - - - - - +
//!  |  used  | free |  used  | used |        uncommitted        |
//!  +--------+------+--------+------+ - - - - - - - - - - - - - +
//! ```
//!
//! Chunk records come from a shared [`ChunkPool`]. Every operation that may
//! need new records reserves them up front, so a failure leaves the region
//! untouched.

use arrayvec::ArrayString;
use snafu::ensure;

use crate::{
    bin::{BIN_COUNT, bin_index},
    chunk::{ChunkId, ChunkInfo, ChunkStatus},
    chunk_pool::{ChunkPool, PageAllocator},
    error::{AllocError, InvalidParameterSnafu, OutOfMemorySnafu},
    trace::{TraceEvent, TraceKind, TraceSink},
};

pub use self::status::{BlockStats, RegionDump, Status};
use self::split::Keep;

mod lists;
mod split;
mod status;

/// Maximum length of a region name in bytes.
pub const NAME_CAPACITY: usize = 32;

/// Regions address a 32-bit space.
const ADDRESS_SPACE_END: u64 = 1 << 32;

/// Identifier of a region inside its [`Registry`](crate::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("#{_0}")]
pub struct RegionId(u32);

impl RegionId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the registry slot of the region.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

/// Parameters of an allocation.
///
/// # Examples
///
/// ```
/// use remote_alloc::AllocRequest;
///
/// // 256 bytes, 64-byte aligned, somewhere in the first 4 KiB
/// let request = AllocRequest::new(256)
///     .with_alignment(64)
///     .with_window(0, 4096)
///     .with_domain(3);
/// assert_eq!(request.size(), 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    size: u32,
    alignment: u32,
    window_offset: u32,
    window_size: u32,
    domain_id: u32,
}

impl AllocRequest {
    /// Requests `size` bytes anywhere in the region, without alignment
    /// constraints, for domain 0.
    #[must_use]
    pub const fn new(size: u32) -> Self {
        Self {
            size,
            alignment: 1,
            window_offset: 0,
            window_size: u32::MAX,
            domain_id: 0,
        }
    }

    /// Requires the offset of the allocation to be a multiple of `alignment`.
    ///
    /// Any non-zero value is accepted. Zero is treated as 1.
    #[must_use]
    pub const fn with_alignment(self, alignment: u32) -> Self {
        Self { alignment, ..self }
    }

    /// Restricts the allocation to `[offset, offset + size)`.
    #[must_use]
    pub const fn with_window(self, offset: u32, size: u32) -> Self {
        Self {
            window_offset: offset,
            window_size: size,
            ..self
        }
    }

    /// Tags the allocation with a caller-defined domain.
    #[must_use]
    pub const fn with_domain(self, domain_id: u32) -> Self {
        Self { domain_id, ..self }
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub const fn alignment(&self) -> u32 {
        self.alignment
    }

    #[must_use]
    pub const fn window_offset(&self) -> u32 {
        self.window_offset
    }

    #[must_use]
    pub const fn window_size(&self) -> u32 {
        self.window_size
    }

    #[must_use]
    pub const fn domain_id(&self) -> u32 {
        self.domain_id
    }

    fn window_end(&self) -> u64 {
        u64::from(self.window_offset) + u64::from(self.window_size)
    }

    /// Finds the aligned start of the request inside `[start, end)`.
    fn place(&self, start: u32, end: u64) -> Option<u32> {
        let align = u64::from(self.alignment.max(1));
        let aligned = u64::from(start.max(self.window_offset)).next_multiple_of(align);
        let fits = aligned + u64::from(self.size) <= end.min(self.window_end());
        fits.then_some(aligned)
            .and_then(|aligned| u32::try_from(aligned).ok())
    }
}

/// A managed address range.
///
/// Regions are created and driven through a
/// [`Registry`](crate::Registry); this type only exposes read-only
/// accessors.
#[derive(Debug)]
pub struct Region {
    id: RegionId,
    name: ArrayString<NAME_CAPACITY>,
    base_offset: u32,
    max_size: u32,
    committed_size: u32,
    head: Option<ChunkId>,
    tail: Option<ChunkId>,
    free_lists: [Option<ChunkId>; BIN_COUNT],
}

fn truncate_name(name: &str) -> ArrayString<NAME_CAPACITY> {
    let mut end = name.len().min(NAME_CAPACITY);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    ArrayString::from(&name[..end]).unwrap_or_default()
}

fn check_bounds(base_offset: u32, max_size: u32) -> Result<(), AllocError> {
    ensure!(
        max_size > 0,
        InvalidParameterSnafu {
            reason: "maximum size must not be zero",
        }
    );
    ensure!(
        u64::from(base_offset) + u64::from(max_size) <= ADDRESS_SPACE_END,
        InvalidParameterSnafu {
            reason: "region does not fit in the 32-bit address space",
        }
    );
    Ok(())
}

impl Region {
    pub(crate) fn new(
        id: RegionId,
        name: &str,
        base_offset: u32,
        max_size: u32,
    ) -> Result<Self, AllocError> {
        check_bounds(base_offset, max_size)?;
        Ok(Self {
            id,
            name: truncate_name(name),
            base_offset,
            max_size,
            committed_size: 0,
            head: None,
            tail: None,
            free_lists: [None; BIN_COUNT],
        })
    }

    #[must_use]
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Returns the name given at creation, truncated to [`NAME_CAPACITY`]
    /// bytes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_offset(&self) -> u32 {
        self.base_offset
    }

    #[must_use]
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Returns the size of the prefix currently described by chunks.
    #[must_use]
    pub fn committed_size(&self) -> u32 {
        self.committed_size
    }

    fn committed_end(&self) -> u64 {
        u64::from(self.base_offset) + u64::from(self.committed_size)
    }

    fn end(&self) -> u64 {
        u64::from(self.base_offset) + u64::from(self.max_size)
    }

    fn trace(&self, trace: &mut impl TraceSink, kind: TraceKind, offset: u32, size: u32) {
        trace.record(&TraceEvent {
            kind,
            offset,
            size,
            name: &self.name,
        });
    }

    pub(crate) fn trace_lifecycle(&self, trace: &mut impl TraceSink, kind: TraceKind) {
        self.trace(trace, kind, self.base_offset, self.max_size);
    }

    /// Changes the maximum size without touching any chunk.
    pub(crate) fn resize(&mut self, new_max_size: u32) -> Result<(), AllocError> {
        check_bounds(self.base_offset, new_max_size)?;
        ensure!(
            new_max_size >= self.committed_size,
            OutOfMemorySnafu {
                size: self.committed_size,
            }
        );
        tracing::debug!(
            region = %self.id,
            old = self.max_size,
            new = new_max_size,
            "region resized"
        );
        self.max_size = new_max_size;
        Ok(())
    }

    /// Recycles every chunk of the region.
    pub(crate) fn release_all<P>(&mut self, pool: &mut ChunkPool<P>)
    where
        P: PageAllocator,
    {
        let mut next = self.head;
        while let Some(id) = next {
            next = pool.get(id).next;
            pool.give_back(id);
        }
        self.head = None;
        self.tail = None;
        self.free_lists = [None; BIN_COUNT];
        self.committed_size = 0;
    }

    /// Returns a snapshot of every chunk in address order.
    pub(crate) fn chunk_infos<'a, P>(
        &self,
        pool: &'a ChunkPool<P>,
    ) -> impl Iterator<Item = ChunkInfo> + 'a
    where
        P: PageAllocator,
    {
        self.chunks(pool).map(|(_, chunk)| chunk.info())
    }

    /// Allocates a chunk and returns its record.
    pub(crate) fn alloc<P>(
        &mut self,
        pool: &mut ChunkPool<P>,
        trace: &mut impl TraceSink,
        request: &AllocRequest,
    ) -> Result<ChunkId, AllocError>
    where
        P: PageAllocator,
    {
        ensure!(
            request.size > 0,
            InvalidParameterSnafu {
                reason: "allocation size must not be zero",
            }
        );
        ensure!(
            request.size <= request.window_size,
            InvalidParameterSnafu {
                reason: "allocation size exceeds the window",
            }
        );
        pool.ensure_reserve()?;

        let (id, start) = if let Some((id, start)) = self.find_free(pool, request) {
            self.remove_free(pool, id);
            (id, start)
        } else if let Some(found) = self.grow(pool, request) {
            found
        } else {
            tracing::trace!(
                region = %self.id,
                size = request.size,
                align = request.alignment,
                window = request.window_offset,
                "no placement for allocation"
            );
            return OutOfMemorySnafu { size: request.size }.fail();
        };

        if pool.get(id).offset < start {
            self.split(pool, id, start, Keep::High);
        }
        // `start + size` only overflows when the chunk ends at the top of the
        // address space, in which case there is no suffix
        if let Some(end) = start
            .checked_add(request.size)
            .filter(|&end| u64::from(end) < pool.get(id).end())
        {
            self.split(pool, id, end, Keep::Low);
        }

        let chunk = pool.get_mut(id);
        debug_assert_eq!(chunk.offset, start);
        debug_assert_eq!(chunk.size, request.size);
        chunk.status = ChunkStatus::Used;
        // handles to an earlier allocation of this record must not match
        chunk.generation = chunk.generation.wrapping_add(1);
        chunk.domain_id = request.domain_id;
        chunk.user_data = 0;
        chunk.prev_free = None;
        chunk.next_free = None;

        tracing::trace!(region = %self.id, chunk = %id, offset = start, size = request.size, "allocated");
        self.trace(trace, TraceKind::Alloc, start, request.size);
        Ok(id)
    }

    /// First fit over the free lists, starting at the request's size class.
    fn find_free<P>(&self, pool: &ChunkPool<P>, request: &AllocRequest) -> Option<(ChunkId, u32)>
    where
        P: PageAllocator,
    {
        (bin_index(request.size)..BIN_COUNT).find_map(|bin| {
            self.free_list(pool, bin)
                .find_map(|(id, chunk)| Some((id, request.place(chunk.offset, chunk.end())?)))
        })
    }

    /// Extends the committed range with a new tail chunk covering the request.
    fn grow<P>(&mut self, pool: &mut ChunkPool<P>, request: &AllocRequest) -> Option<(ChunkId, u32)>
    where
        P: PageAllocator,
    {
        // a committed end of 2^32 means the region is exhausted
        let committed_end = u32::try_from(self.committed_end()).ok()?;
        let start = request.place(committed_end, self.end())?;
        let end = u64::from(start) + u64::from(request.size);
        let size = u32::try_from(end - u64::from(committed_end)).ok()?;

        let id = pool.take();
        let chunk = pool.get_mut(id);
        chunk.offset = committed_end;
        chunk.size = size;
        chunk.owner = Some(self.id);
        self.link_after(pool, self.tail, id);
        self.committed_size += size;

        tracing::trace!(
            region = %self.id,
            committed = self.committed_size,
            "committed range grew"
        );
        Some((id, start))
    }

    /// Frees a used chunk, merging it with free neighbours.
    pub(crate) fn free<P>(&mut self, pool: &mut ChunkPool<P>, trace: &mut impl TraceSink, id: ChunkId)
    where
        P: PageAllocator,
    {
        let chunk = pool.get_mut(id);
        debug_assert!(chunk.status.is_used(), "chunk {id} freed twice");
        let (offset, size) = (chunk.offset, chunk.size);
        chunk.status = ChunkStatus::Free;
        chunk.domain_id = 0;

        let id = self.coalesce(pool, id);
        if self.tail == Some(id) {
            let size = pool.get(id).size;
            self.unlink(pool, id);
            pool.give_back(id);
            self.committed_size -= size;
            tracing::trace!(
                region = %self.id,
                committed = self.committed_size,
                "committed range shrank"
            );
        } else {
            self.insert_free(pool, id);
        }

        tracing::trace!(region = %self.id, offset, size, "freed");
        self.trace(trace, TraceKind::Free, offset, size);
    }

    /// Moves a used chunk to a new size and window, updating `id` in place.
    ///
    /// On failure the original range is allocated again and `id` refers to
    /// it.
    pub(crate) fn realloc<P>(
        &mut self,
        pool: &mut ChunkPool<P>,
        trace: &mut impl TraceSink,
        id: &mut ChunkId,
        new_size: u32,
        new_window_offset: u32,
    ) -> Result<(), AllocError>
    where
        P: PageAllocator,
    {
        ensure!(
            new_size > 0,
            InvalidParameterSnafu {
                reason: "allocation size must not be zero",
            }
        );
        pool.ensure_reserve()?;

        let old = pool.get(*id).info();
        self.free(pool, trace, *id);

        let request = AllocRequest::new(new_size)
            .with_window(new_window_offset, new_size)
            .with_domain(old.domain_id);
        let result = self.alloc(pool, trace, &request);
        let (new_id, result) = match result {
            Ok(new_id) => (new_id, Ok(())),
            Err(err) => {
                tracing::warn!(
                    region = %self.id,
                    offset = old.offset,
                    size = old.size,
                    new_offset = new_window_offset,
                    new_size,
                    "reallocation failed, restoring the original range"
                );
                // the freed range is still free or uncommitted, and the failed
                // attempt took no records from the reserve
                let restore = AllocRequest::new(old.size)
                    .with_window(old.offset, old.size)
                    .with_domain(old.domain_id);
                match self.alloc(pool, trace, &restore) {
                    Ok(restored) => (restored, Err(err)),
                    Err(restore_err) => {
                        panic!("failed to restore a reallocated range: {restore_err}")
                    }
                }
            }
        };

        pool.get_mut(new_id).user_data = old.user_data;
        *id = new_id;
        result
    }
}
