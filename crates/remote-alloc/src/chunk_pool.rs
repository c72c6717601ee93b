//! Pool of chunk records.
//!
//! Regions never allocate chunk records one by one. Records are obtained in
//! pages of [`PoolConfig::records_per_page`] from a [`PageAllocator`], kept on
//! a singly linked free list, and recycled there when a chunk is destroyed.
//!
//! # Reserve
//!
//! An allocation may need up to two new records (a free prefix and a free
//! suffix, or a new tail chunk and a free prefix). Region operations call
//! [`ChunkPool::ensure_capacity`] with [`PoolConfig::reserve`] before touching
//! any list, so a failing page request is reported before the region has been
//! modified and taking a record never fails.
//!
//! # Examples
//!
//! ```
//! use remote_alloc::chunk_pool::{ChunkPool, LimitedPages, PoolConfig};
//!
//! let config = PoolConfig::new().with_records_per_page(16);
//! let mut pool = ChunkPool::with_allocator(config, LimitedPages::new(1));
//!
//! pool.ensure_capacity(4).unwrap();
//! assert_eq!(pool.stats().pages, 1);
//! assert_eq!(pool.stats().free_records, 16);
//!
//! // the budget of one page is spent
//! assert!(pool.allocate_page().is_err());
//! ```

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use platform_cast::CastFrom as _;

use crate::{
    chunk::{ChunkId, ChunkRecord},
    error::{AllocError, OutOfPagesSnafu},
};

/// Default number of records in one pool page.
pub const RECORDS_PER_PAGE: usize = 500;

/// Default number of records kept available before a region operation.
pub const DEFAULT_RESERVE: usize = 2;

/// Tuning knobs for a [`ChunkPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    records_per_page: usize,
    reserve: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records_per_page: RECORDS_PER_PAGE,
            reserve: DEFAULT_RESERVE,
        }
    }

    /// Sets the number of records requested from the page allocator at once.
    ///
    /// # Panics
    ///
    /// Panics if `records_per_page` is zero.
    #[must_use]
    pub const fn with_records_per_page(self, records_per_page: usize) -> Self {
        assert!(records_per_page > 0, "a page must hold at least one record");
        Self {
            records_per_page,
            ..self
        }
    }

    /// Sets the number of free records guaranteed before each region
    /// operation.
    ///
    /// Values below [`DEFAULT_RESERVE`] are raised to it, since a single
    /// allocation may consume that many records.
    #[must_use]
    pub const fn with_reserve(self, reserve: usize) -> Self {
        let reserve = if reserve < DEFAULT_RESERVE {
            DEFAULT_RESERVE
        } else {
            reserve
        };
        Self { reserve, ..self }
    }

    #[must_use]
    pub const fn records_per_page(&self) -> usize {
        self.records_per_page
    }

    #[must_use]
    pub const fn reserve(&self) -> usize {
        self.reserve
    }
}

/// A zero-initialized batch of chunk records.
pub struct Page {
    records: Box<[ChunkRecord]>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("records", &self.records.len())
            .finish()
    }
}

impl Page {
    /// Allocates a page of `records` records from the global allocator.
    ///
    /// Returns `None` instead of aborting when the allocation fails.
    #[must_use]
    pub fn try_zeroed(records: usize) -> Option<Self> {
        let mut vec = Vec::new();
        vec.try_reserve_exact(records).ok()?;
        vec.resize_with(records, ChunkRecord::default);
        Some(Self {
            records: vec.into_boxed_slice(),
        })
    }

    /// Returns the number of records in the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source of the pages backing a [`ChunkPool`].
///
/// Only chunk metadata is ever stored in these pages; the address space
/// managed by the regions is never touched.
pub trait PageAllocator {
    /// Returns a fresh page holding `records` default records, or `None` if
    /// no memory is available.
    ///
    /// A page of any other length is handed back through
    /// [`free`](Self::free) and treated as a refusal.
    fn alloc_zeroed(&mut self, records: usize) -> Option<Page>;

    /// Takes back a page previously returned by
    /// [`alloc_zeroed`](Self::alloc_zeroed).
    fn free(&mut self, page: Page);
}

/// Pages backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPages;

impl PageAllocator for SystemPages {
    fn alloc_zeroed(&mut self, records: usize) -> Option<Page> {
        Page::try_zeroed(records)
    }

    fn free(&mut self, page: Page) {
        drop(page);
    }
}

/// Pages backed by the global allocator, up to a fixed number of pages.
#[derive(Debug, Clone)]
pub struct LimitedPages {
    remaining: usize,
    outstanding: usize,
}

impl LimitedPages {
    #[must_use]
    pub const fn new(max_pages: usize) -> Self {
        Self {
            remaining: max_pages,
            outstanding: 0,
        }
    }

    /// Number of pages handed out and not yet returned.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of pages that can still be handed out.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }
}

impl PageAllocator for LimitedPages {
    fn alloc_zeroed(&mut self, records: usize) -> Option<Page> {
        if self.remaining == 0 {
            return None;
        }
        let page = Page::try_zeroed(records)?;
        self.remaining -= 1;
        self.outstanding += 1;
        Some(page)
    }

    fn free(&mut self, page: Page) {
        assert!(self.outstanding > 0, "page returned twice");
        drop(page);
        self.outstanding -= 1;
        self.remaining += 1;
    }
}

/// Occupancy of a [`ChunkPool`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pages: usize,
    pub records: usize,
    pub free_records: usize,
}

impl PoolStats {
    /// Records currently describing a chunk of some region.
    #[must_use]
    pub const fn used_records(&self) -> usize {
        self.records - self.free_records
    }
}

/// Recycling store of chunk records shared by the regions of a
/// [`Registry`](crate::Registry).
///
/// # Thread Safety
///
/// The pool has no internal synchronization. Regions drawing from the same
/// pool must be serialized by the caller, which the `&mut` receivers of the
/// registry already enforce.
pub struct ChunkPool<P = SystemPages> {
    config: PoolConfig,
    pages: Vec<Page>,
    free_head: Option<ChunkId>,
    free_count: usize,
    /// Generation stamped onto the records of new pages. Raised past every
    /// generation in use by [`reset`](ChunkPool::reset).
    epoch: u32,
    allocator: P,
}

impl<P> fmt::Debug for ChunkPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkPool")
            .field("config", &self.config)
            .field("pages", &self.pages.len())
            .field("free_count", &self.free_count)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl Default for ChunkPool<SystemPages> {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkPool<SystemPages> {
    /// Creates an empty pool backed by the global allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(PoolConfig::new(), SystemPages)
    }
}

impl<P> ChunkPool<P>
where
    P: PageAllocator,
{
    /// Creates an empty pool. No page is requested until a record is needed.
    #[must_use]
    pub fn with_allocator(config: PoolConfig, allocator: P) -> Self {
        Self {
            config,
            pages: Vec::new(),
            free_head: None,
            free_count: 0,
            epoch: 0,
            allocator,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn allocator(&self) -> &P {
        &self.allocator
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pages: self.pages.len(),
            records: self.pages.iter().map(Page::len).sum(),
            free_records: self.free_count,
        }
    }

    /// Requests one page from the page allocator and makes all of its records
    /// available.
    pub fn allocate_page(&mut self) -> Result<(), AllocError> {
        let records = self.config.records_per_page;
        let first = self.pages.len() * records;
        // every record of the new page must be addressable by a `ChunkId`
        let (Ok(first), Ok(last)) = (u32::try_from(first), u32::try_from(first + records - 1))
        else {
            return OutOfPagesSnafu { records }.fail();
        };

        let Some(page) = self.allocator.alloc_zeroed(records) else {
            tracing::debug!(records, "page allocator refused a chunk page");
            return OutOfPagesSnafu { records }.fail();
        };
        if page.len() != records {
            tracing::warn!(
                records,
                len = page.len(),
                "page allocator returned a page of the wrong size"
            );
            self.allocator.free(page);
            return OutOfPagesSnafu { records }.fail();
        }
        self.pages.push(page);

        // push in reverse so that records are taken in index order
        let epoch = self.epoch;
        for index in (first..=last).rev() {
            let id = ChunkId::new(index);
            let free_head = self.free_head;
            let record = self.get_mut(id);
            record.generation = epoch;
            record.next = free_head;
            self.free_head = Some(id);
        }
        self.free_count += records;

        tracing::debug!(
            pages = self.pages.len(),
            free = self.free_count,
            "chunk pool grew by one page"
        );
        Ok(())
    }

    /// Makes sure at least `threshold` records are available, requesting pages
    /// as needed.
    pub fn ensure_capacity(&mut self, threshold: usize) -> Result<(), AllocError> {
        while self.free_count < threshold {
            self.allocate_page()?;
        }
        Ok(())
    }

    /// Makes sure the configured reserve is available.
    pub(crate) fn ensure_reserve(&mut self) -> Result<(), AllocError> {
        self.ensure_capacity(self.config.reserve)
    }

    /// Takes a record off the free list and resets it.
    ///
    /// # Panics
    ///
    /// Panics if no record is available. Callers must reserve capacity with
    /// [`ensure_capacity`](Self::ensure_capacity) first.
    pub(crate) fn take(&mut self) -> ChunkId {
        let Some(id) = self.free_head else {
            panic!("chunk pool is empty; capacity must be reserved before taking records");
        };
        let record = self.get_mut(id);
        let next = record.next;
        record.reset();
        self.free_head = next;
        self.free_count -= 1;
        id
    }

    /// Returns a record to the free list.
    ///
    /// The record's generation is bumped so that outstanding handles to it
    /// become stale.
    pub(crate) fn give_back(&mut self, id: ChunkId) {
        let free_head = self.free_head;
        let record = self.get_mut(id);
        record.reset();
        record.generation = record.generation.wrapping_add(1);
        record.next = free_head;
        self.free_head = Some(id);
        self.free_count += 1;
    }

    /// Releases every page back to the page allocator.
    ///
    /// All records must have been given back; this is meant for full
    /// teardown, after every region has been destroyed. Records of pages
    /// requested afterwards start above every generation seen so far, so
    /// handles issued before the reset stay stale.
    pub fn reset(&mut self) {
        debug_assert_eq!(
            self.free_count,
            self.stats().records,
            "chunk pool reset while records are still in use"
        );
        let newest = self
            .pages
            .iter()
            .flat_map(|page| page.records.iter())
            .map(|record| record.generation)
            .fold(self.epoch, u32::max);
        self.epoch = newest.wrapping_add(1);
        for page in self.pages.drain(..) {
            self.allocator.free(page);
        }
        self.free_head = None;
        self.free_count = 0;
        tracing::debug!("chunk pool released all pages");
    }

    /// Returns `true` if `id` addresses a record of this pool.
    pub(crate) fn contains(&self, id: ChunkId) -> bool {
        usize::cast_from(id.value()) < self.pages.len() * self.config.records_per_page
    }

    fn locate(&self, id: ChunkId) -> (usize, usize) {
        let index = usize::cast_from(id.value());
        let records = self.config.records_per_page;
        (index / records, index % records)
    }

    pub(crate) fn get(&self, id: ChunkId) -> &ChunkRecord {
        let (page, slot) = self.locate(id);
        &self.pages[page].records[slot]
    }

    pub(crate) fn get_mut(&mut self, id: ChunkId) -> &mut ChunkRecord {
        let (page, slot) = self.locate(id);
        &mut self.pages[page].records[slot]
    }
}
