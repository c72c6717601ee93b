//! Statistics, dumps and consistency checks of a region.

use core::fmt;

use super::Region;
use crate::{
    bin::{BIN_COUNT, bin_index},
    chunk::ChunkId,
    chunk_pool::{ChunkPool, PageAllocator},
};

/// Block statistics over some range of a region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    /// Size of the range the statistics describe.
    pub size: u32,
    pub used_blocks: u32,
    pub free_blocks: u32,
    /// Smallest free block, or 0 if there is none.
    pub min_free: u32,
    pub max_free: u32,
    pub used_bytes: u32,
    pub free_bytes: u32,
}

impl BlockStats {
    fn add_used(&mut self, size: u32) {
        self.used_blocks += 1;
        self.used_bytes += size;
    }

    fn add_free(&mut self, size: u32) {
        self.min_free = if self.free_blocks == 0 {
            size
        } else {
            self.min_free.min(size)
        };
        self.max_free = self.max_free.max(size);
        self.free_blocks += 1;
        self.free_bytes += size;
    }
}

/// Result of [`Registry::status`](crate::Registry::status).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Statistics of the whole region. The uncommitted tail counts as one
    /// free block.
    pub global: BlockStats,
    /// Statistics of the probed domain.
    ///
    /// Only `size` is filled in, with the probe size. Blocks are not
    /// attributed to domains.
    pub domain: BlockStats,
}

/// Printable table of a region and its chunks.
///
/// Returned by [`Registry::dump`](crate::Registry::dump).
pub struct RegionDump<'a, P> {
    region: &'a Region,
    pool: &'a ChunkPool<P>,
}

impl<P> fmt::Display for RegionDump<'_, P>
where
    P: PageAllocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let region = self.region;
        writeln!(
            f,
            "region {} {:?}: base {:#010x}, committed {:#x} of {:#x}",
            region.id, region.name(), region.base_offset, region.committed_size, region.max_size,
        )?;
        for (id, chunk) in region.chunks(self.pool) {
            writeln!(
                f,
                "  {id:>6} [{:#010x}, {:#011x}) {:>10} {:<4} domain {:<4} data {:#06x}",
                chunk.offset,
                chunk.end(),
                chunk.size,
                chunk.status,
                chunk.domain_id,
                chunk.user_data,
            )?;
        }
        Ok(())
    }
}

impl Region {
    pub(crate) fn status<P>(&self, pool: &ChunkPool<P>, _probe_offset: u32, probe_size: u32) -> Status
    where
        P: PageAllocator,
    {
        let mut global = BlockStats {
            size: self.max_size,
            ..BlockStats::default()
        };
        for (_, chunk) in self.chunks(pool) {
            if chunk.status.is_used() {
                global.add_used(chunk.size);
            } else {
                global.add_free(chunk.size);
            }
        }
        let uncommitted = self.max_size - self.committed_size;
        if uncommitted > 0 {
            global.add_free(uncommitted);
        }

        Status {
            global,
            domain: BlockStats {
                size: probe_size,
                ..BlockStats::default()
            },
        }
    }

    pub(crate) fn dump<'a, P>(&'a self, pool: &'a ChunkPool<P>) -> RegionDump<'a, P> {
        RegionDump { region: self, pool }
    }

    /// Checks every structural invariant of the region.
    ///
    /// # Panics
    ///
    /// Panics with a description of the first violation found.
    pub(crate) fn check_invariants<P>(&self, pool: &ChunkPool<P>)
    where
        P: PageAllocator,
    {
        let id = self.id;
        assert!(
            self.committed_size <= self.max_size,
            "region {id}: committed size {:#x} exceeds maximum size {:#x}",
            self.committed_size,
            self.max_size,
        );
        assert!(
            self.end() <= super::ADDRESS_SPACE_END,
            "region {id}: range exceeds the address space"
        );

        let mut expected_offset = u64::from(self.base_offset);
        let mut prev: Option<(ChunkId, bool)> = None;
        let mut free_chunks = 0_usize;
        for (chunk_id, chunk) in self.chunks(pool) {
            assert_eq!(
                chunk.owner,
                Some(id),
                "region {id}: chunk {chunk_id} belongs to another region"
            );
            assert_eq!(
                chunk.prev,
                prev.map(|(prev, _)| prev),
                "region {id}: chunk {chunk_id} has a broken back link"
            );
            assert!(chunk.size > 0, "region {id}: chunk {chunk_id} is empty");
            assert_eq!(
                u64::from(chunk.offset),
                expected_offset,
                "region {id}: chunk {chunk_id} is not contiguous with its predecessor"
            );
            let is_free = chunk.status.is_free();
            if is_free {
                assert!(
                    !prev.is_some_and(|(_, prev_free)| prev_free),
                    "region {id}: chunk {chunk_id} and its predecessor are both free"
                );
                free_chunks += 1;
            } else {
                assert!(
                    chunk.prev_free.is_none() && chunk.next_free.is_none(),
                    "region {id}: used chunk {chunk_id} is linked into a free list"
                );
            }
            expected_offset = chunk.end();
            prev = Some((chunk_id, is_free));
        }

        assert_eq!(
            self.tail,
            prev.map(|(prev, _)| prev),
            "region {id}: tail does not match the last chunk"
        );
        assert!(
            !prev.is_some_and(|(_, is_free)| is_free),
            "region {id}: last chunk is free"
        );
        assert_eq!(
            expected_offset,
            self.committed_end(),
            "region {id}: chunk sizes do not add up to the committed size"
        );

        let mut listed = 0_usize;
        for bin in 0..BIN_COUNT {
            let mut prev: Option<(ChunkId, u32)> = None;
            for (chunk_id, chunk) in self.free_list(pool, bin) {
                assert!(
                    chunk.status.is_free(),
                    "region {id}: used chunk {chunk_id} is on free list {bin}"
                );
                assert_eq!(
                    chunk.owner,
                    Some(id),
                    "region {id}: free list {bin} holds chunk {chunk_id} of another region"
                );
                assert_eq!(
                    bin_index(chunk.size),
                    bin,
                    "region {id}: chunk {chunk_id} of size {} is on the wrong free list",
                    chunk.size
                );
                assert_eq!(
                    chunk.prev_free,
                    prev.map(|(prev, _)| prev),
                    "region {id}: chunk {chunk_id} has a broken free list back link"
                );
                if let Some((_, prev_size)) = prev {
                    assert!(
                        prev_size <= chunk.size,
                        "region {id}: free list {bin} is not sorted by size"
                    );
                }
                prev = Some((chunk_id, chunk.size));
                listed += 1;
                assert!(
                    listed <= free_chunks,
                    "region {id}: free lists hold more chunks than the region"
                );
            }
        }
        assert_eq!(
            listed, free_chunks,
            "region {id}: some free chunks are missing from the free lists"
        );
    }
}
