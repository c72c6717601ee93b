//! Splitting and merging of chunks.

use super::Region;
use crate::{
    chunk::ChunkId,
    chunk_pool::{ChunkPool, PageAllocator},
};

/// Side of a split that stays with the original record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Keep {
    /// `[offset, at)`
    Low,
    /// `[at, end)`
    High,
}

impl Region {
    /// Splits a chunk at `at` and returns the record of the part not kept.
    ///
    /// The split-off part is free and goes on its free list. The chunk being
    /// split must not be on a free list.
    pub(super) fn split<P>(&mut self, pool: &mut ChunkPool<P>, id: ChunkId, at: u32, keep: Keep) -> ChunkId
    where
        P: PageAllocator,
    {
        let chunk = pool.get(id);
        let (offset, prev) = (chunk.offset, chunk.prev);
        assert!(
            offset < at && u64::from(at) < chunk.end(),
            "split point {at:#x} outside of chunk {id}"
        );
        let low = at - offset;
        let high = chunk.size - low;

        let piece = pool.take();
        pool.get_mut(piece).owner = Some(self.id);
        match keep {
            Keep::Low => {
                pool.get_mut(id).size = low;
                let record = pool.get_mut(piece);
                record.offset = at;
                record.size = high;
                self.link_after(pool, Some(id), piece);
            }
            Keep::High => {
                let chunk = pool.get_mut(id);
                chunk.offset = at;
                chunk.size = high;
                let record = pool.get_mut(piece);
                record.offset = offset;
                record.size = low;
                self.link_after(pool, prev, piece);
            }
        }
        self.insert_free(pool, piece);
        piece
    }

    /// Merges a free chunk with its free neighbours and returns the record
    /// that survives.
    ///
    /// The chunk must be marked free and must not be on a free list yet.
    pub(super) fn coalesce<P>(&mut self, pool: &mut ChunkPool<P>, mut id: ChunkId) -> ChunkId
    where
        P: PageAllocator,
    {
        debug_assert!(pool.get(id).status.is_free());

        if let Some(prev) = pool.get(id).prev.filter(|&prev| pool.get(prev).status.is_free()) {
            // its size is about to change
            self.remove_free(pool, prev);
            let size = pool.get(id).size;
            self.unlink(pool, id);
            pool.give_back(id);
            pool.get_mut(prev).size += size;
            id = prev;
        }

        if let Some(next) = pool.get(id).next.filter(|&next| pool.get(next).status.is_free()) {
            self.remove_free(pool, next);
            let size = pool.get(next).size;
            self.unlink(pool, next);
            pool.give_back(next);
            pool.get_mut(id).size += size;
        }

        id
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bin::bin_index,
        chunk::ChunkStatus,
        region::RegionId,
    };

    fn setup() -> (Region, ChunkPool) {
        let region = Region::new(RegionId::new(0), "split", 0, 1 << 16).unwrap();
        let mut pool = ChunkPool::new();
        pool.ensure_capacity(16).unwrap();
        (region, pool)
    }

    fn push(region: &mut Region, pool: &mut ChunkPool, size: u32, status: ChunkStatus) -> ChunkId {
        let offset = region.committed_size;
        let id = pool.take();
        let chunk = pool.get_mut(id);
        chunk.offset = offset;
        chunk.size = size;
        chunk.status = status;
        chunk.owner = Some(region.id);
        region.link_after(pool, region.tail, id);
        region.committed_size += size;
        if status.is_free() {
            region.insert_free(pool, id);
        }
        id
    }

    fn ranges(region: &Region, pool: &ChunkPool) -> Vec<(u32, u32)> {
        region
            .chunk_infos(pool)
            .map(|c| (c.offset, c.size))
            .collect()
    }

    #[test]
    fn test_split_keep_low() {
        let (mut region, mut pool) = setup();
        let a = push(&mut region, &mut pool, 100, ChunkStatus::Used);
        let _b = push(&mut region, &mut pool, 20, ChunkStatus::Used);

        let piece = region.split(&mut pool, a, 40, Keep::Low);
        assert_eq!(ranges(&region, &pool), [(0, 40), (40, 60), (100, 20)]);
        assert!(pool.get(piece).status.is_free());
        assert_eq!(pool.get(piece).owner, Some(region.id));
        assert_eq!(region.free_lists[bin_index(60)], Some(piece));
    }

    #[test]
    fn test_split_keep_high() {
        let (mut region, mut pool) = setup();
        let _a = push(&mut region, &mut pool, 20, ChunkStatus::Used);
        let b = push(&mut region, &mut pool, 100, ChunkStatus::Used);

        let piece = region.split(&mut pool, b, 50, Keep::High);
        assert_eq!(ranges(&region, &pool), [(0, 20), (20, 30), (50, 70)]);
        assert_eq!(pool.get(b).offset, 50);
        assert_eq!(region.free_lists[bin_index(30)], Some(piece));
        assert_eq!(region.tail, Some(b));
    }

    #[test]
    #[should_panic(expected = "outside of chunk")]
    fn test_split_at_edge() {
        let (mut region, mut pool) = setup();
        let a = push(&mut region, &mut pool, 100, ChunkStatus::Used);
        region.split(&mut pool, a, 100, Keep::Low);
    }

    #[test]
    fn test_coalesce_both_sides() {
        let (mut region, mut pool) = setup();
        let a = push(&mut region, &mut pool, 16, ChunkStatus::Free);
        let b = push(&mut region, &mut pool, 32, ChunkStatus::Used);
        let _c = push(&mut region, &mut pool, 64, ChunkStatus::Free);
        let _d = push(&mut region, &mut pool, 8, ChunkStatus::Used);
        let generation = pool.get(b).generation;

        pool.get_mut(b).status = ChunkStatus::Free;
        let merged = region.coalesce(&mut pool, b);
        assert_eq!(merged, a);
        assert_eq!(ranges(&region, &pool), [(0, 112), (112, 8)]);
        // absorbed records are recycled
        assert_eq!(pool.get(b).generation, generation + 1);
        assert_eq!(pool.stats().used_records(), 2);
        assert!(region.free_lists.iter().all(Option::is_none));
    }

    #[test]
    fn test_coalesce_without_free_neighbours() {
        let (mut region, mut pool) = setup();
        let _a = push(&mut region, &mut pool, 16, ChunkStatus::Used);
        let b = push(&mut region, &mut pool, 16, ChunkStatus::Used);
        let _c = push(&mut region, &mut pool, 16, ChunkStatus::Used);

        pool.get_mut(b).status = ChunkStatus::Free;
        assert_eq!(region.coalesce(&mut pool, b), b);
        assert_eq!(ranges(&region, &pool), [(0, 16), (16, 16), (32, 16)]);
    }
}
