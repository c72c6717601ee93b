//! Address-ordered chunk list and size-class free lists of a region.

use super::Region;
use crate::{
    bin::bin_index,
    chunk::{ChunkId, ChunkRecord},
    chunk_pool::{ChunkPool, PageAllocator},
};

/// Chunks of a region in address order.
pub(crate) struct AddressOrder<'a, P> {
    pool: &'a ChunkPool<P>,
    next: Option<ChunkId>,
}

impl<'a, P> Iterator for AddressOrder<'a, P>
where
    P: PageAllocator,
{
    type Item = (ChunkId, &'a ChunkRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let chunk = self.pool.get(id);
        self.next = chunk.next;
        Some((id, chunk))
    }
}

/// Chunks of one free list, smallest first.
pub(crate) struct FreeOrder<'a, P> {
    pool: &'a ChunkPool<P>,
    next: Option<ChunkId>,
}

impl<'a, P> Iterator for FreeOrder<'a, P>
where
    P: PageAllocator,
{
    type Item = (ChunkId, &'a ChunkRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let chunk = self.pool.get(id);
        self.next = chunk.next_free;
        Some((id, chunk))
    }
}

impl Region {
    pub(crate) fn chunks<'a, P>(&self, pool: &'a ChunkPool<P>) -> AddressOrder<'a, P> {
        AddressOrder {
            pool,
            next: self.head,
        }
    }

    pub(crate) fn free_list<'a, P>(&self, pool: &'a ChunkPool<P>, bin: usize) -> FreeOrder<'a, P> {
        FreeOrder {
            pool,
            next: self.free_lists[bin],
        }
    }

    /// Inserts a free chunk before the first entry of its bin that is at least
    /// as large.
    pub(super) fn insert_free<P>(&mut self, pool: &mut ChunkPool<P>, id: ChunkId)
    where
        P: PageAllocator,
    {
        let size = pool.get(id).size;
        let bin = bin_index(size);

        let mut prev = None;
        let mut cursor = self.free_lists[bin];
        while let Some(current) = cursor {
            let chunk = pool.get(current);
            if chunk.size >= size {
                break;
            }
            prev = Some(current);
            cursor = chunk.next_free;
        }

        let chunk = pool.get_mut(id);
        debug_assert!(chunk.status.is_free());
        chunk.prev_free = prev;
        chunk.next_free = cursor;
        match prev {
            Some(prev) => pool.get_mut(prev).next_free = Some(id),
            None => self.free_lists[bin] = Some(id),
        }
        if let Some(next) = cursor {
            pool.get_mut(next).prev_free = Some(id);
        }
    }

    /// Removes a free chunk from its free list.
    ///
    /// Must be called before the chunk's size changes, since the size
    /// determines the list it is on.
    pub(super) fn remove_free<P>(&mut self, pool: &mut ChunkPool<P>, id: ChunkId)
    where
        P: PageAllocator,
    {
        let chunk = pool.get_mut(id);
        let (prev, next) = (chunk.prev_free.take(), chunk.next_free.take());
        let bin = bin_index(chunk.size);
        match prev {
            Some(prev) => pool.get_mut(prev).next_free = next,
            None => {
                debug_assert_eq!(self.free_lists[bin], Some(id), "chunk {id} is not on its free list");
                self.free_lists[bin] = next;
            }
        }
        if let Some(next) = next {
            pool.get_mut(next).prev_free = prev;
        }
    }

    /// Links `id` into the address list right after `after`, or at the head.
    pub(super) fn link_after<P>(&mut self, pool: &mut ChunkPool<P>, after: Option<ChunkId>, id: ChunkId)
    where
        P: PageAllocator,
    {
        let next = match after {
            Some(after) => pool.get(after).next,
            None => self.head,
        };
        let chunk = pool.get_mut(id);
        chunk.prev = after;
        chunk.next = next;
        match after {
            Some(after) => pool.get_mut(after).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(next) => pool.get_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    pub(super) fn unlink<P>(&mut self, pool: &mut ChunkPool<P>, id: ChunkId)
    where
        P: PageAllocator,
    {
        let chunk = pool.get_mut(id);
        let (prev, next) = (chunk.prev.take(), chunk.next.take());
        match prev {
            Some(prev) => pool.get_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => pool.get_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionId;

    fn setup() -> (Region, ChunkPool) {
        let region = Region::new(RegionId::new(0), "lists", 0, 1 << 16).unwrap();
        let mut pool = ChunkPool::new();
        pool.ensure_capacity(16).unwrap();
        (region, pool)
    }

    fn free_chunk(pool: &mut ChunkPool, offset: u32, size: u32) -> ChunkId {
        let id = pool.take();
        let chunk = pool.get_mut(id);
        chunk.offset = offset;
        chunk.size = size;
        id
    }

    fn sizes(region: &Region, pool: &ChunkPool, bin: usize) -> Vec<(ChunkId, u32)> {
        region
            .free_list(pool, bin)
            .map(|(id, chunk)| (id, chunk.size))
            .collect()
    }

    #[test]
    fn test_insert_keeps_bins_sorted() {
        let (mut region, mut pool) = setup();
        // all in bin 32 (64..80)
        let a = free_chunk(&mut pool, 0, 70);
        let b = free_chunk(&mut pool, 100, 64);
        let c = free_chunk(&mut pool, 200, 79);
        let d = free_chunk(&mut pool, 300, 70);
        for id in [a, b, c, d] {
            region.insert_free(&mut pool, id);
        }
        // equal sizes: the newest goes first
        assert_eq!(sizes(&region, &pool, 32), [(b, 64), (d, 70), (a, 70), (c, 79)]);

        let e = free_chunk(&mut pool, 400, 8);
        region.insert_free(&mut pool, e);
        assert_eq!(sizes(&region, &pool, 4), [(e, 8)]);
    }

    #[test]
    fn test_remove_from_head_middle_and_tail() {
        let (mut region, mut pool) = setup();
        let a = free_chunk(&mut pool, 0, 64);
        let b = free_chunk(&mut pool, 100, 66);
        let c = free_chunk(&mut pool, 200, 68);
        let d = free_chunk(&mut pool, 300, 70);
        for id in [a, b, c, d] {
            region.insert_free(&mut pool, id);
        }

        region.remove_free(&mut pool, b);
        assert_eq!(sizes(&region, &pool, 32), [(a, 64), (c, 68), (d, 70)]);
        region.remove_free(&mut pool, a);
        assert_eq!(sizes(&region, &pool, 32), [(c, 68), (d, 70)]);
        region.remove_free(&mut pool, d);
        assert_eq!(sizes(&region, &pool, 32), [(c, 68)]);
        region.remove_free(&mut pool, c);
        assert!(sizes(&region, &pool, 32).is_empty());
        assert!(pool.get(c).prev_free.is_none() && pool.get(c).next_free.is_none());
    }

    #[test]
    fn test_link_and_unlink() {
        let (mut region, mut pool) = setup();
        let a = free_chunk(&mut pool, 0, 16);
        let b = free_chunk(&mut pool, 16, 16);
        let c = free_chunk(&mut pool, 32, 16);
        region.link_after(&mut pool, None, b);
        region.link_after(&mut pool, Some(b), c);
        region.link_after(&mut pool, None, a);

        let order: Vec<_> = region.chunks(&pool).map(|(id, _)| id).collect();
        assert_eq!(order, [a, b, c]);
        assert_eq!((region.head, region.tail), (Some(a), Some(c)));
        assert_eq!(pool.get(b).prev, Some(a));

        region.unlink(&mut pool, b);
        assert_eq!(pool.get(a).next, Some(c));
        assert_eq!(pool.get(c).prev, Some(a));
        region.unlink(&mut pool, c);
        assert_eq!(region.tail, Some(a));
        region.unlink(&mut pool, a);
        assert_eq!((region.head, region.tail), (None, None));
        assert_eq!(region.chunks(&pool).count(), 0);
    }
}
