//! The caller-owned registry of regions.

use alloc::vec::Vec;

use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, ensure};

use crate::{
    chunk::{ChunkId, ChunkInfo, Handle},
    chunk_pool::{ChunkPool, PageAllocator, SystemPages},
    error::{
        AllocError, HandleAlreadyFreedSnafu, InvalidParameterSnafu, UnknownHandleSnafu,
        UnknownRegionSnafu,
    },
    region::{AllocRequest, Region, RegionDump, RegionId, Status},
    trace::{TraceKind, TraceSink, TracingSink},
};

/// All regions sharing one chunk pool and one trace sink.
///
/// Every operation goes through the registry, which checks region ids and
/// handles before touching a region.
///
/// # Examples
///
/// ```
/// use remote_alloc::{AllocRequest, Registry};
///
/// let mut registry = Registry::new();
/// let dsp = registry.create(1024, 0x4000_0000, "dsp").unwrap();
///
/// let a = registry.alloc(dsp, &AllocRequest::new(64)).unwrap();
/// let b = registry.alloc(dsp, &AllocRequest::new(64)).unwrap();
/// assert_eq!(registry.offset(dsp, a).unwrap(), 0x4000_0000);
/// assert_eq!(registry.offset(dsp, b).unwrap(), 0x4000_0040);
///
/// registry.free(dsp, a).unwrap();
/// assert!(registry.free(dsp, a).is_err());
/// registry.destroy(dsp).unwrap();
/// ```
pub struct Registry<P = SystemPages, T = TracingSink> {
    pool: ChunkPool<P>,
    regions: Vec<Option<Region>>,
    trace: T,
}

impl<P, T> core::fmt::Debug for Registry<P, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("pool", &self.pool)
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry backed by the global allocator, tracing to
    /// [`tracing`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(ChunkPool::new(), TracingSink)
    }
}

impl<P, T> Registry<P, T>
where
    P: PageAllocator,
    T: TraceSink,
{
    #[must_use]
    pub fn with_parts(pool: ChunkPool<P>, trace: T) -> Self {
        Self {
            pool,
            regions: Vec::new(),
            trace,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &ChunkPool<P> {
        &self.pool
    }

    #[must_use]
    pub fn trace_sink(&self) -> &T {
        &self.trace
    }

    /// Returns the live regions in id order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().flatten()
    }

    pub fn region(&self, id: RegionId) -> Result<&Region, AllocError> {
        self.regions
            .get(usize::cast_from(id.value()))
            .and_then(Option::as_ref)
            .context(UnknownRegionSnafu { region: id })
    }

    fn parts(&mut self, id: RegionId) -> Result<(&mut Region, &mut ChunkPool<P>, &mut T), AllocError> {
        let region = self
            .regions
            .get_mut(usize::cast_from(id.value()))
            .and_then(Option::as_mut)
            .context(UnknownRegionSnafu { region: id })?;
        Ok((region, &mut self.pool, &mut self.trace))
    }

    /// Creates a region managing `[base_offset, base_offset + max_size)`.
    ///
    /// Nothing is committed until the first allocation. The id of a destroyed
    /// region may be handed out again.
    pub fn create(&mut self, max_size: u32, base_offset: u32, name: &str) -> Result<RegionId, AllocError> {
        let slot = self
            .regions
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.regions.len());
        let Ok(index) = u32::try_from(slot) else {
            return InvalidParameterSnafu {
                reason: "too many regions",
            }
            .fail();
        };
        let id = RegionId::new(index);
        let region = Region::new(id, name, base_offset, max_size)?;

        tracing::debug!(
            region = %id,
            name = region.name(),
            base = base_offset,
            max = max_size,
            "region created"
        );
        region.trace_lifecycle(&mut self.trace, TraceKind::Create);
        if slot == self.regions.len() {
            self.regions.push(Some(region));
        } else {
            self.regions[slot] = Some(region);
        }
        Ok(id)
    }

    /// Changes the maximum size of a region.
    ///
    /// Fails with [`AllocError::OutOfMemory`] if the committed part of the region
    /// would no longer fit. Chunks are never moved.
    pub fn resize(&mut self, region: RegionId, new_max_size: u32) -> Result<(), AllocError> {
        let (region, _, _) = self.parts(region)?;
        region.resize(new_max_size)
    }

    /// Destroys a region and recycles all of its chunks.
    ///
    /// Handles into the region become invalid.
    pub fn destroy(&mut self, region: RegionId) -> Result<(), AllocError> {
        let slot = usize::cast_from(region.value());
        let mut removed = self
            .regions
            .get_mut(slot)
            .and_then(Option::take)
            .context(UnknownRegionSnafu { region })?;
        removed.release_all(&mut self.pool);
        removed.trace_lifecycle(&mut self.trace, TraceKind::Destroy);
        tracing::debug!(region = %region, name = removed.name(), "region destroyed");

        // trailing empty slots
        while self.regions.last().is_some_and(Option::is_none) {
            self.regions.pop();
        }
        Ok(())
    }

    /// Destroys every region and returns all pool pages to the page
    /// allocator.
    pub fn teardown(&mut self) {
        for mut region in self.regions.drain(..).flatten() {
            region.release_all(&mut self.pool);
            region.trace_lifecycle(&mut self.trace, TraceKind::Destroy);
        }
        self.pool.reset();
        tracing::debug!("registry torn down");
    }

    /// Allocates a chunk.
    ///
    /// The chunk is placed at the lowest-class free chunk that can hold it,
    /// or at the end of the committed range, which grows as needed.
    pub fn alloc(&mut self, region: RegionId, request: &AllocRequest) -> Result<Handle, AllocError> {
        let (region, pool, trace) = self.parts(region)?;
        let id = region.alloc(pool, trace, request)?;
        Ok(Handle::new(id, pool.get(id).generation))
    }

    pub fn free(&mut self, region: RegionId, handle: Handle) -> Result<(), AllocError> {
        let (region, pool, trace) = self.parts(region)?;
        let id = validate(pool, region, handle)?;
        region.free(pool, trace, id);
        Ok(())
    }

    /// Moves an allocation to `[new_window_offset, new_window_offset +
    /// new_size)`.
    ///
    /// The chunk is freed first and then allocated again, so the new range
    /// may overlap the old one. If no such placement exists the original
    /// range is allocated again and [`AllocError::OutOfMemory`] is returned.
    ///
    /// In both cases `handle` is updated to refer to the resulting chunk.
    /// The domain and user data of the chunk are kept.
    pub fn realloc(
        &mut self,
        region: RegionId,
        handle: &mut Handle,
        new_size: u32,
        new_window_offset: u32,
    ) -> Result<(), AllocError> {
        let (region, pool, trace) = self.parts(region)?;
        let mut id = validate(pool, region, *handle)?;
        let result = region.realloc(pool, trace, &mut id, new_size, new_window_offset);
        *handle = Handle::new(id, pool.get(id).generation);
        result
    }

    /// Returns a snapshot of the chunk behind a handle.
    pub fn chunk(&self, region: RegionId, handle: Handle) -> Result<ChunkInfo, AllocError> {
        let region = self.region(region)?;
        let id = validate(&self.pool, region, handle)?;
        Ok(self.pool.get(id).info())
    }

    pub fn offset(&self, region: RegionId, handle: Handle) -> Result<u32, AllocError> {
        self.chunk(region, handle).map(|chunk| chunk.offset)
    }

    pub fn size(&self, region: RegionId, handle: Handle) -> Result<u32, AllocError> {
        self.chunk(region, handle).map(|chunk| chunk.size)
    }

    pub fn user_data(&self, region: RegionId, handle: Handle) -> Result<u16, AllocError> {
        self.chunk(region, handle).map(|chunk| chunk.user_data)
    }

    pub fn set_user_data(&mut self, region: RegionId, handle: Handle, user_data: u16) -> Result<(), AllocError> {
        let (region, pool, _) = self.parts(region)?;
        let id = validate(pool, region, handle)?;
        pool.get_mut(id).user_data = user_data;
        Ok(())
    }

    /// Finds the region an allocation belongs to.
    #[must_use]
    pub fn locate(&self, handle: Handle) -> Option<RegionId> {
        if !self.pool.contains(handle.id()) {
            return None;
        }
        let owner = self.pool.get(handle.id()).owner?;
        let region = self.region(owner).ok()?;
        validate(&self.pool, region, handle).ok()?;
        Some(owner)
    }

    /// Returns every chunk of a region in address order.
    pub fn chunks(&self, region: RegionId) -> Result<impl Iterator<Item = ChunkInfo> + '_, AllocError> {
        let region = self.region(region)?;
        Ok(region.chunk_infos(&self.pool))
    }

    /// Returns block statistics for a region.
    ///
    /// `probe_offset` and `probe_size` describe a domain window; only the
    /// size is reported back, in [`Status::domain`].
    pub fn status(&self, region: RegionId, probe_offset: u32, probe_size: u32) -> Result<Status, AllocError> {
        let region = self.region(region)?;
        Ok(region.status(&self.pool, probe_offset, probe_size))
    }

    /// Returns a printable table of a region and its chunks.
    pub fn dump(&self, region: RegionId) -> Result<RegionDump<'_, P>, AllocError> {
        let region = self.region(region)?;
        Ok(region.dump(&self.pool))
    }

    /// Writes [`dump`](Self::dump) to the log at `DEBUG` level.
    pub fn log_dump(&self, region: RegionId) -> Result<(), AllocError> {
        let dump = self.dump(region)?;
        tracing::debug!("\n{dump}");
        Ok(())
    }

    /// Checks the structural invariants of a region.
    ///
    /// # Panics
    ///
    /// Panics if the region's chunk lists are inconsistent: chunks that are
    /// not contiguous, adjacent free chunks, a free last chunk, unsorted or
    /// misfiled free lists, or sizes that do not add up to the committed
    /// size.
    pub fn check_invariants(&self, region: RegionId) -> Result<(), AllocError> {
        let region = self.region(region)?;
        region.check_invariants(&self.pool);
        Ok(())
    }
}

/// Resolves a handle to a used chunk of `region`.
fn validate<P>(pool: &ChunkPool<P>, region: &Region, handle: Handle) -> Result<ChunkId, AllocError>
where
    P: PageAllocator,
{
    let id = handle.id();
    ensure!(pool.contains(id), UnknownHandleSnafu { handle });
    let chunk = pool.get(id);
    ensure!(
        chunk.generation == handle.generation() && chunk.owner == Some(region.id()),
        UnknownHandleSnafu { handle }
    );
    ensure!(chunk.status.is_used(), HandleAlreadyFreedSnafu { handle });
    Ok(id)
}
