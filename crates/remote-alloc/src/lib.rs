//! Offset allocator for externally owned address spaces.
//!
//! This crate hands out sub-ranges of a linear address space that the
//! allocator itself never touches, such as the memory of a DSP or a shared
//! memory window. Only offsets and sizes are tracked; the bookkeeping lives in
//! ordinary host memory.
//!
//! # Overview
//!
//! A [`Registry`] owns any number of [regions](region::Region). Each region
//! manages `[base_offset, base_offset + max_size)` and grows a committed
//! prefix on demand. Within the committed prefix, memory is described by
//! chunks kept in an address-ordered list, and free chunks are additionally
//! filed into one of [63 size classes](bin).
//!
//! Allocation is first fit over the size classes, honouring an alignment and
//! an optional window the allocation must fall into. Freed chunks are merged
//! with free neighbours, and a free chunk at the end of the committed prefix is
//! given back to the uncommitted range.
//!
//! Chunk records are drawn from a [`ChunkPool`](chunk_pool::ChunkPool) that
//! requests pages from a [`PageAllocator`](chunk_pool::PageAllocator), so
//! metadata can be budgeted independently of the managed space.
//!
//! # Usage Examples
//!
//! ```rust
//! use remote_alloc::{AllocRequest, Registry};
//!
//! let mut registry = Registry::new();
//! let region = registry.create(1024, 0, "dsp").unwrap();
//!
//! let a = registry.alloc(region, &AllocRequest::new(64)).unwrap();
//! let b = registry.alloc(region, &AllocRequest::new(64)).unwrap();
//! assert_eq!(registry.offset(region, a).unwrap(), 0);
//! assert_eq!(registry.offset(region, b).unwrap(), 64);
//!
//! // the hole left by `a` is reused
//! registry.free(region, a).unwrap();
//! let c = registry.alloc(region, &AllocRequest::new(32)).unwrap();
//! assert_eq!(registry.offset(region, c).unwrap(), 0);
//!
//! // aligned, inside a window
//! let d = registry
//!     .alloc(region, &AllocRequest::new(100).with_alignment(256).with_window(256, 512))
//!     .unwrap();
//! assert_eq!(registry.offset(region, d).unwrap(), 256);
//!
//! registry.check_invariants(region).unwrap();
//! ```
//!
//! # Design Considerations
//!
//! ## Handles
//!
//! Allocations are referred to by [`Handle`]s, which index chunk records and
//! carry a generation. Freed or recycled records never satisfy an old handle,
//! so double frees and use after free are reported as errors.
//!
//! ## Thread Safety
//!
//! Nothing is synchronized internally. Every mutating operation takes
//! `&mut Registry`; wrap the registry in a mutex to share it.
//!
//! ## Tracing
//!
//! Region lifecycle and every allocation are reported to a
//! [`TraceSink`](trace::TraceSink). The default sink forwards events to
//! [`tracing`] under the `remote_alloc::trace` target.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    chunk::{ChunkId, ChunkInfo, ChunkStatus, Handle},
    error::AllocError,
    region::{AllocRequest, BlockStats, Region, RegionDump, RegionId, Status},
    registry::Registry,
};

pub mod bin;
pub mod chunk;
pub mod chunk_pool;
mod error;
pub mod region;
mod registry;
pub mod trace;
