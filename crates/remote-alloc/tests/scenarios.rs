#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use remote_alloc::{
    AllocError, AllocRequest, ChunkStatus, Registry, RegionId,
    chunk_pool::{ChunkPool, LimitedPages, PoolConfig},
    trace::NullSink,
};

fn layout(registry: &Registry, region: RegionId) -> Vec<(u32, u32, ChunkStatus)> {
    registry
        .chunks(region)
        .unwrap()
        .map(|chunk| (chunk.offset, chunk.size, chunk.status))
        .collect()
}

#[test]
fn reuse_freed_prefix() {
    let mut registry = Registry::new();
    let region = registry.create(1024, 0, "scenario").unwrap();

    let a = registry.alloc(region, &AllocRequest::new(64)).unwrap();
    let b = registry.alloc(region, &AllocRequest::new(64)).unwrap();
    assert_eq!(registry.offset(region, a).unwrap(), 0);
    assert_eq!(registry.offset(region, b).unwrap(), 64);

    registry.free(region, a).unwrap();
    let c = registry.alloc(region, &AllocRequest::new(32)).unwrap();
    assert_eq!(registry.offset(region, c).unwrap(), 0);
    assert_eq!(
        layout(&registry, region),
        [
            (0, 32, ChunkStatus::Used),
            (32, 32, ChunkStatus::Free),
            (64, 64, ChunkStatus::Used),
        ]
    );
    registry.check_invariants(region).unwrap();
}

#[test]
fn request_larger_than_window() {
    let mut registry = Registry::new();
    let region = registry.create(1024, 0, "scenario").unwrap();
    let err = registry
        .alloc(region, &AllocRequest::new(2000).with_window(0, 1024))
        .unwrap_err();
    assert!(matches!(err, AllocError::InvalidParameter { .. }));
    assert_eq!(registry.region(region).unwrap().committed_size(), 0);
}

#[test]
fn adjacent_frees_coalesce() {
    for order in [[0, 1], [1, 0]] {
        let mut registry = Registry::new();
        let region = registry.create(1024, 0x2000, "scenario").unwrap();
        let handles = [
            registry.alloc(region, &AllocRequest::new(64)).unwrap(),
            registry.alloc(region, &AllocRequest::new(64)).unwrap(),
        ];
        let guard = registry.alloc(region, &AllocRequest::new(16)).unwrap();

        for index in order {
            registry.free(region, handles[index]).unwrap();
        }
        assert_eq!(
            layout(&registry, region),
            [(0x2000, 128, ChunkStatus::Free), (0x2080, 16, ChunkStatus::Used)]
        );

        let merged = registry.alloc(region, &AllocRequest::new(128)).unwrap();
        assert_eq!(registry.offset(region, merged).unwrap(), 0x2000);

        registry.free(region, guard).unwrap();
        registry.free(region, merged).unwrap();
        assert_eq!(registry.region(region).unwrap().committed_size(), 0);
    }
}

#[test]
fn allocations_respect_alignment_and_window() {
    let mut registry = Registry::new();
    let region = registry.create(1 << 20, 0x1000_0000, "scenario").unwrap();
    let cases = [
        (24, 8, 0x1000_0000, 0x100),
        (100, 64, 0x1000_0100, 0x1000),
        (7, 0, 0x1000_0030, 7),
        (4096, 4096, 0x1000_2000, 0x2000),
        (33, 48, 0x1000_0000, u32::MAX - 0x1000_0000),
    ];
    for (size, align, window_offset, window_size) in cases {
        let request = AllocRequest::new(size)
            .with_alignment(align)
            .with_window(window_offset, window_size);
        let handle = registry.alloc(region, &request).unwrap();
        let offset = registry.offset(region, handle).unwrap();
        assert_eq!(registry.size(region, handle).unwrap(), size);
        assert_eq!(offset % align.max(1), 0);
        assert!(offset >= window_offset);
        assert!(u64::from(offset) + u64::from(size) <= u64::from(window_offset) + u64::from(window_size));
        registry.check_invariants(region).unwrap();
    }
}

#[test]
fn resize_only_changes_the_budget() {
    let mut registry = Registry::new();
    let region = registry.create(1024, 0, "scenario").unwrap();
    let _a = registry.alloc(region, &AllocRequest::new(300)).unwrap();
    let before = layout(&registry, region);

    assert!(registry.resize(region, 0).unwrap_err().is_invalid_parameter());
    assert!(registry.resize(region, 299).unwrap_err().is_out_of_memory());
    registry.resize(region, 300).unwrap();
    assert!(registry.alloc(region, &AllocRequest::new(1)).is_err());

    registry.resize(region, 2048).unwrap();
    assert_eq!(layout(&registry, region), before);
    let b = registry.alloc(region, &AllocRequest::new(1700)).unwrap();
    assert_eq!(registry.offset(region, b).unwrap(), 300);
}

#[test]
fn bounded_metadata() {
    let config = PoolConfig::new().with_records_per_page(8);
    let pool = ChunkPool::with_allocator(config, LimitedPages::new(2));
    let mut registry = Registry::with_parts(pool, NullSink);
    let region = registry.create(1 << 16, 0, "scenario").unwrap();

    let mut handles = Vec::new();
    let err = loop {
        match registry.alloc(region, &AllocRequest::new(8)) {
            Ok(handle) => handles.push(handle),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, AllocError::OutOfPages { records: 8, .. }));
    assert_eq!(handles.len(), 15);
    assert_eq!(registry.pool().allocator().remaining(), 0);

    registry.teardown();
    assert_eq!(registry.pool().allocator().outstanding(), 0);
    assert!(matches!(
        registry.alloc(region, &AllocRequest::new(8)).unwrap_err(),
        AllocError::UnknownRegion { .. }
    ));
}
