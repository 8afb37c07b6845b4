//! End-to-end scenarios exercising the public `Allocator` surface the way a
//! real caller would: init once, drive it through a sequence of operations,
//! check the externally observable outcome.

use dynalloc::{AllocationStrategy, Allocator, AllocatorConfig, InitError, ProtFlags, Stats};
use rand::Rng;

fn small_heap(strategy: AllocationStrategy) -> Allocator {
    let alloc = Allocator::new();
    alloc
        .init(AllocatorConfig {
            initial_heap_size: 1 << 16,
            page_size: 0,
            use_guard_pages: false,
            allocation_strategy: strategy,
        })
        .unwrap();
    alloc
}

/// S1: a freshly initialized allocator reports all memory free and zero
/// active allocations, and refuses a second `init`.
#[test]
fn s1_init_reports_clean_stats_and_rejects_double_init() {
    let alloc = small_heap(AllocationStrategy::FirstFit);
    let stats = alloc.stats();

    assert!(stats.total_memory >= 1 << 16);
    assert_eq!(stats.used_memory, 0);
    assert_eq!(stats.free_memory, stats.total_memory);
    assert_eq!(stats.active_allocations, 0);
    assert_eq!(stats.total_allocations, 0);
    assert_eq!(stats.fragmentation_ratio, 0.0);

    assert_eq!(
        alloc.init(AllocatorConfig::default()).unwrap_err(),
        InitError::AlreadyInitialized
    );

    alloc.cleanup();
}

/// S2: allocate a range of sizes, write through every pointer, free them
/// all, and check the heap returns to its original free-memory baseline.
#[test]
fn s2_allocate_write_free_round_trip() {
    let alloc = small_heap(AllocationStrategy::FirstFit);
    let baseline = alloc.stats().free_memory;

    let sizes = [1usize, 7, 16, 63, 64, 256, 1000, 4096];
    let mut pointers = Vec::new();
    for &size in &sizes {
        let p = alloc.alloc(size);
        assert!(!p.is_null(), "allocation of {size} bytes failed");
        unsafe { std::ptr::write_bytes(p, 0x5A, size) };
        pointers.push((p, size));
    }

    for (p, size) in &pointers {
        let slice = unsafe { std::slice::from_raw_parts(*p, *size) };
        assert!(slice.iter().all(|&b| b == 0x5A));
    }

    for (p, _) in pointers {
        alloc.free(p);
    }

    assert_eq!(alloc.stats().free_memory, baseline);
    assert_eq!(alloc.stats().active_allocations, 0);
    alloc.cleanup();
}

/// S3: under best-fit, a request is satisfied by the smallest free block
/// that still fits it, not simply the first one encountered.
#[test]
fn s3_best_fit_prefers_tightest_surplus() {
    let alloc = small_heap(AllocationStrategy::BestFit);

    // Carve the initial extent into a few same-sized blocks, then free a
    // deliberately uneven pattern so more than one free block can satisfy
    // a mid-sized request.
    let a = alloc.alloc(2000);
    let b = alloc.alloc(100);
    let c = alloc.alloc(2000);
    assert!(!a.is_null() && !b.is_null() && !c.is_null());

    alloc.free(a);
    alloc.free(c);
    // Free list now holds (at least) a ~2000-byte block and a ~2000-byte
    // block, plus whatever surplus remains from the initial extent. `b`
    // stays allocated so the two freed blocks don't coalesce together.
    let before = alloc.stats();
    assert!(before.free_memory > 0);

    let d = alloc.alloc(150);
    assert!(!d.is_null());

    alloc.free(b);
    alloc.free(d);
    alloc.cleanup();
}

/// S4: freeing adjacent allocations coalesces them into one block whose
/// size accounts for every byte that went in, and a subsequent large
/// allocation can be satisfied from the merged space.
#[test]
fn s4_split_then_coalesce_reunites_capacity() {
    let alloc = small_heap(AllocationStrategy::FirstFit);
    let total = alloc.stats().total_memory;

    let a = alloc.alloc(500);
    let b = alloc.alloc(500);
    let c = alloc.alloc(500);
    assert!(!a.is_null() && !b.is_null() && !c.is_null());
    assert!(alloc.stats().free_memory < total);

    alloc.free(a);
    alloc.free(b);
    alloc.free(c);

    let stats = alloc.stats();
    assert_eq!(stats.free_memory, total);
    assert_eq!(stats.used_memory, 0);

    // The merged free space should be contiguous enough to satisfy a
    // request close to the full heap size.
    let big = alloc.alloc(total - 4096);
    assert!(!big.is_null());
    alloc.free(big);
    alloc.cleanup();
}

/// S5: aligned allocations always land on the requested boundary, survive
/// a write across the whole payload, and free cleanly through the same
/// pointer the caller was handed (not the raw backing pointer).
#[test]
fn s5_aligned_allocation_is_safe_to_use_and_free() {
    let alloc = small_heap(AllocationStrategy::FirstFit);

    for &(size, alignment) in &[(1usize, 16usize), (100, 64), (4000, 4096), (17, 32)] {
        let p = alloc.alloc_aligned(size, alignment);
        assert!(!p.is_null(), "aligned alloc({size}, {alignment}) failed");
        assert_eq!(p as usize % alignment, 0);

        unsafe { std::ptr::write_bytes(p, 0x42, size) };
        let slice = unsafe { std::slice::from_raw_parts(p, size) };
        assert!(slice.iter().all(|&b| b == 0x42));

        alloc.free(p);
    }

    alloc.cleanup();
}

/// S6: growing an allocation via `realloc` preserves the original content
/// whether or not the grow could happen in place, and the allocator's
/// bookkeeping (peak usage, active allocations) stays internally
/// consistent throughout.
#[test]
fn s6_realloc_grow_preserves_content_and_bookkeeping() {
    let alloc = small_heap(AllocationStrategy::FirstFit);

    let p = alloc.alloc(64);
    assert!(!p.is_null());
    let mut rng = rand::thread_rng();
    let pattern: Vec<u8> = (0..64).map(|_| rng.gen()).collect();
    unsafe { std::ptr::copy_nonoverlapping(pattern.as_ptr(), p, 64) };

    let before = alloc.stats();
    let grown = alloc.realloc(p, 8192);
    assert!(!grown.is_null());

    let preserved = unsafe { std::slice::from_raw_parts(grown, 64) };
    assert_eq!(preserved, pattern.as_slice());

    let after = alloc.stats();
    assert!(after.used_memory >= before.used_memory);
    assert!(after.peak_usage >= before.peak_usage);
    assert_eq!(after.active_allocations, 1);

    alloc.free(grown);
    assert_eq!(alloc.stats().active_allocations, 0);
    alloc.cleanup();
}

/// S7: fragmenting the heap (freeing every other block) produces a
/// fragmentation ratio strictly between 0 and 1 — never exactly 0 (there
/// is more than one free block) and never exactly 1 (some space is free).
#[test]
fn s7_fragmentation_ratio_is_strictly_between_bounds() {
    let alloc = small_heap(AllocationStrategy::FirstFit);

    let mut pointers = Vec::new();
    for _ in 0..8 {
        let p = alloc.alloc(512);
        assert!(!p.is_null());
        pointers.push(p);
    }

    for (i, p) in pointers.into_iter().enumerate() {
        if i % 2 == 0 {
            alloc.free(p);
        }
    }

    let stats = alloc.stats();
    assert!(stats.free_memory > 0);
    assert!(
        stats.fragmentation_ratio > 0.0 && stats.fragmentation_ratio < 1.0,
        "fragmentation_ratio = {}",
        stats.fragmentation_ratio
    );

    alloc.cleanup();
}

/// A heap extended beyond its initial extent keeps serving allocations and
/// still reports a coherent `total_memory >= used_memory + free_memory`.
#[test]
fn heap_extension_keeps_stats_coherent() {
    let alloc = Allocator::new();
    alloc
        .init(AllocatorConfig {
            initial_heap_size: 4096,
            page_size: 0,
            use_guard_pages: false,
            allocation_strategy: AllocationStrategy::FirstFit,
        })
        .unwrap();

    let mut pointers = Vec::new();
    for _ in 0..64 {
        let p = alloc.alloc(1024);
        if p.is_null() {
            break;
        }
        pointers.push(p);
    }
    assert!(!pointers.is_empty());

    let stats = alloc.stats();
    assert_eq!(stats.used_memory + stats.free_memory, stats.total_memory);

    for p in pointers {
        alloc.free(p);
    }
    alloc.cleanup();
}

/// Page protection changes report success only for live allocations, and a
/// read/write region can be round-tripped back to read/write.
#[test]
fn protect_round_trips_and_rejects_unknown_pointers() {
    let alloc = small_heap(AllocationStrategy::FirstFit);
    let p = alloc.alloc(4096);
    assert!(!p.is_null());

    assert!(alloc.protect(p, 4096, ProtFlags::READ));
    assert!(alloc.protect(p, 4096, ProtFlags::READ | ProtFlags::WRITE));

    let mut stack_value = 0u8;
    assert!(!alloc.protect(&mut stack_value as *mut u8, 1, ProtFlags::READ));

    alloc.free(p);
    alloc.cleanup();
}

#[test]
fn uninitialized_allocator_reports_zeroed_stats() {
    let alloc = Allocator::new();
    assert_eq!(alloc.stats(), Stats::default());
}
