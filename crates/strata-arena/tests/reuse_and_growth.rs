//! Integration test: free-space reuse and zone growth.
//!
//! A freed block must be found again by the next fitting allocation
//! without creating a zone, and an exhausted zone must spill into exactly
//! one new zone at the next index.

use strata_arena::zone::BLOCK_HEADER_SIZE;
use strata_arena::{Allocator, ArenaConfig, SafetyTier};
use strata_test_utils::{alloc_pattern, check_pattern, paranoid};

const INITIAL: u32 = 512 * 1024;

fn allocator() -> Allocator {
    Allocator::new(ArenaConfig::new(INITIAL).with_safety(SafetyTier::Paranoid)).unwrap()
}

#[test]
fn freed_block_is_reused_without_new_zone() {
    let mut a = allocator();
    let h1 = a.alloc(100).unwrap();
    let h2 = a.alloc(4000).unwrap();
    let h3 = a.alloc(50).unwrap();
    assert_eq!(a.zone_count(), 1);

    a.free(h2).unwrap();
    let h4 = a.alloc(3900).unwrap();
    assert_eq!(a.zone_count(), 1, "reuse must not create a zone");
    assert_eq!(h4.zone_index(), h2.zone_index());
    assert_eq!(h4.offset(), h2.offset());

    a.free(h4).unwrap();
    a.free(h1).unwrap();
    a.free(h3).unwrap();
    assert_eq!(a.is_empty_zone(0), Some(true));
    assert_eq!(a.zone(0).unwrap().used(), 0);
    a.check_consistency().unwrap();
}

#[test]
fn exhausted_zone_spills_into_next_index() {
    let mut a = allocator();
    let fill = a.alloc(INITIAL - BLOCK_HEADER_SIZE).unwrap();
    assert_eq!(fill.zone_index(), 0);
    assert_eq!(a.zone_stats(0).unwrap().free, 0);

    let before = a.zone_count();
    let extra = a.alloc(1).unwrap();
    assert_eq!(extra.zone_index(), 1);
    assert_eq!(a.zone_count(), before + 1);
}

#[test]
fn released_zone_leaves_hole_that_is_reused() {
    let mut a = paranoid(1024);
    let _fill = a.alloc(1024 - BLOCK_HEADER_SIZE).unwrap();
    let z1 = a.alloc(900).unwrap();
    let z2 = a.alloc(900).unwrap();
    assert_eq!((z1.zone_index(), z2.zone_index()), (1, 2));

    a.free(z1).unwrap();
    assert!(a.zone(1).is_none(), "empty zone must be released");
    assert_eq!(a.zone_count(), 3, "release leaves a hole");
    assert_eq!(a.live_zone_count(), 2);

    let again = a.alloc(900).unwrap();
    assert_eq!(again.zone_index(), 1, "lowest hole is reused first");
}

#[test]
fn zone_zero_survives_becoming_empty() {
    let mut a = paranoid(4096);
    let p = a.alloc(64).unwrap();
    a.free(p).unwrap();
    assert!(a.zone(0).is_some());
    assert_eq!(a.used_size(), 0);
}

#[test]
fn coalescing_restores_one_free_block() {
    let mut a = paranoid(4096);
    let ptrs: Vec<_> = (0..8).map(|i| alloc_pattern(&mut a, 100, i)).collect();
    for (i, &p) in ptrs.iter().enumerate().rev() {
        if i % 2 == 0 {
            a.free(p).unwrap();
        }
    }
    for (i, &p) in ptrs.iter().enumerate() {
        if i % 2 == 1 {
            assert!(check_pattern(&a, p, 100, i as u8));
            a.free(p).unwrap();
        }
    }
    let stats = a.zone_stats(0).unwrap();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.used, 0);
}

#[test]
fn many_zones_grow_the_zone_table() {
    let mut a = paranoid(256);
    let ptrs: Vec<_> = (0..50u8)
        .map(|i| alloc_pattern(&mut a, 256 - BLOCK_HEADER_SIZE, i))
        .collect();
    assert_eq!(a.zone_count(), 50);
    assert!(a.zone_capacity() >= 50);
    for (i, &p) in ptrs.iter().enumerate() {
        assert!(check_pattern(&a, p, 256 - BLOCK_HEADER_SIZE, i as u8));
    }
    for p in ptrs.into_iter().skip(1) {
        a.free(p).unwrap();
    }
    assert_eq!(a.live_zone_count(), 1);
}

#[test]
fn max_size_caps_new_zones() {
    let config = ArenaConfig::new(1024).with_max_size(4096);
    let mut a = Allocator::new(config).unwrap();
    let mut count = 0;
    while a.alloc(1000).is_ok() {
        count += 1;
        assert!(count < 16, "max_size never enforced");
    }
    assert!(a.total_size() <= 4096);
}
