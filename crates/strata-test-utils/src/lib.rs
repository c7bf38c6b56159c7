//! Test utilities for Strata development.
//!
//! Provides an allocator builder with test-friendly defaults, byte-pattern
//! helpers for checking that payloads survive moves and snapshots, and the
//! service fixtures in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use strata_arena::{Allocator, ArenaConfig, MemPtr, SafetyTier};
use strata_core::AllocatorId;

/// Builder for allocators used in tests.
///
/// Defaults to a 4 KiB initial zone and [`SafetyTier::Paranoid`], so every
/// mutation is followed by a consistency walk.
pub struct TestAllocatorBuilder {
    config: ArenaConfig,
    id: AllocatorId,
}

impl TestAllocatorBuilder {
    pub fn new() -> Self {
        Self {
            config: ArenaConfig::new(4096).with_safety(SafetyTier::Paranoid),
            id: AllocatorId::EMPTY,
        }
    }

    pub fn initial_size(mut self, initial_size: u32) -> Self {
        self.config.initial_size = initial_size;
        self
    }

    pub fn max_size(mut self, max_size: u32) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn safety(mut self, safety: SafetyTier) -> Self {
        self.config.safety = safety;
        self
    }

    pub fn id(mut self, id: AllocatorId) -> Self {
        self.id = id;
        self
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Build the allocator. Panics on an invalid config.
    pub fn build(self) -> Allocator {
        match Allocator::with_id(self.id, self.config) {
            Ok(allocator) => allocator,
            Err(e) => panic!("test allocator config rejected: {e}"),
        }
    }
}

impl Default for TestAllocatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A paranoid allocator with the given initial zone size.
pub fn paranoid(initial_size: u32) -> Allocator {
    TestAllocatorBuilder::new().initial_size(initial_size).build()
}

/// Deterministic byte for position `i` of a buffer seeded with `seed`.
pub fn pattern_byte(seed: u8, i: usize) -> u8 {
    (i as u8).wrapping_mul(31).wrapping_add(seed)
}

/// Fill `bytes` with the pattern for `seed`.
pub fn fill_pattern(bytes: &mut [u8], seed: u8) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = pattern_byte(seed, i);
    }
}

/// Whether `bytes` hold the pattern for `seed`.
pub fn has_pattern(bytes: &[u8], seed: u8) -> bool {
    bytes.iter().enumerate().all(|(i, &b)| b == pattern_byte(seed, i))
}

/// Allocate `size` bytes and fill them with the pattern for `seed`.
pub fn alloc_pattern(allocator: &mut Allocator, size: u32, seed: u8) -> MemPtr {
    let ptr = match allocator.alloc(size) {
        Ok(ptr) => ptr,
        Err(e) => panic!("alloc({size}) failed: {e}"),
    };
    match allocator.bytes_mut(ptr) {
        Ok(bytes) => fill_pattern(&mut bytes[..size as usize], seed),
        Err(e) => panic!("fresh handle {ptr} unreadable: {e}"),
    }
    ptr
}

/// Whether the first `size` bytes behind `ptr` hold the pattern for `seed`.
pub fn check_pattern(allocator: &Allocator, ptr: MemPtr, size: u32, seed: u8) -> bool {
    allocator
        .bytes(ptr)
        .is_ok_and(|bytes| bytes.len() >= size as usize && has_pattern(&bytes[..size as usize], seed))
}

/// Serialize and deserialize `allocator`.
pub fn snapshot_roundtrip(allocator: &Allocator) -> Allocator {
    let bytes = match allocator.to_snapshot() {
        Ok(bytes) => bytes,
        Err(e) => panic!("serialize failed: {e}"),
    };
    match Allocator::from_snapshot(&bytes) {
        Ok(restored) => restored,
        Err(e) => panic!("deserialize failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_roundtrip() {
        let mut buf = [0u8; 300];
        fill_pattern(&mut buf, 7);
        assert!(has_pattern(&buf, 7));
        assert!(!has_pattern(&buf, 8));
    }

    #[test]
    fn builder_defaults_to_paranoid() {
        let a = TestAllocatorBuilder::new().build();
        assert_eq!(a.safety(), SafetyTier::Paranoid);
        assert_eq!(a.config().initial_size, 4096);
    }

    #[test]
    fn alloc_pattern_is_checkable() {
        let mut a = paranoid(4096);
        let p = alloc_pattern(&mut a, 100, 3);
        assert!(check_pattern(&a, p, 100, 3));
        assert!(!check_pattern(&a, p, 100, 4));
    }
}
