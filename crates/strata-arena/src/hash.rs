//! Content hashing for determinism checks.
//!
//! FNV-1a over every zone buffer. Not cryptographic; two allocators with
//! the same hash almost certainly hold byte-identical zones, which is what
//! snapshot and replay comparisons need.

use crate::allocator::Allocator;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

#[inline]
fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
    }
    hash
}

#[inline]
fn fnv1a_u32(hash: u64, v: u32) -> u64 {
    fnv1a_bytes(hash, &v.to_le_bytes())
}

impl Allocator {
    /// Hash of the zone table and every zone's bytes.
    ///
    /// The zone index and length are folded in at each boundary, so holes
    /// and zone order both matter. The allocator id and version do not:
    /// a copy or a restored snapshot hashes equal to its source.
    pub fn content_hash(&self) -> u64 {
        let mut hash = fnv1a_u32(FNV_OFFSET, self.zones.len() as u32);
        for (index, slot) in self.zones.iter().enumerate() {
            hash = fnv1a_u32(hash, index as u32);
            match slot {
                Some(zone) => {
                    hash = fnv1a_u32(hash, zone.len());
                    hash = fnv1a_bytes(hash, zone.bytes());
                }
                None => hash = fnv1a_u32(hash, 0),
            }
        }
        hash
    }
}
