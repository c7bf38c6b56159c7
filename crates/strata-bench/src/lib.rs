//! Benchmark workloads for the Strata allocator.
//!
//! Provides deterministic allocation workloads shared by the benches:
//!
//! - [`churn_sizes`]: a seeded stream of payload sizes
//! - [`populated`]: an allocator pre-filled with a churned live set

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use strata_arena::{Allocator, ArenaConfig, ArenaError, MemPtr, SafetyTier};

/// Largest payload produced by [`churn_sizes`].
pub const MAX_CHURN_SIZE: u32 = 1024;

/// `n` payload sizes in `8..=MAX_CHURN_SIZE`, skewed toward small blocks.
///
/// Uses a 64-bit LCG so the stream is identical on every run.
pub fn churn_sizes(n: usize, seed: u64) -> Vec<u32> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let r = (state >> 33) as u32;
            // Square the unit draw to favour small sizes.
            let unit = (r % 1024) as u64;
            8 + ((unit * unit * u64::from(MAX_CHURN_SIZE - 8)) / (1023 * 1023)) as u32
        })
        .collect()
}

/// Allocator config used by the benches: 512 KiB zones, no checking.
pub fn bench_config() -> ArenaConfig {
    ArenaConfig::new(ArenaConfig::DEFAULT_INITIAL_SIZE).with_safety(SafetyTier::Unchecked)
}

/// An allocator holding `n` live blocks, with every third allocation freed
/// again so the free list is fragmented.
pub fn populated(n: usize, seed: u64) -> Result<(Allocator, Vec<MemPtr>), ArenaError> {
    let mut allocator = Allocator::new(bench_config())?;
    let mut live = Vec::with_capacity(n);
    for (i, size) in churn_sizes(n + n / 2, seed).into_iter().enumerate() {
        let ptr = allocator.alloc(size)?;
        if i % 3 == 2 {
            allocator.free(ptr)?;
        } else {
            live.push(ptr);
        }
    }
    Ok((allocator, live))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn churn_sizes_deterministic_and_bounded() {
        let a = churn_sizes(500, 42);
        assert_eq!(a, churn_sizes(500, 42));
        assert_ne!(a, churn_sizes(500, 43));
        assert!(a.iter().all(|&s| (8..=MAX_CHURN_SIZE).contains(&s)));
    }

    #[test]
    fn populated_has_requested_live_set() {
        let (allocator, live) = populated(300, 7).unwrap();
        assert_eq!(live.len(), 300);
        allocator.check_consistency().unwrap();
    }
}
