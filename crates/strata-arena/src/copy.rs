//! Bulk copy of one allocator's state into another.
//!
//! Used for rewind buffers: keep a second allocator and overwrite it with
//! the live one every frame. The copy reuses existing zone buffers when the
//! lengths already match, so the steady state allocates nothing.
//!
//! The two phases can be split. [`Allocator::copy_from_prepare`] fixes the
//! zone table shape; [`Allocator::zone_copy_pairs`] then yields independent
//! `(dst, src)` buffer pairs that callers may fill from several threads
//! before the allocator is used again.

use tracing::debug;

use crate::allocator::Allocator;
use crate::error::ArenaError;
use crate::zone::Zone;

impl Allocator {
    /// Make this allocator a byte-for-byte copy of `other`.
    ///
    /// Keeps this allocator's id and safety tier; takes `other`'s sizes,
    /// service table, and zones. Increments [`version`](Self::version).
    pub fn copy_from(&mut self, other: &Allocator) {
        self.copy_from_prepare(other);
        for (dst, src) in self.zone_copy_pairs(other) {
            dst.copy_from_slice(src);
        }
        debug!(
            allocator = %self.id,
            source = %other.id,
            version = self.version,
            "copied from source allocator"
        );
    }

    /// Shape the zone table like `other`'s without copying any bytes.
    ///
    /// Every zone ends up with the same length as its counterpart (or as a
    /// hole where `other` has one). Zone contents are unspecified until
    /// [`copy_from_complete`](Self::copy_from_complete) or all
    /// [`zone_copy_pairs`](Self::zone_copy_pairs) have been written; no
    /// other method may be called in between.
    pub fn copy_from_prepare(&mut self, other: &Allocator) {
        self.zones.truncate(other.zones.len());
        self.zones.resize_with(other.zones.len(), || None);
        for (dst, src) in self.zones.iter_mut().zip(&other.zones) {
            let Some(source) = src else {
                *dst = None;
                continue;
            };
            match dst.as_mut() {
                Some(zone) if zone.len() == source.len() => {}
                Some(zone) => zone.resize_raw(source.len()),
                None => *dst = Some(Zone::zeroed(source.len())),
            }
        }
        self.zone_capacity = self.zone_capacity.max(other.zone_capacity);
        self.zones
            .reserve_exact(self.zone_capacity.saturating_sub(self.zones.len()));
        self.total_size = other.total_size;
        self.config.initial_size = other.config.initial_size;
        self.config.max_size = other.config.max_size;
        self.service_table = other.service_table.with_allocator(self.id);
        self.service_epoch = self.service_epoch.wrapping_add(1);
        self.version = self.version.wrapping_add(1);
    }

    /// Copy every zone's bytes after [`copy_from_prepare`](Self::copy_from_prepare).
    pub fn copy_from_complete(&mut self, other: &Allocator) -> Result<(), ArenaError> {
        self.check_shape(other)?;
        for (dst, src) in self.zone_copy_pairs(other) {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Copy one zone's bytes after [`copy_from_prepare`](Self::copy_from_prepare).
    pub fn copy_zone_from(&mut self, index: usize, other: &Allocator) -> Result<(), ArenaError> {
        let shape_error = ArenaError::ShapeMismatch { zone: index as u32 };
        match (self.zones.get_mut(index), other.zones.get(index)) {
            (Some(Some(dst)), Some(Some(src))) if dst.len() == src.len() => {
                dst.bytes_mut().copy_from_slice(src.bytes());
                Ok(())
            }
            (Some(None), Some(None)) => Ok(()),
            _ => Err(shape_error),
        }
    }

    /// Destination and source buffers for every live zone pair.
    ///
    /// The pairs are disjoint, so they can be handed to separate threads.
    /// Only meaningful after [`copy_from_prepare`](Self::copy_from_prepare)
    /// with the same `other`; zones whose lengths differ are skipped.
    pub fn zone_copy_pairs<'a>(
        &'a mut self,
        other: &'a Allocator,
    ) -> impl Iterator<Item = (&'a mut [u8], &'a [u8])> + 'a {
        self.zones
            .iter_mut()
            .zip(&other.zones)
            .filter_map(|(dst, src)| match (dst, src) {
                (Some(dst), Some(src)) if dst.len() == src.len() => {
                    Some((dst.bytes_mut(), src.bytes()))
                }
                _ => None,
            })
    }

    fn check_shape(&self, other: &Allocator) -> Result<(), ArenaError> {
        let mine = self.zones.iter().map(|z| z.as_ref().map(Zone::len));
        let theirs = other.zones.iter().map(|z| z.as_ref().map(Zone::len));
        if let Some(index) = mine.zip(theirs).position(|(a, b)| a != b) {
            return Err(ArenaError::ShapeMismatch { zone: index as u32 });
        }
        if self.zones.len() != other.zones.len() {
            let index = self.zones.len().min(other.zones.len());
            return Err(ArenaError::ShapeMismatch { zone: index as u32 });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SafetyTier;
    use crate::zone::BLOCK_HEADER_SIZE;
    use crate::{Allocator, ArenaConfig, ArenaError};
    use strata_core::AllocatorId;

    fn allocator(id: u32, initial: u32) -> Allocator {
        Allocator::with_id(
            AllocatorId::new(id, id + 1),
            ArenaConfig::new(initial).with_safety(SafetyTier::Paranoid),
        )
        .unwrap()
    }

    #[test]
    fn copy_makes_identical_zones() {
        let mut src = allocator(0, 1024);
        let p = src.alloc_value(99u32).unwrap();
        let q = src.alloc(5000).unwrap();
        src.bytes_mut(q).unwrap()[4999] = 7;

        let mut dst = allocator(1, 1024);
        dst.alloc(300).unwrap();
        dst.copy_from(&src);

        assert_eq!(dst.content_hash(), src.content_hash());
        assert_eq!(dst.read(p).unwrap(), 99);
        assert_eq!(dst.bytes(q).unwrap()[4999], 7);
        assert_eq!(dst.total_size(), src.total_size());
        assert_eq!(dst.id(), AllocatorId::new(1, 2));
        assert_eq!(dst.version(), 1);
        dst.check_consistency().unwrap();
    }

    #[test]
    fn copy_shrinks_zone_table_and_preserves_holes() {
        let mut src = allocator(0, 256);
        let _fill = src.alloc(256 - BLOCK_HEADER_SIZE).unwrap();
        let hole = src.alloc(8).unwrap();
        let _keep = src.alloc(256 - BLOCK_HEADER_SIZE).unwrap();
        src.free(hole).unwrap();

        let mut dst = allocator(1, 256);
        for _ in 0..5 {
            dst.alloc(256 - BLOCK_HEADER_SIZE).unwrap();
        }
        dst.copy_from(&src);
        assert_eq!(dst.zone_count(), 3);
        assert!(dst.zone(1).is_none());
        assert_eq!(dst.content_hash(), src.content_hash());
    }

    #[test]
    fn repeated_copy_bumps_version() {
        let src = allocator(0, 1024);
        let mut dst = allocator(1, 1024);
        dst.copy_from(&src);
        dst.copy_from(&src);
        assert_eq!(dst.version(), 2);
    }

    #[test]
    fn split_copy_matches_full_copy() {
        let mut src = allocator(0, 512);
        for size in [100, 900, 40, 3000] {
            src.alloc(size).unwrap();
        }
        let mut full = allocator(1, 512);
        full.copy_from(&src);

        let mut split = allocator(2, 512);
        split.copy_from_prepare(&src);
        for index in 0..src.zone_count() {
            split.copy_zone_from(index, &src).unwrap();
        }
        assert_eq!(split.content_hash(), full.content_hash());
        split.check_consistency().unwrap();
    }

    #[test]
    fn pairs_can_be_filled_from_threads() {
        let mut src = allocator(0, 512);
        for _ in 0..4 {
            src.alloc(2000).unwrap();
        }
        let mut dst = allocator(1, 512);
        dst.copy_from_prepare(&src);
        std::thread::scope(|s| {
            for (d, from) in dst.zone_copy_pairs(&src) {
                s.spawn(move || d.copy_from_slice(from));
            }
        });
        assert_eq!(dst.content_hash(), src.content_hash());
        dst.check_consistency().unwrap();
    }

    #[test]
    fn complete_without_prepare_reports_shape() {
        let mut src = allocator(0, 512);
        src.alloc(4000).unwrap();
        let mut dst = allocator(1, 512);
        assert_eq!(
            dst.copy_from_complete(&src),
            Err(ArenaError::ShapeMismatch { zone: 1 })
        );
        assert_eq!(
            dst.copy_zone_from(1, &src),
            Err(ArenaError::ShapeMismatch { zone: 1 })
        );
    }
}
