//! The zone table and the handle-level allocation API.
//!
//! An [`Allocator`] owns an ordered table of zones. Zone 0 is created with
//! the allocator and lives as long as it does; later zones are created on
//! demand and released as soon as they hold no used block, leaving a hole
//! that the next new zone reuses.

use std::ops::Range;

use bytemuck::Pod;
use strata_core::AllocatorId;
use tracing::{debug, error, trace, warn};

use crate::config::{ArenaConfig, SafetyTier};
use crate::error::ArenaError;
use crate::handle::{MemPtr, Ptr};
use crate::zone::{self, FreeMode, Zone, ZoneRoot, ZoneStats};

/// Zone-table capacity of a fresh allocator. Doubles when exhausted.
pub const INITIAL_ZONE_CAPACITY: usize = 20;

/// A relocatable zone/block allocator.
///
/// All memory is addressed through [`MemPtr`] handles. References handed
/// out by the accessors borrow the allocator, so no mutation (which may
/// move or grow a zone) can happen while one is alive.
pub struct Allocator {
    pub(crate) zones: Vec<Option<Zone>>,
    pub(crate) zone_capacity: usize,
    pub(crate) config: ArenaConfig,
    pub(crate) id: AllocatorId,
    pub(crate) version: u16,
    pub(crate) total_size: u64,
    pub(crate) service_table: MemPtr,
    pub(crate) service_epoch: u32,
}

impl Allocator {
    /// Create an allocator with an unmanaged (empty) id.
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        Self::with_id(AllocatorId::EMPTY, config)
    }

    /// Create an allocator that stamps `id` into every handle it issues.
    pub fn with_id(id: AllocatorId, config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let mut allocator = Self {
            zones: Vec::with_capacity(INITIAL_ZONE_CAPACITY),
            zone_capacity: INITIAL_ZONE_CAPACITY,
            config,
            id,
            version: 0,
            total_size: 0,
            service_table: MemPtr::INVALID,
            service_epoch: 0,
        };
        let first = Zone::new(allocator.config.initial_size)?;
        allocator.insert_zone(first);
        debug!(
            %id,
            initial_size = allocator.config.initial_size,
            max_size = allocator.config.max_size,
            "allocator created"
        );
        Ok(allocator)
    }

    /// The id stamped into issued handles.
    pub fn id(&self) -> AllocatorId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: AllocatorId) {
        self.id = id;
    }

    /// Incremented by every [`copy_from`](Self::copy_from).
    pub fn version(&self) -> u16 {
        self.version
    }

    /// The configuration this allocator was built with.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Current safety tier.
    pub fn safety(&self) -> SafetyTier {
        self.config.safety
    }

    /// Change the safety tier.
    pub fn set_safety(&mut self, safety: SafetyTier) {
        self.config.safety = safety;
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Allocate `size` zero-filled payload bytes.
    ///
    /// Zones are tried in index order; when none has room a new zone of
    /// `max(size + header, initial_size)` bytes is created in the lowest
    /// hole (or appended).
    pub fn alloc(&mut self, size: u32) -> Result<MemPtr, ArenaError> {
        let found = self
            .zones
            .iter_mut()
            .enumerate()
            .find_map(|(index, slot)| slot.as_mut()?.malloc(size).map(|offset| (index, offset)));
        let (index, offset) = match found {
            Some(hit) => hit,
            None => self.alloc_in_new_zone(size)?,
        };
        self.verify_zone(index);
        trace!(zone = index, offset, size, "alloc");
        Ok(MemPtr::new(index as u32, offset, self.id))
    }

    /// Allocate a block holding `value`.
    pub fn alloc_value<T: Pod>(&mut self, value: T) -> Result<Ptr<T>, ArenaError> {
        let ptr = self.alloc(std::mem::size_of::<T>() as u32)?.typed::<T>();
        self.write(ptr, value)?;
        Ok(ptr)
    }

    fn alloc_in_new_zone(&mut self, size: u32) -> Result<(usize, u32), ArenaError> {
        let exceeded = || ArenaError::CapacityExceeded {
            requested: u64::from(size),
            capacity: u64::from(self.config.max_size),
        };
        let needed = zone::block_size_for(size).ok_or_else(exceeded)?;
        let area = zone::align_up(needed.max(self.config.initial_size)).ok_or_else(exceeded)?;
        let zone_len = u64::from(zone::FIRST_BLOCK) + u64::from(area);
        if self.total_size + zone_len > u64::from(self.config.max_size) {
            warn!(
                size,
                total = self.total_size,
                max_size = self.config.max_size,
                "allocation would exceed max_size"
            );
            return Err(exceeded());
        }

        let mut zone = Zone::new(area)?;
        let offset = zone.malloc(size).ok_or_else(exceeded)?;
        let index = self.insert_zone(zone);
        debug!(zone = index, len = zone_len, "zone created");
        Ok((index, offset))
    }

    /// Place `zone` in the lowest hole, or append it.
    pub(crate) fn insert_zone(&mut self, zone: Zone) -> usize {
        self.total_size += u64::from(zone.len());
        let index = match self.zones.iter().position(Option::is_none) {
            Some(index) => {
                self.zones[index] = Some(zone);
                index
            }
            None => {
                if self.zones.len() == self.zone_capacity {
                    self.zone_capacity *= 2;
                    self.zones.reserve_exact(self.zone_capacity - self.zones.len());
                    debug!(capacity = self.zone_capacity, "zone table grown");
                }
                self.zones.push(Some(zone));
                self.zones.len() - 1
            }
        };
        if index == 0 {
            self.store_root();
        }
        index
    }

    /// Write the initial size and service table handle into zone 0's
    /// header, where snapshots and copies pick them up with the bytes.
    pub(crate) fn store_root(&mut self) {
        let root = ZoneRoot {
            initial_size: self.config.initial_size,
            table_zone: self.service_table.zone_index(),
            table_offset: self.service_table.offset(),
        };
        if let Some(Some(zone)) = self.zones.first_mut() {
            zone.set_root(root);
        }
    }

    /// Release the block behind `ptr`.
    ///
    /// Freeing the null handle is a no-op. A zone other than zone 0 that
    /// ends up with no used block is released.
    pub fn free(&mut self, ptr: MemPtr) -> Result<(), ArenaError> {
        if !ptr.is_valid() {
            return Ok(());
        }
        let (index, zone) = self.zone_of_mut(ptr)?;
        zone.free(ptr.offset, FreeMode::Coalesce)
            .map_err(|reason| reject(ptr, reason))?;
        trace!(zone = index, offset = ptr.offset, "free");
        if index != 0 && zone.is_empty_zone() {
            self.release_zone(index);
        } else {
            self.verify_zone(index);
        }
        Ok(())
    }

    fn release_zone(&mut self, index: usize) {
        if let Some(zone) = self.zones.get_mut(index).and_then(Option::take) {
            self.total_size -= u64::from(zone.len());
            debug!(zone = index, len = zone.len(), "zone released");
        }
    }

    /// Resize the block behind `ptr` to hold at least `size` bytes.
    ///
    /// Returns `ptr` itself when the block is already large enough or can
    /// absorb its free successor; otherwise the payload moves to a new
    /// block and the old one is freed. Bytes past the old payload are
    /// zero. A null `ptr` behaves like [`alloc`](Self::alloc).
    pub fn realloc(&mut self, ptr: MemPtr, size: u32) -> Result<MemPtr, ArenaError> {
        if !ptr.is_valid() {
            return self.alloc(size);
        }
        let (index, zone) = self.zone_of_mut(ptr)?;
        let invalid = |reason| reject(ptr, reason);
        let old_len = zone.payload_len(ptr.offset).map_err(invalid)?;
        if size <= old_len {
            return Ok(ptr);
        }

        if zone.can_grow_in_place(ptr.offset, size) {
            zone.free(ptr.offset, FreeMode::KeepPrev).map_err(invalid)?;
            if !zone.claim(ptr.offset, size, old_len) {
                return Err(ArenaError::Corrupted {
                    zone: index as u32,
                    block: ptr.offset - zone::BLOCK_HEADER_SIZE,
                    detail: "grown block could not be reclaimed".into(),
                });
            }
            self.verify_zone(index);
            trace!(zone = index, offset = ptr.offset, size, "realloc in place");
            return Ok(ptr);
        }

        let moved = self.alloc(size)?;
        self.copy_bytes(ptr, moved, old_len)?;
        self.free(ptr)?;
        trace!(from = %ptr, to = %moved, size, "realloc moved");
        Ok(moved)
    }

    /// Copy `len` bytes from the payload of `src` to the payload of `dst`.
    ///
    /// Both blocks may live in the same zone. Overlap is impossible since
    /// distinct live blocks never overlap.
    pub fn copy_bytes(&mut self, src: MemPtr, dst: MemPtr, len: u32) -> Result<(), ArenaError> {
        let safety = self.config.safety;
        let len = len as usize;
        let (si, zone) = self.zone_of(src)?;
        let src_range = payload_range(zone, safety, src, Some(len))?;
        let (di, zone) = self.zone_of(dst)?;
        let dst_range = payload_range(zone, safety, dst, Some(len))?;

        if si == di {
            if let Some(Some(zone)) = self.zones.get_mut(si) {
                zone.bytes_mut().copy_within(src_range, dst_range.start);
            }
            return Ok(());
        }
        let (lo, hi) = if si < di { (si, di) } else { (di, si) };
        let (head, tail) = self.zones.split_at_mut(hi);
        if let (Some(Some(low)), Some(Some(high))) = (head.get_mut(lo), tail.first_mut()) {
            let (from, to) = if si < di { (low, high) } else { (high, low) };
            to.bytes_mut()[dst_range].copy_from_slice(&from.bytes()[src_range]);
        }
        Ok(())
    }

    // ── Access ──────────────────────────────────────────────────

    /// Payload bytes of the block behind `ptr`.
    pub fn bytes(&self, ptr: MemPtr) -> Result<&[u8], ArenaError> {
        let (_, zone) = self.zone_of(ptr)?;
        let range = payload_range(zone, self.config.safety, ptr, None)?;
        Ok(&zone.bytes()[range])
    }

    /// Payload bytes of the block behind `ptr`, mutably.
    pub fn bytes_mut(&mut self, ptr: MemPtr) -> Result<&mut [u8], ArenaError> {
        let safety = self.config.safety;
        let (_, zone) = self.zone_of_mut(ptr)?;
        let range = payload_range(zone, safety, ptr, None)?;
        Ok(&mut zone.bytes_mut()[range])
    }

    /// Payload capacity of the block behind `ptr`.
    pub fn payload_len(&self, ptr: MemPtr) -> Result<u32, ArenaError> {
        let (_, zone) = self.zone_of(ptr)?;
        zone.payload_len(ptr.offset)
            .map_err(|reason| reject(ptr, reason))
    }

    /// Borrow the `T` behind `ptr`.
    pub fn get<T: Pod>(&self, ptr: Ptr<T>) -> Result<&T, ArenaError> {
        let raw = ptr.raw();
        let (_, zone) = self.zone_of(raw)?;
        let range = payload_range(zone, self.config.safety, raw, Some(std::mem::size_of::<T>()))?;
        bytemuck::try_from_bytes(&zone.bytes()[range]).map_err(|_| ArenaError::Misaligned {
            offset: raw.offset,
            align: std::mem::align_of::<T>(),
        })
    }

    /// Mutably borrow the `T` behind `ptr`.
    pub fn get_mut<T: Pod>(&mut self, ptr: Ptr<T>) -> Result<&mut T, ArenaError> {
        let raw = ptr.raw();
        let safety = self.config.safety;
        let (_, zone) = self.zone_of_mut(raw)?;
        let range = payload_range(zone, safety, raw, Some(std::mem::size_of::<T>()))?;
        bytemuck::try_from_bytes_mut(&mut zone.bytes_mut()[range]).map_err(|_| {
            ArenaError::Misaligned {
                offset: raw.offset,
                align: std::mem::align_of::<T>(),
            }
        })
    }

    /// Copy the `T` out from behind `ptr`. Works at any alignment.
    pub fn read<T: Pod>(&self, ptr: Ptr<T>) -> Result<T, ArenaError> {
        let raw = ptr.raw();
        let (_, zone) = self.zone_of(raw)?;
        let range = payload_range(zone, self.config.safety, raw, Some(std::mem::size_of::<T>()))?;
        Ok(bytemuck::pod_read_unaligned(&zone.bytes()[range]))
    }

    /// Store `value` behind `ptr`. Works at any alignment.
    pub fn write<T: Pod>(&mut self, ptr: Ptr<T>, value: T) -> Result<(), ArenaError> {
        let raw = ptr.raw();
        let safety = self.config.safety;
        let (_, zone) = self.zone_of_mut(raw)?;
        let range = payload_range(zone, safety, raw, Some(std::mem::size_of::<T>()))?;
        zone.bytes_mut()[range].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Raw address of the payload behind `ptr`.
    ///
    /// Valid only until the next call that takes `&mut self`; growing,
    /// copying, or reallocating may move the zone.
    pub fn raw_ptr(&self, ptr: MemPtr) -> Result<*const u8, ArenaError> {
        Ok(self.bytes(ptr)?.as_ptr())
    }

    /// Raw mutable address of the payload behind `ptr`. Same validity
    /// window as [`raw_ptr`](Self::raw_ptr).
    pub fn raw_mut_ptr(&mut self, ptr: MemPtr) -> Result<*mut u8, ArenaError> {
        Ok(self.bytes_mut(ptr)?.as_mut_ptr())
    }

    fn zone_of(&self, ptr: MemPtr) -> Result<(usize, &Zone), ArenaError> {
        if !ptr.is_valid() {
            return Err(reject(ptr, "null handle"));
        }
        let index = ptr.zone_index as usize;
        match self.zones.get(index) {
            Some(Some(zone)) => Ok((index, zone)),
            _ => Err(reject(ptr, "zone is not live")),
        }
    }

    fn zone_of_mut(&mut self, ptr: MemPtr) -> Result<(usize, &mut Zone), ArenaError> {
        if !ptr.is_valid() {
            return Err(reject(ptr, "null handle"));
        }
        let index = ptr.zone_index as usize;
        match self.zones.get_mut(index) {
            Some(Some(zone)) => Ok((index, zone)),
            _ => Err(reject(ptr, "zone is not live")),
        }
    }

    // ── Zones ───────────────────────────────────────────────────

    /// Zone at `index`, or `None` for a hole or an index past the end.
    pub fn zone(&self, index: usize) -> Option<&Zone> {
        self.zones.get(index).and_then(Option::as_ref)
    }

    /// Live zones with their indices.
    pub fn zones(&self) -> impl Iterator<Item = (usize, &Zone)> {
        self.zones
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|zone| (index, zone)))
    }

    /// Length of the zone table, holes included.
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Number of live zones.
    pub fn live_zone_count(&self) -> usize {
        self.zones.iter().filter(|slot| slot.is_some()).count()
    }

    /// Current zone-table capacity.
    pub fn zone_capacity(&self) -> usize {
        self.zone_capacity
    }

    /// Whether zone `index` has no used block. `None` for a hole.
    pub fn is_empty_zone(&self, index: usize) -> Option<bool> {
        self.zone(index).map(Zone::is_empty_zone)
    }

    /// Occupancy of zone `index`. `None` for a hole.
    pub fn zone_stats(&self, index: usize) -> Option<ZoneStats> {
        self.zone(index).map(Zone::stats)
    }

    /// Grow zone `index` to at least `new_len` bytes in place.
    ///
    /// Every handle into the zone stays valid; only raw addresses change.
    pub fn grow_zone(&mut self, index: usize, new_len: u32) -> Result<(), ArenaError> {
        let max_size = u64::from(self.config.max_size);
        let total = self.total_size;
        let Some(Some(zone)) = self.zones.get_mut(index) else {
            return Err(ArenaError::ZoneNotLive {
                zone: u32::try_from(index).unwrap_or(u32::MAX),
            });
        };
        let old_len = zone.len();
        let grown_len = zone.grown_len(new_len)?;
        if total - u64::from(old_len) + u64::from(grown_len) > max_size {
            return Err(ArenaError::CapacityExceeded {
                requested: u64::from(grown_len),
                capacity: max_size,
            });
        }
        if zone.grow(new_len)? {
            let grown = zone.len();
            self.total_size += u64::from(grown - old_len);
            debug!(zone = index, from = old_len, to = grown, "zone grown");
            self.verify_zone(index);
        }
        Ok(())
    }

    /// Summed length of all live zones.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes held by used blocks, headers included.
    pub fn used_size(&self) -> u64 {
        self.zones().map(|(_, zone)| u64::from(zone.used())).sum()
    }

    /// Bytes held by free blocks, headers included.
    pub fn free_size(&self) -> u64 {
        self.zones().map(|(_, zone)| u64::from(zone.stats().free)).sum()
    }

    /// Walk every zone and verify its structure.
    pub fn check_consistency(&self) -> Result<(), ArenaError> {
        for (index, zone) in self.zones() {
            zone.check(index as u32)?;
        }
        Ok(())
    }

    fn verify_zone(&self, index: usize) {
        if !self.config.safety.walks_after_mutation() {
            return;
        }
        if let Some(zone) = self.zone(index) {
            if let Err(err) = zone.check(index as u32) {
                error!(%err, allocator = %self.id, "consistency walk failed");
                panic!("{err}");
            }
        }
    }

    /// Human-readable map of every zone and block.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "allocator {} v{}: zones={}/{} total={} used={}\n",
            self.id,
            self.version,
            self.live_zone_count(),
            self.zone_count(),
            self.total_size,
            self.used_size()
        );
        for (index, slot) in self.zones.iter().enumerate() {
            match slot {
                Some(zone) => out.push_str(&zone.dump(index as u32)),
                None => out.push_str(&format!("zone {index}: hole\n")),
            }
        }
        out
    }

    /// Release every zone. Outstanding handles become invalid.
    ///
    /// The allocator stays usable; the next allocation starts a new
    /// zone 0.
    pub fn dispose(&mut self) {
        debug!(
            allocator = %self.id,
            zones = self.live_zone_count(),
            total = self.total_size,
            "allocator disposed"
        );
        self.zones = Vec::with_capacity(INITIAL_ZONE_CAPACITY);
        self.zone_capacity = INITIAL_ZONE_CAPACITY;
        self.total_size = 0;
        self.service_table = MemPtr::INVALID;
        self.service_epoch = self.service_epoch.wrapping_add(1);
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("zones", &self.live_zone_count())
            .field("total_size", &self.total_size)
            .field("safety", &self.config.safety)
            .finish()
    }
}

fn reject(ptr: MemPtr, reason: &'static str) -> ArenaError {
    warn!(%ptr, reason, "handle rejected");
    ArenaError::InvalidHandle { ptr, reason }
}

/// Byte range of the payload behind `ptr`, `len` bytes long (or the full
/// payload when `None`).
fn payload_range(
    zone: &Zone,
    safety: SafetyTier,
    ptr: MemPtr,
    len: Option<usize>,
) -> Result<Range<usize>, ArenaError> {
    let invalid = |reason| reject(ptr, reason);
    let len = if safety.validates_handles() {
        let available = zone.payload_len(ptr.offset).map_err(invalid)? as usize;
        match len {
            Some(requested) if requested > available => {
                return Err(ArenaError::SizeMismatch {
                    requested,
                    available,
                })
            }
            Some(requested) => requested,
            None => available,
        }
    } else {
        match len {
            Some(requested) => requested,
            None => zone
                .declared_payload_len(ptr.offset)
                .ok_or_else(|| invalid("offset is outside the zone"))? as usize,
        }
    };
    let start = ptr.offset as usize;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= zone.len() as usize)
        .ok_or_else(|| invalid("payload extends past the zone"))?;
    Ok(start..end)
}
