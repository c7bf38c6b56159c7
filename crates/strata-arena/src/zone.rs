//! Zones and the block free-list engine.
//!
//! A [`Zone`] is one contiguous byte buffer holding a zone header, a
//! sentinel block, and a circular doubly linked list of blocks that tile
//! the rest of the buffer. Every link is an offset from the start of the
//! zone, never an address, so a zone can be moved, grown, copied, or read
//! back from a snapshot and every link stays valid.
//!
//! ```text
//! 0        32               56
//! ┌────────┬────────────────┬──────────────┬──────────────┬─────┐
//! │ header │ sentinel block │ block        │ block        │ ... │
//! └────────┴────────────────┴──────────────┴──────────────┴─────┘
//!               ▲  next ──────────►  next ──────────► ... ─┐
//!               └──────────────────────────────────────────┘
//! ```
//!
//! Allocation is next-fit from the rover with splitting; freeing always
//! coalesces forward and optionally backward (see [`FreeMode`]).

use bytemuck::{Pod, Zeroable};

use crate::error::ArenaError;

/// Alignment of every block and therefore of every payload.
pub const ALIGN: u32 = 8;

/// Leftovers of this many bytes or fewer are never split into their own
/// free block; the allocation keeps them as slack instead.
pub const MIN_FRAGMENT: u32 = 64;

/// Validation tag stamped into the header of every used block.
pub const BLOCK_TAG: u32 = 0x5EB1_0C4D;

/// Size of the zone header at offset 0.
pub const ZONE_HEADER_SIZE: u32 = 32;

/// Size of a block header. Payloads start right after it.
pub const BLOCK_HEADER_SIZE: u32 = 24;

/// Offset of the sentinel block.
pub const SENTINEL: u32 = ZONE_HEADER_SIZE;

/// Offset of the first real block.
pub const FIRST_BLOCK: u32 = ZONE_HEADER_SIZE + BLOCK_HEADER_SIZE;

/// Smallest block area a zone may be created with.
pub const MIN_ZONE_AREA: u32 = BLOCK_HEADER_SIZE + ALIGN;

const STATE_FREE: u32 = 0;
const STATE_USED: u32 = 1;

/// Header at the start of every zone buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct ZoneHeader {
    /// Length of the whole buffer in bytes, header included.
    pub(crate) total_size: u32,
    /// Offset of the block where the next search starts.
    pub(crate) rover: u32,
    /// Sum of the sizes (headers included) of all used blocks.
    pub(crate) used: u32,
    /// Allocator root record. Meaningful in zone 0 only, zero elsewhere.
    pub(crate) initial_size: u32,
    pub(crate) table_zone: u32,
    pub(crate) table_offset: u32,
    pub(crate) reserved: [u32; 2],
}

/// Allocator-wide state kept in the header of zone 0, so that the zone
/// bytes alone are enough to restore an allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ZoneRoot {
    pub(crate) initial_size: u32,
    /// Zone index of the service table block.
    pub(crate) table_zone: u32,
    /// Payload offset of the service table block; `0` when there is none.
    pub(crate) table_offset: u32,
}

/// Header preceding every block payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct BlockHeader {
    /// Block size in bytes, header included.
    pub(crate) size: u32,
    pub(crate) state: u32,
    /// [`BLOCK_TAG`] when used, `0` when free.
    pub(crate) tag: u32,
    pub(crate) next: u32,
    pub(crate) prev: u32,
    pub(crate) reserved: u32,
}

const _: () = assert!(std::mem::size_of::<ZoneHeader>() == ZONE_HEADER_SIZE as usize);
const _: () = assert!(std::mem::size_of::<BlockHeader>() == BLOCK_HEADER_SIZE as usize);
const _: () = assert!(FIRST_BLOCK % ALIGN == 0);

impl BlockHeader {
    fn is_free(&self) -> bool {
        self.state == STATE_FREE
    }

    fn is_used(&self) -> bool {
        self.state == STATE_USED && self.tag == BLOCK_TAG
    }
}

/// Round `n` up to [`ALIGN`]. `None` on overflow.
pub fn align_up(n: u32) -> Option<u32> {
    n.checked_add(ALIGN - 1).map(|v| v & !(ALIGN - 1))
}

/// Full block size (header included) needed to serve a `payload`-byte
/// request. Zero-byte requests get the minimum payload of [`ALIGN`].
pub fn block_size_for(payload: u32) -> Option<u32> {
    align_up(payload.max(ALIGN))?.checked_add(BLOCK_HEADER_SIZE)
}

/// How [`Zone::free`] coalesces the released block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeMode {
    /// Merge with both neighbours when they are free.
    Coalesce,
    /// Merge forward only. The freed block keeps its start offset, which
    /// lets a grow-in-place reallocation reclaim it at the same handle.
    KeepPrev,
}

/// Summary of one block, as yielded by [`Zone::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header within the zone.
    pub offset: u32,
    /// Block size in bytes, header included.
    pub size: u32,
    /// Whether the block is in use.
    pub used: bool,
}

impl BlockInfo {
    /// Offset of the block payload.
    pub fn payload_offset(&self) -> u32 {
        self.offset + BLOCK_HEADER_SIZE
    }

    /// Payload capacity in bytes.
    pub fn payload_len(&self) -> u32 {
        self.size - BLOCK_HEADER_SIZE
    }
}

/// Occupancy summary of a zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZoneStats {
    /// Buffer length in bytes.
    pub total: u32,
    /// Bytes in used blocks, headers included.
    pub used: u32,
    /// Bytes in free blocks, headers included.
    pub free: u32,
    /// Number of blocks, sentinel excluded.
    pub blocks: u32,
    /// Number of free blocks.
    pub free_blocks: u32,
    /// Largest payload a single allocation could currently get.
    pub largest_free_payload: u32,
}

/// A relocatable memory zone.
///
/// Backed by `Vec<u64>` so the base (and every payload, since blocks are
/// [`ALIGN`]-aligned) is 8-byte aligned. The buffer may reallocate when the
/// zone grows; nothing inside it refers to its own address.
#[derive(Clone, PartialEq, Eq)]
pub struct Zone {
    words: Vec<u64>,
}

impl Zone {
    /// Create a zone whose block area holds at least `area` bytes.
    ///
    /// The whole area starts as a single free block.
    pub fn new(area: u32) -> Result<Self, ArenaError> {
        let area = align_up(area.max(MIN_ZONE_AREA)).ok_or(ArenaError::CapacityExceeded {
            requested: u64::from(area),
            capacity: u64::from(u32::MAX),
        })?;
        let total = FIRST_BLOCK
            .checked_add(area)
            .ok_or(ArenaError::CapacityExceeded {
                requested: u64::from(area),
                capacity: u64::from(u32::MAX - FIRST_BLOCK),
            })?;

        let mut zone = Self::zeroed(total);
        zone.set_header(ZoneHeader {
            total_size: total,
            rover: FIRST_BLOCK,
            used: 0,
            ..ZoneHeader::zeroed()
        });
        zone.set_block(
            SENTINEL,
            BlockHeader {
                size: BLOCK_HEADER_SIZE,
                state: STATE_USED,
                tag: BLOCK_TAG,
                next: FIRST_BLOCK,
                prev: FIRST_BLOCK,
                reserved: 0,
            },
        );
        zone.set_block(
            FIRST_BLOCK,
            BlockHeader {
                size: area,
                state: STATE_FREE,
                tag: 0,
                next: SENTINEL,
                prev: SENTINEL,
                reserved: 0,
            },
        );
        Ok(zone)
    }

    /// A zero-filled buffer of `len` bytes with no valid structure.
    ///
    /// Only for callers that overwrite the whole buffer right away.
    pub(crate) fn zeroed(len: u32) -> Self {
        Self {
            words: vec![0; len as usize / ALIGN as usize],
        }
    }

    /// Rebuild a zone from raw bytes and verify its structure.
    ///
    /// `index` is only used to label a [`ArenaError::Corrupted`] report.
    pub fn from_bytes(bytes: &[u8], index: u32) -> Result<Self, ArenaError> {
        let corrupted = |detail: String| ArenaError::Corrupted {
            zone: index,
            block: 0,
            detail,
        };
        if bytes.len() % ALIGN as usize != 0 {
            return Err(corrupted(format!(
                "zone length {} is not a multiple of {ALIGN}",
                bytes.len()
            )));
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| corrupted(format!("zone length {} exceeds u32", bytes.len())))?;
        if len < FIRST_BLOCK + MIN_ZONE_AREA {
            return Err(corrupted(format!("zone length {len} is below the minimum")));
        }
        let mut zone = Self::zeroed(len);
        zone.bytes_mut().copy_from_slice(bytes);
        zone.check(index)?;
        Ok(zone)
    }

    /// The zone buffer.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// The zone buffer, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> u32 {
        (self.words.len() * ALIGN as usize) as u32
    }

    /// Whether the buffer has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Bytes held by used blocks, headers included.
    pub fn used(&self) -> u32 {
        self.header().used
    }

    /// Offset of the block the next search starts from.
    pub fn rover(&self) -> u32 {
        self.header().rover
    }

    // ── Raw header access ───────────────────────────────────────

    pub(crate) fn header(&self) -> ZoneHeader {
        bytemuck::pod_read_unaligned(&self.bytes()[..ZONE_HEADER_SIZE as usize])
    }

    fn set_header(&mut self, header: ZoneHeader) {
        self.bytes_mut()[..ZONE_HEADER_SIZE as usize].copy_from_slice(bytemuck::bytes_of(&header));
    }

    pub(crate) fn block(&self, offset: u32) -> BlockHeader {
        let start = offset as usize;
        bytemuck::pod_read_unaligned(&self.bytes()[start..start + BLOCK_HEADER_SIZE as usize])
    }

    fn try_block(&self, offset: u32) -> Option<BlockHeader> {
        let start = offset as usize;
        let bytes = self.bytes().get(start..start.checked_add(BLOCK_HEADER_SIZE as usize)?)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    pub(crate) fn root(&self) -> ZoneRoot {
        let header = self.header();
        ZoneRoot {
            initial_size: header.initial_size,
            table_zone: header.table_zone,
            table_offset: header.table_offset,
        }
    }

    pub(crate) fn set_root(&mut self, root: ZoneRoot) {
        let mut header = self.header();
        header.initial_size = root.initial_size;
        header.table_zone = root.table_zone;
        header.table_offset = root.table_offset;
        self.set_header(header);
    }

    fn set_block(&mut self, offset: u32, block: BlockHeader) {
        let start = offset as usize;
        self.bytes_mut()[start..start + BLOCK_HEADER_SIZE as usize]
            .copy_from_slice(bytemuck::bytes_of(&block));
    }

    fn set_prev(&mut self, offset: u32, prev: u32) {
        let mut block = self.block(offset);
        block.prev = prev;
        self.set_block(offset, block);
    }

    fn set_rover(&mut self, rover: u32) {
        let mut header = self.header();
        header.rover = rover;
        self.set_header(header);
    }

    fn add_used(&mut self, delta: u32) {
        let mut header = self.header();
        header.used += delta;
        self.set_header(header);
    }

    fn sub_used(&mut self, delta: u32) {
        let mut header = self.header();
        header.used -= delta;
        self.set_header(header);
    }

    // ── Block engine ────────────────────────────────────────────

    /// Allocate `size` payload bytes. Returns the payload offset, or `None`
    /// when the search wraps around without finding room.
    ///
    /// The zone never grows itself; the caller decides whether to grow it
    /// or to try another zone. The payload is zero-filled.
    pub fn malloc(&mut self, size: u32) -> Option<u32> {
        let needed = block_size_for(size)?;
        let start = self.header().rover;
        let mut cursor = start;
        loop {
            let block = self.block(cursor);
            if block.is_free() && block.size >= needed {
                break;
            }
            cursor = block.next;
            if cursor == start {
                return None;
            }
        }
        let after = self.take(cursor, needed, 0);
        self.set_rover(after);
        Some(cursor + BLOCK_HEADER_SIZE)
    }

    /// Claim the free block at `payload - header` for `size` bytes,
    /// keeping the first `preserve` payload bytes intact.
    ///
    /// Used by grow-in-place reallocation after a [`FreeMode::KeepPrev`]
    /// free. Returns `false` when the block is not free or too small.
    pub fn claim(&mut self, payload: u32, size: u32, preserve: u32) -> bool {
        let Some(offset) = payload.checked_sub(BLOCK_HEADER_SIZE) else {
            return false;
        };
        let Some(needed) = block_size_for(size) else {
            return false;
        };
        match self.try_block(offset) {
            Some(block) if block.is_free() && block.size >= needed => {
                let after = self.take(offset, needed, preserve);
                self.set_rover(after);
                true
            }
            _ => false,
        }
    }

    /// Mark the free block at `offset` used, splitting off the tail when
    /// the leftover exceeds [`MIN_FRAGMENT`]. Returns the following block.
    fn take(&mut self, offset: u32, needed: u32, preserve: u32) -> u32 {
        let mut block = self.block(offset);
        let leftover = block.size - needed;
        if leftover > MIN_FRAGMENT {
            let tail = offset + needed;
            self.set_block(
                tail,
                BlockHeader {
                    size: leftover,
                    state: STATE_FREE,
                    tag: 0,
                    next: block.next,
                    prev: offset,
                    reserved: 0,
                },
            );
            self.set_prev(block.next, tail);
            block.next = tail;
            block.size = needed;
        }
        block.state = STATE_USED;
        block.tag = BLOCK_TAG;
        self.set_block(offset, block);
        self.add_used(block.size);

        let zero_from = (offset + BLOCK_HEADER_SIZE + preserve) as usize;
        let zero_to = (offset + block.size) as usize;
        if zero_from < zero_to {
            self.bytes_mut()[zero_from..zero_to].fill(0);
        }
        block.next
    }

    /// Validate that `payload` is the payload offset of a used block and
    /// return the block's header offset.
    pub fn locate(&self, payload: u32) -> Result<u32, &'static str> {
        if payload % ALIGN != 0 {
            return Err("offset is not block aligned");
        }
        let offset = payload
            .checked_sub(BLOCK_HEADER_SIZE)
            .filter(|&o| o >= FIRST_BLOCK)
            .ok_or("offset precedes the first block")?;
        let block = self.try_block(offset).ok_or("offset is outside the zone")?;
        if block.state != STATE_USED {
            return Err("block is not in use");
        }
        if block.tag != BLOCK_TAG {
            return Err("block tag mismatch");
        }
        if block.size < BLOCK_HEADER_SIZE || offset as u64 + block.size as u64 > self.len() as u64 {
            return Err("block size is out of range");
        }
        Ok(offset)
    }

    /// Payload capacity of the used block at `payload`.
    pub fn payload_len(&self, payload: u32) -> Result<u32, &'static str> {
        let offset = self.locate(payload)?;
        Ok(self.block(offset).size - BLOCK_HEADER_SIZE)
    }

    /// Payload capacity as declared by whatever header precedes `payload`,
    /// without validating it. `None` when the header is out of bounds.
    pub(crate) fn declared_payload_len(&self, payload: u32) -> Option<u32> {
        let block = self.try_block(payload.checked_sub(BLOCK_HEADER_SIZE)?)?;
        Some(block.size.saturating_sub(BLOCK_HEADER_SIZE))
    }

    /// Release the used block at `payload`.
    ///
    /// Always merges with a free successor. Merges with a free predecessor
    /// only under [`FreeMode::Coalesce`]. The rover is left on the
    /// resulting free block so the next search tries it first.
    pub fn free(&mut self, payload: u32, mode: FreeMode) -> Result<(), &'static str> {
        let offset = self.locate(payload)?;
        let mut block = self.block(offset);
        self.sub_used(block.size);
        block.state = STATE_FREE;
        block.tag = 0;

        let mut current = offset;
        if mode == FreeMode::Coalesce {
            let mut prev = self.block(block.prev);
            if prev.is_free() {
                prev.size += block.size;
                prev.next = block.next;
                self.set_prev(block.next, block.prev);
                // The absorbed header must not pass `locate` again.
                self.set_block(offset, BlockHeader::zeroed());
                current = block.prev;
                block = prev;
            }
        }

        let next_offset = block.next;
        let next = self.block(next_offset);
        if next.is_free() {
            block.size += next.size;
            self.set_prev(next.next, current);
            block.next = next.next;
            self.set_block(next_offset, BlockHeader::zeroed());
        }
        self.set_block(current, block);
        self.set_rover(current);
        Ok(())
    }

    /// Whether the used block at `payload` could grow to `size` bytes by
    /// absorbing its free successor.
    pub fn can_grow_in_place(&self, payload: u32, size: u32) -> bool {
        let (Ok(offset), Some(needed)) = (self.locate(payload), block_size_for(size)) else {
            return false;
        };
        let block = self.block(offset);
        let next = self.block(block.next);
        next.is_free() && u64::from(block.size) + u64::from(next.size) >= u64::from(needed)
    }

    /// Grow the buffer to at least `new_total` bytes.
    ///
    /// Existing bytes are kept verbatim. The extra space extends the last
    /// block when it is free, otherwise it becomes a new trailing free
    /// block. Returns `false` (and does nothing) when `new_total` does not
    /// exceed the current length.
    pub fn grow(&mut self, new_total: u32) -> Result<bool, ArenaError> {
        let old_total = self.len();
        let new_total = self.grown_len(new_total)?;
        if new_total == old_total {
            return Ok(false);
        }
        let extra = new_total - old_total;
        let last_offset = self.block(SENTINEL).prev;
        let mut last = self.block(last_offset);

        self.words.resize(new_total as usize / ALIGN as usize, 0);

        if last.is_free() {
            last.size += extra;
            self.set_block(last_offset, last);
        } else {
            self.set_block(
                old_total,
                BlockHeader {
                    size: extra,
                    state: STATE_FREE,
                    tag: 0,
                    next: SENTINEL,
                    prev: last_offset,
                    reserved: 0,
                },
            );
            last.next = old_total;
            self.set_block(last_offset, last);
            self.set_prev(SENTINEL, old_total);
        }

        let mut header = self.header();
        header.total_size = new_total;
        self.set_header(header);
        Ok(true)
    }

    /// Length [`grow`](Self::grow) would leave the zone at when asked for
    /// `new_total` bytes.
    ///
    /// Rounded up to [`ALIGN`]. A used last block forces at least
    /// [`MIN_ZONE_AREA`] extra bytes so the new tail is a valid block.
    pub fn grown_len(&self, new_total: u32) -> Result<u32, ArenaError> {
        let old_total = self.len();
        let overflow = || ArenaError::CapacityExceeded {
            requested: u64::from(new_total),
            capacity: u64::from(u32::MAX),
        };
        let target = align_up(new_total).ok_or_else(overflow)?;
        if target <= old_total {
            return Ok(old_total);
        }
        let last = self.block(self.block(SENTINEL).prev);
        let extra = if last.is_free() {
            target - old_total
        } else {
            (target - old_total).max(MIN_ZONE_AREA)
        };
        old_total.checked_add(extra).ok_or_else(overflow)
    }

    /// Resize the raw buffer without touching its structure.
    ///
    /// Only for callers about to overwrite the whole buffer.
    pub(crate) fn resize_raw(&mut self, len: u32) {
        self.words.resize(len as usize / ALIGN as usize, 0);
    }

    /// True when no block is in use. A zero-length zone is empty.
    pub fn is_empty_zone(&self) -> bool {
        self.is_empty() || self.blocks().all(|b| !b.used)
    }

    /// Iterate over all blocks in list order, sentinel excluded.
    pub fn blocks(&self) -> Blocks<'_> {
        let limit = self.len() / BLOCK_HEADER_SIZE + 1;
        Blocks {
            zone: self,
            cursor: if self.is_empty() {
                SENTINEL
            } else {
                self.block(SENTINEL).next
            },
            remaining: limit,
        }
    }

    /// Occupancy summary.
    pub fn stats(&self) -> ZoneStats {
        let mut stats = ZoneStats {
            total: self.len(),
            used: self.used(),
            ..ZoneStats::default()
        };
        for block in self.blocks() {
            stats.blocks += 1;
            if !block.used {
                stats.free += block.size;
                stats.free_blocks += 1;
                stats.largest_free_payload = stats.largest_free_payload.max(block.payload_len());
            }
        }
        stats
    }

    /// Walk the whole block list and verify every structural invariant.
    ///
    /// Checks that blocks tile the zone exactly, that forward and backward
    /// links agree, that no two free blocks are adjacent, that the rover
    /// points into the list, and that the used-byte counter matches.
    pub fn check(&self, index: u32) -> Result<(), ArenaError> {
        let fail = |block: u32, detail: String| {
            Err(ArenaError::Corrupted {
                zone: index,
                block,
                detail,
            })
        };

        let header = self.header();
        if header.total_size != self.len() {
            return fail(
                0,
                format!(
                    "header total {} does not match buffer length {}",
                    header.total_size,
                    self.len()
                ),
            );
        }
        let sentinel = self.block(SENTINEL);
        if sentinel.state != STATE_USED || sentinel.tag != BLOCK_TAG {
            return fail(SENTINEL, "sentinel is not marked in use".into());
        }
        if sentinel.next != FIRST_BLOCK {
            return fail(SENTINEL, format!("first block at {}", sentinel.next));
        }

        let limit = self.len() / BLOCK_HEADER_SIZE + 1;
        let mut steps = 0;
        let mut prev = SENTINEL;
        let mut prev_free = false;
        let mut cursor = sentinel.next;
        let mut used = 0u64;
        let mut rover_seen = header.rover == SENTINEL;

        while cursor != SENTINEL {
            steps += 1;
            if steps > limit {
                return fail(cursor, "block list does not terminate".into());
            }
            if cursor % ALIGN != 0 || cursor < FIRST_BLOCK {
                return fail(cursor, "misplaced block".into());
            }
            let Some(block) = self.try_block(cursor) else {
                return fail(cursor, "block header outside the zone".into());
            };
            if block.prev != prev {
                return fail(
                    cursor,
                    format!("prev link {} but previous block is {prev}", block.prev),
                );
            }
            if block.size < BLOCK_HEADER_SIZE || block.size % ALIGN != 0 {
                return fail(cursor, format!("invalid size {}", block.size));
            }
            let end = u64::from(cursor) + u64::from(block.size);
            let expected_end = if block.next == SENTINEL {
                u64::from(self.len())
            } else {
                u64::from(block.next)
            };
            if end != expected_end {
                return fail(
                    cursor,
                    format!("block ends at {end} but next block starts at {expected_end}"),
                );
            }
            match (block.state, block.tag) {
                (STATE_FREE, 0) => {
                    if prev_free {
                        return fail(cursor, "two consecutive free blocks".into());
                    }
                    prev_free = true;
                }
                (STATE_USED, BLOCK_TAG) => {
                    used += u64::from(block.size);
                    prev_free = false;
                }
                (state, tag) => {
                    return fail(cursor, format!("invalid state {state} / tag {tag:#x}"));
                }
            }
            rover_seen |= header.rover == cursor;
            prev = cursor;
            cursor = block.next;
        }

        if sentinel.prev != prev {
            return fail(
                SENTINEL,
                format!("sentinel prev {} but last block is {prev}", sentinel.prev),
            );
        }
        if !rover_seen {
            return fail(header.rover, "rover does not point at a block".into());
        }
        if used != u64::from(header.used) {
            return fail(
                0,
                format!("used counter {} but blocks sum to {used}", header.used),
            );
        }
        Ok(())
    }

    /// Human-readable block map.
    pub fn dump(&self, index: u32) -> String {
        use std::fmt::Write;

        let header = self.header();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "zone {index}: total={} used={} rover={}",
            header.total_size, header.used, header.rover
        );
        for block in self.blocks() {
            let _ = writeln!(
                out,
                "  @{:<8} size={:<8} {}",
                block.offset,
                block.size,
                if block.used { "used" } else { "free" }
            );
        }
        out
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("len", &self.len())
            .field("used", &self.used())
            .field("rover", &self.rover())
            .finish()
    }
}

/// Iterator over the blocks of a zone. See [`Zone::blocks`].
pub struct Blocks<'a> {
    zone: &'a Zone,
    cursor: u32,
    remaining: u32,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cursor == SENTINEL || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let block = self.zone.try_block(self.cursor)?;
        let info = BlockInfo {
            offset: self.cursor,
            size: block.size,
            used: block.is_used(),
        };
        self.cursor = block.next;
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(area: u32) -> Zone {
        Zone::new(area).unwrap()
    }

    #[test]
    fn new_zone_is_one_free_block() {
        let z = zone(4096);
        assert_eq!(z.len(), FIRST_BLOCK + 4096);
        let blocks: Vec<_> = z.blocks().collect();
        assert_eq!(
            blocks,
            vec![BlockInfo {
                offset: FIRST_BLOCK,
                size: 4096,
                used: false
            }]
        );
        assert!(z.is_empty_zone());
        z.check(0).unwrap();
    }

    #[test]
    fn area_is_rounded_up() {
        let z = zone(1001);
        assert_eq!(z.len(), FIRST_BLOCK + 1008);
    }

    #[test]
    fn malloc_splits_and_advances_rover() {
        let mut z = zone(4096);
        let p = z.malloc(100).unwrap();
        assert_eq!(p, FIRST_BLOCK + BLOCK_HEADER_SIZE);
        let used_size = block_size_for(100).unwrap();
        assert_eq!(z.used(), used_size);
        assert_eq!(z.rover(), FIRST_BLOCK + used_size);
        assert_eq!(z.blocks().count(), 2);
        z.check(0).unwrap();
    }

    #[test]
    fn small_leftover_is_not_split() {
        let mut z = zone(256);
        // 256 - (184 + 24) = 48 <= MIN_FRAGMENT, so the block is not split.
        z.malloc(184).unwrap();
        assert_eq!(z.blocks().count(), 1);
        assert_eq!(z.used(), 256);
        z.check(0).unwrap();
    }

    #[test]
    fn malloc_returns_none_when_full() {
        let mut z = zone(256);
        assert!(z.malloc(256 - BLOCK_HEADER_SIZE).is_some());
        assert!(z.malloc(1).is_none());
        z.check(0).unwrap();
    }

    #[test]
    fn malloc_zero_fills_payload() {
        let mut z = zone(1024);
        let p = z.malloc(64).unwrap();
        z.bytes_mut()[p as usize..p as usize + 64].fill(0xAB);
        z.free(p, FreeMode::Coalesce).unwrap();
        let q = z.malloc(64).unwrap();
        assert_eq!(p, q);
        assert!(z.bytes()[q as usize..q as usize + 64].iter().all(|&b| b == 0));
    }

    #[test]
    fn free_coalesces_both_sides() {
        let mut z = zone(4096);
        let a = z.malloc(100).unwrap();
        let b = z.malloc(100).unwrap();
        let c = z.malloc(100).unwrap();
        let _guard = z.malloc(100).unwrap();
        z.free(a, FreeMode::Coalesce).unwrap();
        z.free(c, FreeMode::Coalesce).unwrap();
        z.check(0).unwrap();
        z.free(b, FreeMode::Coalesce).unwrap();
        z.check(0).unwrap();
        let first = z.blocks().next().unwrap();
        assert!(!first.used);
        assert_eq!(first.size, 3 * block_size_for(100).unwrap());
        assert_eq!(z.rover(), FIRST_BLOCK);
    }

    #[test]
    fn free_keep_prev_does_not_merge_backward() {
        let mut z = zone(4096);
        let a = z.malloc(100).unwrap();
        let b = z.malloc(100).unwrap();
        let _c = z.malloc(100).unwrap();
        z.free(a, FreeMode::Coalesce).unwrap();
        z.free(b, FreeMode::KeepPrev).unwrap();
        let starts: Vec<_> = z.blocks().filter(|b| !b.used).map(|b| b.offset).collect();
        assert!(starts.contains(&(b - BLOCK_HEADER_SIZE)));
        assert!(z.claim(b, 100, 0));
        z.check(0).unwrap();
    }

    #[test]
    fn double_free_is_rejected() {
        let mut z = zone(1024);
        let a = z.malloc(10).unwrap();
        let _b = z.malloc(10).unwrap();
        z.free(a, FreeMode::Coalesce).unwrap();
        assert_eq!(z.free(a, FreeMode::Coalesce), Err("block is not in use"));
    }

    #[test]
    fn double_free_after_backward_merge_is_rejected() {
        let mut z = zone(4096);
        let x = z.malloc(100).unwrap();
        let y = z.malloc(100).unwrap();
        let _z = z.malloc(100).unwrap();
        let _g = z.malloc(100).unwrap();
        z.free(x, FreeMode::Coalesce).unwrap();
        z.free(y, FreeMode::Coalesce).unwrap();
        assert_eq!(z.free(y, FreeMode::Coalesce), Err("block is not in use"));
        assert_eq!(z.used(), 2 * block_size_for(100).unwrap());
        z.check(0).unwrap();
    }

    #[test]
    fn absorbed_successor_header_is_cleared() {
        let mut z = zone(4096);
        let a = z.malloc(100).unwrap();
        let b = z.malloc(100).unwrap();
        let _guard = z.malloc(100).unwrap();
        z.free(b, FreeMode::Coalesce).unwrap();
        z.free(a, FreeMode::Coalesce).unwrap();
        let stale = b - BLOCK_HEADER_SIZE;
        assert_eq!(z.block(stale), BlockHeader::zeroed());
        assert!(z.locate(b).is_err());
        z.check(0).unwrap();
    }

    #[test]
    fn wild_offsets_are_rejected() {
        let mut z = zone(1024);
        let a = z.malloc(64).unwrap();
        assert!(z.free(a + 8, FreeMode::Coalesce).is_err());
        assert!(z.free(3, FreeMode::Coalesce).is_err());
        assert!(z.free(FIRST_BLOCK, FreeMode::Coalesce).is_err());
        assert!(z.free(1 << 20, FreeMode::Coalesce).is_err());
        z.check(0).unwrap();
    }

    #[test]
    fn grow_extends_free_tail() {
        let mut z = zone(1024);
        let a = z.malloc(100).unwrap();
        z.bytes_mut()[a as usize] = 7;
        assert!(z.grow(z.len() + 4096).unwrap());
        assert_eq!(z.blocks().count(), 2);
        assert_eq!(z.bytes()[a as usize], 7);
        z.check(0).unwrap();
        assert!(z.malloc(4096).is_some());
    }

    #[test]
    fn grow_appends_block_after_used_tail() {
        let mut z = zone(256);
        z.malloc(256 - BLOCK_HEADER_SIZE).unwrap();
        assert!(z.grow(z.len() + 512).unwrap());
        let last = z.blocks().last().unwrap();
        assert!(!last.used);
        assert_eq!(last.size, 512);
        z.check(0).unwrap();
    }

    #[test]
    fn grown_len_includes_forced_tail() {
        let mut z = zone(1024);
        let len = z.len();
        assert_eq!(z.grown_len(len + 3).unwrap(), len + 8);
        let p = z.malloc(1024 - BLOCK_HEADER_SIZE).unwrap();
        assert_eq!(z.grown_len(len + 8).unwrap(), len + MIN_ZONE_AREA);
        assert_eq!(z.grown_len(len - 8).unwrap(), len);
        assert!(z.grow(len + 8).unwrap());
        assert_eq!(z.len(), len + MIN_ZONE_AREA);
        z.free(p, FreeMode::Coalesce).unwrap();
        z.check(0).unwrap();
    }

    #[test]
    fn grow_to_smaller_is_noop() {
        let mut z = zone(1024);
        let before = z.clone();
        assert!(!z.grow(16).unwrap());
        assert_eq!(z, before);
    }

    #[test]
    fn moved_zone_keeps_links() {
        let mut z = zone(4096);
        let a = z.malloc(100).unwrap();
        let b = z.malloc(300).unwrap();
        z.free(a, FreeMode::Coalesce).unwrap();
        let copy = Zone::from_bytes(z.bytes(), 0).unwrap();
        assert_eq!(copy.blocks().collect::<Vec<_>>(), z.blocks().collect::<Vec<_>>());
        assert_eq!(copy.payload_len(b).unwrap(), 304);
    }

    #[test]
    fn check_detects_broken_link() {
        let mut z = zone(4096);
        let a = z.malloc(100).unwrap();
        let mut block = z.block(a - BLOCK_HEADER_SIZE);
        block.next += ALIGN;
        z.set_block(a - BLOCK_HEADER_SIZE, block);
        assert!(matches!(z.check(3), Err(ArenaError::Corrupted { zone: 3, .. })));
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(Zone::from_bytes(&[0u8; 7], 0).is_err());
        assert!(Zone::from_bytes(&[0u8; 256], 0).is_err());
        assert!(Zone::from_bytes(&[0xFFu8; 256], 0).is_err());
    }

    #[test]
    fn stats_track_blocks() {
        let mut z = zone(4096);
        z.malloc(100).unwrap();
        let stats = z.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.used + stats.free, 4096);
        assert_eq!(
            stats.largest_free_payload,
            4096 - block_size_for(100).unwrap() - BLOCK_HEADER_SIZE
        );
    }

    #[test]
    fn dump_lists_blocks() {
        let mut z = zone(1024);
        z.malloc(8).unwrap();
        let text = z.dump(0);
        assert!(text.starts_with("zone 0: total="));
        assert_eq!(text.lines().count(), 3);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn random_alloc_free_keeps_invariants(
                ops in proptest::collection::vec((any::<bool>(), 0u32..600, any::<prop::sample::Index>()), 1..80),
            ) {
                let mut z = Zone::new(16 * 1024).unwrap();
                let mut live: Vec<u32> = Vec::new();
                for (is_alloc, size, pick) in ops {
                    if is_alloc || live.is_empty() {
                        if let Some(p) = z.malloc(size) {
                            live.push(p);
                        }
                    } else {
                        let p = live.swap_remove(pick.index(live.len()));
                        prop_assert!(z.free(p, FreeMode::Coalesce).is_ok());
                    }
                    prop_assert!(z.check(0).is_ok(), "{}", z.dump(0));
                }
                for p in live.drain(..) {
                    prop_assert!(z.free(p, FreeMode::Coalesce).is_ok());
                }
                prop_assert!(z.is_empty_zone());
                prop_assert_eq!(z.used(), 0);
                prop_assert_eq!(z.blocks().count(), 1);
            }

            #[test]
            fn adjacent_frees_merge_in_either_order(
                a_len in 1u32..500,
                b_len in 1u32..500,
                a_first in any::<bool>(),
            ) {
                let mut z = Zone::new(8 * 1024).unwrap();
                let a = z.malloc(a_len).unwrap();
                let b = z.malloc(b_len).unwrap();
                let _guard = z.malloc(8).unwrap();
                let (x, y) = if a_first { (a, b) } else { (b, a) };
                z.free(x, FreeMode::Coalesce).unwrap();
                z.free(y, FreeMode::Coalesce).unwrap();
                let first = z.blocks().next().unwrap();
                prop_assert!(!first.used);
                let combined = block_size_for(a_len).unwrap() + block_size_for(b_len).unwrap();
                prop_assert_eq!(first.size, combined);
                prop_assert_eq!(z.malloc(combined - BLOCK_HEADER_SIZE), Some(a));
            }
        }
    }
}
