//! Binary snapshot encode/decode.
//!
//! All integers are little-endian. Zones are written as raw buffers; since
//! every link inside a zone is an offset, a zone read back is valid as-is
//! with no fixup pass.
//!
//! ```text
//! u16   version
//! u32   max_size
//! u32   zone_count
//! u32   allocator id index
//! u32   allocator id generation
//! zone_count × { u32 len, len bytes }      len == 0 marks a hole
//! ```
//!
//! The initial zone size and the service table handle travel inside the
//! header of zone 0, so nothing follows the zones.

use std::fmt;
use std::io::{self, Read, Write};

use strata_core::AllocatorId;
use tracing::debug;

use crate::allocator::{Allocator, INITIAL_ZONE_CAPACITY};
use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::handle::MemPtr;
use crate::zone::{Zone, ZoneRoot, ALIGN, FIRST_BLOCK};

/// Errors from reading or writing a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// The stream decoded but does not describe a valid allocator.
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// An allocator operation failed while rebuilding.
    Arena(ArenaError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Malformed { detail } => write!(f, "malformed snapshot: {detail}"),
            Self::Arena(e) => write!(f, "arena error: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Arena(e) => Some(e),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ArenaError> for SnapshotError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}

fn malformed(detail: impl Into<String>) -> SnapshotError {
    SnapshotError::Malformed {
        detail: detail.into(),
    }
}

// ── Primitive writers ───────────────────────────────────────────

fn write_u16_le(w: &mut dyn Write, v: u16) -> Result<(), SnapshotError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), SnapshotError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

fn read_u16_le(r: &mut dyn Read) -> Result<u16, SnapshotError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le(r: &mut dyn Read) -> Result<u32, SnapshotError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

// ── Allocator encode/decode ─────────────────────────────────────

impl Allocator {
    /// Write the whole allocator to `w`.
    pub fn serialize(&self, w: &mut dyn Write) -> Result<(), SnapshotError> {
        write_u16_le(w, self.version)?;
        write_u32_le(w, self.config.max_size)?;
        write_u32_le(w, self.zones.len() as u32)?;
        write_u32_le(w, self.id.index)?;
        write_u32_le(w, self.id.generation)?;
        for slot in &self.zones {
            match slot {
                Some(zone) => {
                    write_u32_le(w, zone.len())?;
                    w.write_all(zone.bytes())?;
                }
                None => write_u32_le(w, 0)?,
            }
        }
        debug!(
            allocator = %self.id,
            zones = self.zones.len(),
            total = self.total_size,
            "snapshot written"
        );
        Ok(())
    }

    /// Rebuild an allocator from a stream written by
    /// [`serialize`](Self::serialize).
    ///
    /// Every zone must pass the consistency walk. The safety tier and lock
    /// sleep are not part of the stream and take their defaults.
    pub fn deserialize(r: &mut dyn Read) -> Result<Self, SnapshotError> {
        let version = read_u16_le(r)?;
        let max_size = read_u32_le(r)?;
        let zone_count = read_u32_le(r)? as usize;
        let id = AllocatorId::new(read_u32_le(r)?, read_u32_le(r)?);

        let mut zones = Vec::with_capacity(zone_count.min(INITIAL_ZONE_CAPACITY * 4));
        let mut total_size = 0u64;
        for index in 0..zone_count {
            let len = read_u32_le(r)?;
            if len == 0 {
                zones.push(None);
                continue;
            }
            total_size += u64::from(len);
            if total_size > u64::from(max_size) {
                return Err(malformed(format!(
                    "zones total {total_size} bytes, more than max_size {max_size}"
                )));
            }
            let mut bytes = Vec::new();
            (&mut *r).take(u64::from(len)).read_to_end(&mut bytes)?;
            if bytes.len() != len as usize {
                return Err(malformed(format!(
                    "zone {index} truncated: expected {len} bytes, got {}",
                    bytes.len()
                )));
            }
            let zone = Zone::from_bytes(&bytes, index as u32)
                .map_err(|e| malformed(e.to_string()))?;
            zones.push(Some(zone));
        }

        let root = match zones.first() {
            Some(Some(zone)) => zone.root(),
            Some(None) => return Err(malformed("zone 0 is missing")),
            // A disposed allocator; no zone remembers its initial size.
            None => ZoneRoot {
                initial_size: ArenaConfig::DEFAULT_INITIAL_SIZE
                    .min(max_size.saturating_sub(FIRST_BLOCK) & !(ALIGN - 1)),
                ..ZoneRoot::default()
            },
        };

        let config = ArenaConfig::new(root.initial_size).with_max_size(max_size);
        config.validate().map_err(|e| malformed(e.to_string()))?;

        let mut zone_capacity = INITIAL_ZONE_CAPACITY;
        while zone_capacity < zones.len() {
            zone_capacity *= 2;
        }
        zones.reserve_exact(zone_capacity - zones.len());

        let service_table = if root.table_offset == 0 {
            MemPtr::INVALID
        } else {
            MemPtr::new(root.table_zone, root.table_offset, id)
        };
        let allocator = Self {
            zones,
            zone_capacity,
            config,
            id,
            version,
            total_size,
            service_table,
            service_epoch: 0,
        };
        allocator
            .check_service_table()
            .map_err(|e| malformed(format!("service table: {e}")))?;
        debug!(
            allocator = %id,
            version,
            zones = zone_count,
            total = total_size,
            "snapshot read"
        );
        Ok(allocator)
    }

    /// [`deserialize`](Self::deserialize) from a byte slice that must be
    /// consumed exactly.
    pub fn from_snapshot(mut bytes: &[u8]) -> Result<Self, SnapshotError> {
        let allocator = Self::deserialize(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(malformed(format!("{} trailing bytes", bytes.len())));
        }
        Ok(allocator)
    }

    /// Serialize into a fresh buffer.
    pub fn to_snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut buf = Vec::with_capacity(self.total_size as usize + 64);
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}
