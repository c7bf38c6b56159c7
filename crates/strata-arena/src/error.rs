//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use strata_core::{AllocatorId, TypeIndex};

use crate::handle::MemPtr;

/// Errors that can occur during arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// A new zone would push the allocator past its `max_size`.
    CapacityExceeded {
        /// Number of bytes requested.
        requested: u64,
        /// Capacity that would have been exceeded.
        capacity: u64,
    },
    /// An [`ArenaConfig`](crate::ArenaConfig) failed validation.
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },
    /// A handle that does not name a live block of this allocator.
    InvalidHandle {
        /// The rejected handle.
        ptr: MemPtr,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A typed access asked for more bytes than the block holds.
    SizeMismatch {
        /// Bytes the access needs.
        requested: usize,
        /// Payload bytes the block holds.
        available: usize,
    },
    /// A typed access landed on an offset the type cannot live at.
    Misaligned {
        /// Payload offset within its zone.
        offset: u32,
        /// Alignment the type requires.
        align: usize,
    },
    /// The consistency walk found a broken zone.
    Corrupted {
        /// Zone index.
        zone: u32,
        /// Offset of the offending block (0 for zone-level faults).
        block: u32,
        /// Description of the violated invariant.
        detail: String,
    },
    /// A zone index that names a hole or lies past the zone table.
    ZoneNotLive {
        /// The zone index.
        zone: u32,
    },
    /// Zone shapes differ where a copy expected them to match.
    ShapeMismatch {
        /// First zone index whose shape differs.
        zone: u32,
    },
    /// An [`AllocatorId`] whose allocator has been removed.
    StaleAllocator {
        /// The stale id.
        id: AllocatorId,
    },
    /// The allocator is already borrowed on this thread.
    AlreadyBorrowed,
    /// No allocator was passed and none is in scope on this thread.
    NoCurrentAllocator,
    /// A service of this type is already registered.
    ServiceAlreadyRegistered {
        /// The service's type index.
        type_index: TypeIndex,
    },
    /// No service of this type is registered.
    ServiceMissing {
        /// The service's type index.
        type_index: TypeIndex,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded {
                requested,
                capacity,
            } => {
                write!(
                    f,
                    "arena capacity exceeded: requested {requested} bytes, capacity {capacity} bytes"
                )
            }
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
            Self::InvalidHandle { ptr, reason } => write!(f, "invalid handle {ptr}: {reason}"),
            Self::SizeMismatch {
                requested,
                available,
            } => {
                write!(
                    f,
                    "size mismatch: access needs {requested} bytes, block holds {available}"
                )
            }
            Self::Misaligned { offset, align } => {
                write!(f, "offset {offset} is not aligned to {align}")
            }
            Self::Corrupted {
                zone,
                block,
                detail,
            } => write!(f, "zone {zone} corrupted at block {block}: {detail}"),
            Self::ZoneNotLive { zone } => write!(f, "zone {zone} is not live"),
            Self::ShapeMismatch { zone } => write!(f, "zone {zone} shape does not match source"),
            Self::StaleAllocator { id } => write!(f, "stale allocator id: {id}"),
            Self::AlreadyBorrowed => write!(f, "allocator is already borrowed on this thread"),
            Self::NoCurrentAllocator => write!(f, "no current allocator on this thread"),
            Self::ServiceAlreadyRegistered { type_index } => {
                write!(f, "service {type_index} is already registered")
            }
            Self::ServiceMissing { type_index } => write!(f, "service {type_index} is not registered"),
        }
    }
}

impl Error for ArenaError {}
