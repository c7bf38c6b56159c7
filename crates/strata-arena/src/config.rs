//! Arena configuration parameters.

use std::time::Duration;

use crate::error::ArenaError;
use crate::zone::{self, MIN_ZONE_AREA};

/// How much checking the allocator does on each access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SafetyTier {
    /// No header validation on access. Handles are trusted; only bounds
    /// are checked so a bad handle panics or errors instead of reading
    /// outside the zone.
    Unchecked,
    /// Every access validates the block header and tag.
    Checked,
    /// `Checked`, plus a full consistency walk of the touched zone after
    /// every mutation. A failed walk is fatal.
    Paranoid,
}

impl SafetyTier {
    /// Whether accesses validate the block header.
    pub fn validates_handles(self) -> bool {
        !matches!(self, Self::Unchecked)
    }

    /// Whether mutations are followed by a consistency walk.
    pub fn walks_after_mutation(self) -> bool {
        matches!(self, Self::Paranoid)
    }
}

impl Default for SafetyTier {
    /// `Checked` in debug builds, `Unchecked` in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Checked
        } else {
            Self::Unchecked
        }
    }
}

/// Configuration for an [`Allocator`](crate::Allocator).
///
/// Validated at construction. `initial_size` and `max_size` travel with
/// snapshots; `safety` and `lock_sleep` are local to the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Block area of zone 0 and the minimum block area of every later zone.
    ///
    /// Default: 512 KiB.
    pub initial_size: u32,

    /// Upper bound on the summed length of all zones, in bytes.
    ///
    /// Default: `u32::MAX`.
    pub max_size: u32,

    /// Access checking level.
    pub safety: SafetyTier,

    /// How long a contended lock sleeps once spinning has backed off.
    ///
    /// Default: 50 µs.
    pub lock_sleep: Duration,
}

impl ArenaConfig {
    /// Default block area of a zone.
    pub const DEFAULT_INITIAL_SIZE: u32 = 512 * 1024;

    /// Default total size limit.
    pub const DEFAULT_MAX_SIZE: u32 = u32::MAX;

    /// Default sleep between contended lock attempts.
    pub const DEFAULT_LOCK_SLEEP: Duration = Duration::from_micros(50);

    /// Create a config with the given initial zone size.
    ///
    /// Uses default values for all other parameters.
    pub fn new(initial_size: u32) -> Self {
        Self {
            initial_size,
            max_size: Self::DEFAULT_MAX_SIZE,
            safety: SafetyTier::default(),
            lock_sleep: Self::DEFAULT_LOCK_SLEEP,
        }
    }

    /// Set the total size limit.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the safety tier.
    pub fn with_safety(mut self, safety: SafetyTier) -> Self {
        self.safety = safety;
        self
    }

    /// Set the contended-lock sleep.
    pub fn with_lock_sleep(mut self, lock_sleep: Duration) -> Self {
        self.lock_sleep = lock_sleep;
        self
    }

    /// Length in bytes of a zone created with `initial_size`.
    pub fn initial_zone_len(&self) -> u64 {
        zone::align_up(self.initial_size.max(MIN_ZONE_AREA))
            .map_or(u64::MAX, |area| u64::from(area) + u64::from(zone::FIRST_BLOCK))
    }

    /// Check that the config describes a usable allocator.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.initial_size < MIN_ZONE_AREA {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "initial_size {} is below the minimum zone area {MIN_ZONE_AREA}",
                    self.initial_size
                ),
            });
        }
        if self.initial_zone_len() > u64::from(self.max_size) {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "initial zone of {} bytes exceeds max_size {}",
                    self.initial_zone_len(),
                    self.max_size
                ),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL_SIZE)
    }
}
