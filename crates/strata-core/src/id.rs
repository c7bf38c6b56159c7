//! Strongly-typed identifiers.

use std::fmt;

/// Identifies an allocator inside an `AllocatorManager` table.
///
/// `index` is the slot the allocator occupied when the id was issued and
/// is only a lookup hint: slots are swap-removed, so an allocator may
/// later live at a different index. `generation` is the real identity.
/// It is issued from a monotonically increasing counter and is never
/// reused within one manager, so a mismatch between the slot's generation
/// and the id's generation always means the hint is stale.
///
/// The all-zero value is [`AllocatorId::EMPTY`] and never names a live
/// allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AllocatorId {
    /// Slot index in the owning manager when this id was issued.
    pub index: u32,
    /// Generation tag; `0` is reserved for [`AllocatorId::EMPTY`].
    pub generation: u32,
}

impl AllocatorId {
    /// The id carried by allocators that are not registered anywhere.
    pub const EMPTY: Self = Self {
        index: 0,
        generation: 0,
    };

    /// Create an id from its raw parts.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Whether this is the [`EMPTY`](Self::EMPTY) id.
    pub const fn is_empty(&self) -> bool {
        self.generation == 0
    }

    /// Same generation, different slot hint.
    pub const fn with_index(self, index: u32) -> Self {
        Self {
            index,
            generation: self.generation,
        }
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "alloc(empty)")
        } else {
            write!(f, "alloc({}@{})", self.generation, self.index)
        }
    }
}

/// Small integer naming a registered service type.
///
/// Assigned once per type at compile time through
/// [`Service::TYPE_INDEX`](crate::Service::TYPE_INDEX). The registry uses
/// it directly as a table index, so indices should be dense and small.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(pub u32);

impl TypeIndex {
    /// The index as a table position.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeIndex {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_is_default() {
        assert_eq!(AllocatorId::default(), AllocatorId::EMPTY);
        assert!(AllocatorId::EMPTY.is_empty());
        assert!(!AllocatorId::new(0, 1).is_empty());
    }

    #[test]
    fn with_index_keeps_generation() {
        let id = AllocatorId::new(3, 17).with_index(0);
        assert_eq!(id, AllocatorId::new(0, 17));
    }

    #[test]
    fn display_formats() {
        assert_eq!(AllocatorId::EMPTY.to_string(), "alloc(empty)");
        assert_eq!(AllocatorId::new(2, 9).to_string(), "alloc(9@2)");
        assert_eq!(TypeIndex(4).to_string(), "4");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn nonzero_generation_is_never_empty(index in any::<u32>(), generation in 1u32..) {
                prop_assert!(!AllocatorId::new(index, generation).is_empty());
            }
        }
    }
}
