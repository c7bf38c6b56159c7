//! Relocatable handles into allocator memory.
//!
//! A [`MemPtr`] names a block by zone index and byte offset, never by
//! address. Zones may move, grow, or be written to disk and read back;
//! a handle stays meaningful as long as its block is live.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use strata_core::{AllocatorId, Service, TypeIndex};

/// Untyped handle to a block payload.
///
/// `offset == 0` is the null handle. `allocator_id` records which
/// allocator issued the handle; it is informational for the allocator
/// itself and used by [`AllocatorManager::owner_of`](crate::AllocatorManager::owner_of).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[must_use]
pub struct MemPtr {
    pub(crate) zone_index: u32,
    pub(crate) offset: u32,
    pub(crate) allocator_id: AllocatorId,
}

impl MemPtr {
    /// The null handle.
    pub const INVALID: Self = Self {
        zone_index: 0,
        offset: 0,
        allocator_id: AllocatorId::EMPTY,
    };

    /// Create a handle from its parts.
    pub const fn new(zone_index: u32, offset: u32, allocator_id: AllocatorId) -> Self {
        Self {
            zone_index,
            offset,
            allocator_id,
        }
    }

    /// Index of the zone holding the block.
    pub fn zone_index(&self) -> u32 {
        self.zone_index
    }

    /// Byte offset of the payload within its zone.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Allocator that issued this handle.
    pub fn allocator_id(&self) -> AllocatorId {
        self.allocator_id
    }

    /// The same location stamped with another allocator id.
    pub fn with_allocator(self, allocator_id: AllocatorId) -> Self {
        Self {
            allocator_id,
            ..self
        }
    }

    /// Whether this is not the null handle. Says nothing about liveness.
    pub fn is_valid(&self) -> bool {
        self.offset != 0
    }

    /// Attach a payload type.
    pub fn typed<T>(self) -> Ptr<T> {
        Ptr {
            raw: self,
            _marker: PhantomData,
        }
    }
}

impl fmt::Display for MemPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(
                f,
                "MemPtr(zone {}, off={}, {})",
                self.zone_index, self.offset, self.allocator_id
            )
        } else {
            f.write_str("MemPtr(null)")
        }
    }
}

/// Typed handle to a block holding a `T`.
///
/// Same representation as [`MemPtr`]; the type only steers the typed
/// accessors on [`Allocator`](crate::Allocator).
#[must_use]
pub struct Ptr<T> {
    raw: MemPtr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Ptr<T> {
    /// The null typed handle.
    pub const INVALID: Self = Self {
        raw: MemPtr::INVALID,
        _marker: PhantomData,
    };

    /// The untyped handle.
    pub fn raw(&self) -> MemPtr {
        self.raw
    }

    /// Whether this is not the null handle.
    pub fn is_valid(&self) -> bool {
        self.raw.is_valid()
    }

    /// Reinterpret as a handle to another type.
    pub fn cast<U>(self) -> Ptr<U> {
        self.raw.typed()
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Ptr<T> {}

impl<T> Hash for Ptr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr<{}>({})", std::any::type_name::<T>(), self.raw)
    }
}

impl<T> From<Ptr<T>> for MemPtr {
    fn from(ptr: Ptr<T>) -> Self {
        ptr.raw
    }
}

/// Handle tagged with the type index of the service it points at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndexedPtr {
    /// The handle.
    pub ptr: MemPtr,
    /// Type index of the pointee.
    pub type_index: TypeIndex,
}

impl IndexedPtr {
    /// Tag a typed service handle with its type index.
    pub fn of<T: Service>(ptr: Ptr<T>) -> Self {
        Self {
            ptr: ptr.raw,
            type_index: T::TYPE_INDEX,
        }
    }

    /// Recover the typed handle if `T` has the recorded type index.
    pub fn downcast<T: Service>(self) -> Option<Ptr<T>> {
        (self.type_index == T::TYPE_INDEX).then(|| self.ptr.typed())
    }
}
