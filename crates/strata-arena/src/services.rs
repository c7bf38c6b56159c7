//! Typed service registry stored inside the arena.
//!
//! At most one instance per [`Service`] type, found in O(1) by the type's
//! [`TypeIndex`]. Both the instances and the table that indexes them are
//! ordinary arena blocks, so snapshots, copies, and restores carry the
//! registry along with everything else.
//!
//! Table layout (one block, grown with `realloc`):
//!
//! ```text
//! u32 capacity │ u32 count │ capacity × { u32 zone_index, u32 offset }
//! ```
//!
//! An entry with `offset == 0` is empty. The table's own handle is kept
//! in the header of zone 0.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use strata_core::{AllocatorId, Extends, Service, TypeIndex};
use tracing::debug;

use crate::allocator::Allocator;
use crate::error::ArenaError;
use crate::handle::{MemPtr, Ptr};

const MIN_TABLE_CAPACITY: u32 = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct TableHeader {
    capacity: u32,
    count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
struct Entry {
    zone_index: u32,
    offset: u32,
}

const HEADER_LEN: usize = size_of::<TableHeader>();
const ENTRY_LEN: usize = size_of::<Entry>();

fn table_len(capacity: u32) -> Option<u32> {
    u32::try_from(HEADER_LEN as u64 + ENTRY_LEN as u64 * u64::from(capacity)).ok()
}

/// Read the table header from the table's payload, rejecting a capacity
/// the block cannot hold.
fn read_header(table: MemPtr, bytes: &[u8]) -> Result<TableHeader, ArenaError> {
    let corrupted = |detail: String| ArenaError::Corrupted {
        zone: table.zone_index(),
        block: table.offset(),
        detail,
    };
    let raw = bytes
        .get(..HEADER_LEN)
        .ok_or_else(|| corrupted(format!("service table block holds only {} bytes", bytes.len())))?;
    let header: TableHeader = bytemuck::pod_read_unaligned(raw);
    let fits = table_len(header.capacity).is_some_and(|len| len as usize <= bytes.len());
    if !fits {
        return Err(corrupted(format!(
            "service table capacity {} does not fit its {}-byte block",
            header.capacity,
            bytes.len()
        )));
    }
    if header.count > header.capacity {
        return Err(corrupted(format!(
            "service table count {} exceeds capacity {}",
            header.count, header.capacity
        )));
    }
    Ok(header)
}

fn entry_range(index: TypeIndex) -> std::ops::Range<usize> {
    let start = HEADER_LEN + ENTRY_LEN * index.as_usize();
    start..start + ENTRY_LEN
}

impl Allocator {
    fn table_header(&self) -> Result<Option<TableHeader>, ArenaError> {
        if !self.service_table.is_valid() {
            return Ok(None);
        }
        let bytes = self.bytes(self.service_table)?;
        read_header(self.service_table, bytes).map(Some)
    }

    /// Validate the service table handle and header against the block
    /// holding it, independent of the safety tier.
    pub(crate) fn check_service_table(&self) -> Result<(), ArenaError> {
        if !self.service_table.is_valid() {
            return Ok(());
        }
        self.payload_len(self.service_table)?;
        read_header(self.service_table, self.bytes(self.service_table)?).map(|_| ())
    }

    fn service_entry(&self, index: TypeIndex) -> Result<Option<MemPtr>, ArenaError> {
        let Some(header) = self.table_header()? else {
            return Ok(None);
        };
        if index.0 >= header.capacity {
            return Ok(None);
        }
        let bytes = self.bytes(self.service_table)?;
        let entry: Entry = bytemuck::pod_read_unaligned(&bytes[entry_range(index)]);
        Ok((entry.offset != 0).then_some(MemPtr::new(entry.zone_index, entry.offset, self.id)))
    }

    /// Write `entry` at `index`, creating or growing the table as needed.
    fn set_service_entry(&mut self, index: TypeIndex, entry: Entry) -> Result<(), ArenaError> {
        let needed = index.0.checked_add(1).ok_or(ArenaError::CapacityExceeded {
            requested: u64::from(index.0),
            capacity: u64::from(u32::MAX),
        })?;
        let mut header = match self.table_header()? {
            Some(header) => header,
            None => TableHeader::default(),
        };
        if needed > header.capacity {
            let too_large = ArenaError::CapacityExceeded {
                requested: u64::from(needed),
                capacity: u64::from(u32::MAX),
            };
            let capacity = needed
                .checked_next_power_of_two()
                .ok_or_else(|| too_large.clone())?
                .max(MIN_TABLE_CAPACITY);
            let len = table_len(capacity).ok_or(too_large)?;
            // Fresh and realloc-extended payload bytes are zero, so new
            // entries start empty.
            self.service_table = self.realloc(self.service_table, len)?;
            self.store_root();
            debug!(
                from = header.capacity,
                to = capacity,
                table = %self.service_table,
                "service table grown"
            );
            header.capacity = capacity;
        }

        let table = self.service_table;
        let bytes = self.bytes_mut(table)?;
        let old: Entry = bytemuck::pod_read_unaligned(&bytes[entry_range(index)]);
        match (old.offset != 0, entry.offset != 0) {
            (false, true) => header.count += 1,
            (true, false) => header.count = header.count.saturating_sub(1),
            _ => {}
        }
        bytes[entry_range(index)].copy_from_slice(bytemuck::bytes_of(&entry));
        bytes[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&header));
        self.service_epoch = self.service_epoch.wrapping_add(1);
        Ok(())
    }

    fn insert_service(&mut self, index: TypeIndex, ptr: MemPtr) -> Result<(), ArenaError> {
        if self.service_entry(index)?.is_some() {
            return Err(ArenaError::ServiceAlreadyRegistered { type_index: index });
        }
        self.set_service_entry(
            index,
            Entry {
                zone_index: ptr.zone_index(),
                offset: ptr.offset(),
            },
        )?;
        debug!(type_index = %index, %ptr, "service registered");
        Ok(())
    }

    /// Register the instance behind `ptr` as the `T` service.
    ///
    /// Fails if a `T` is already registered.
    pub fn register_service<T: Service>(&mut self, ptr: Ptr<T>) -> Result<(), ArenaError> {
        self.read(ptr)?;
        self.insert_service(T::TYPE_INDEX, ptr.raw())
    }

    /// Register a `T` instance under its base type `B`.
    ///
    /// `T` must lay out `B` as its prefix, so `get_service::<B>()` sees the
    /// base part of the `T`.
    pub fn register_service_as<B: Service, T: Extends<B>>(
        &mut self,
        ptr: Ptr<T>,
    ) -> Result<(), ArenaError> {
        if size_of::<B>() > size_of::<T>() {
            return Err(ArenaError::SizeMismatch {
                requested: size_of::<B>(),
                available: size_of::<T>(),
            });
        }
        self.read(ptr)?;
        self.insert_service(B::TYPE_INDEX, ptr.raw())
    }

    /// Unregister the `T` service and return its handle.
    ///
    /// The instance itself is not freed; the caller owns it again.
    pub fn remove_service<T: Service>(&mut self) -> Result<Option<Ptr<T>>, ArenaError> {
        let Some(ptr) = self.service_entry(T::TYPE_INDEX)? else {
            return Ok(None);
        };
        let type_index = T::TYPE_INDEX;
        self.set_service_entry(type_index, Entry::default())?;
        debug!(%type_index, %ptr, "service removed");
        Ok(Some(ptr.typed()))
    }

    /// Handle of the registered `T`, if any.
    pub fn service_ptr<T: Service>(&self) -> Result<Option<Ptr<T>>, ArenaError> {
        Ok(self.service_entry(T::TYPE_INDEX)?.map(MemPtr::typed))
    }

    /// Whether a `T` is registered.
    pub fn has_service<T: Service>(&self) -> bool {
        matches!(self.service_entry(T::TYPE_INDEX), Ok(Some(_)))
    }

    /// The registered `T`. Absence is an error.
    pub fn get_service<T: Service>(&self) -> Result<&T, ArenaError> {
        let ptr = self.service_ptr::<T>()?.ok_or(ArenaError::ServiceMissing {
            type_index: T::TYPE_INDEX,
        })?;
        self.get(ptr)
    }

    /// The registered `T`, mutably. Absence is an error.
    pub fn get_service_mut<T: Service>(&mut self) -> Result<&mut T, ArenaError> {
        let ptr = self.service_ptr::<T>()?.ok_or(ArenaError::ServiceMissing {
            type_index: T::TYPE_INDEX,
        })?;
        self.get_mut(ptr)
    }

    /// Handle of the registered `T`, registering `T::default()` first if
    /// there is none.
    pub fn get_or_register_service_ptr<T: Service>(&mut self) -> Result<Ptr<T>, ArenaError> {
        if let Some(ptr) = self.service_ptr::<T>()? {
            return Ok(ptr);
        }
        let ptr = self.alloc_value(T::default())?;
        self.insert_service(T::TYPE_INDEX, ptr.raw())?;
        Ok(ptr)
    }

    /// The registered `T`, registering `T::default()` first if there is
    /// none.
    pub fn get_or_register_service<T: Service>(&mut self) -> Result<&mut T, ArenaError> {
        let ptr = self.get_or_register_service_ptr::<T>()?;
        self.get_mut(ptr)
    }

    /// Number of registered services.
    pub fn service_count(&self) -> u32 {
        match self.table_header() {
            Ok(Some(header)) => header.count,
            _ => 0,
        }
    }

    /// Changes whenever the set of registered services may have changed.
    pub(crate) fn service_stamp(&self) -> (AllocatorId, u16, u32) {
        (self.id, self.version, self.service_epoch)
    }
}

/// A service handle resolved once and reused until the registry changes.
///
/// The cache remembers the allocator's id, version, and registry epoch;
/// any difference triggers a fresh lookup. Use one cache per allocator.
pub struct CachedService<T> {
    cached: Option<(Ptr<T>, (AllocatorId, u16, u32))>,
}

impl<T: Service> CachedService<T> {
    /// An empty cache.
    pub const fn new() -> Self {
        Self { cached: None }
    }

    /// Handle of the registered `T`, from the cache when still current.
    pub fn resolve(&mut self, allocator: &Allocator) -> Result<Ptr<T>, ArenaError> {
        let stamp = allocator.service_stamp();
        if let Some((ptr, seen)) = self.cached {
            if seen == stamp {
                return Ok(ptr);
            }
        }
        let ptr = allocator.service_ptr::<T>()?.ok_or(ArenaError::ServiceMissing {
            type_index: T::TYPE_INDEX,
        })?;
        self.cached = Some((ptr, stamp));
        Ok(ptr)
    }

    /// The registered `T`.
    pub fn get<'a>(&mut self, allocator: &'a Allocator) -> Result<&'a T, ArenaError> {
        let ptr = self.resolve(allocator)?;
        allocator.get(ptr)
    }

    /// The registered `T`, mutably.
    pub fn get_mut<'a>(&mut self, allocator: &'a mut Allocator) -> Result<&'a mut T, ArenaError> {
        let ptr = self.resolve(allocator)?;
        allocator.get_mut(ptr)
    }

    /// Drop the cached handle.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Whether a handle is cached (it may still be stale).
    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}

impl<T: Service> Default for CachedService<T> {
    fn default() -> Self {
        Self::new()
    }
}
