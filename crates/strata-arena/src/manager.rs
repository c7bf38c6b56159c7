//! Process-wide table of live allocators.
//!
//! Allocators are stored densely and removed by swap-remove, so the slot an
//! [`AllocatorId`] was issued for may later hold a different allocator. The
//! id's `index` is therefore only a hint: lookup tries that slot first and
//! falls back to a scan for the id's generation, which is never reused.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use strata_core::AllocatorId;
use tracing::debug;

use crate::allocator::Allocator;
use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::handle::MemPtr;
use crate::shared::SharedAllocator;

struct Entry {
    generation: u32,
    allocator: SharedAllocator,
}

/// Table mapping [`AllocatorId`]s to [`SharedAllocator`]s.
pub struct AllocatorManager {
    entries: RwLock<Vec<Entry>>,
    next_generation: AtomicU32,
}

impl AllocatorManager {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_generation: AtomicU32::new(1),
        }
    }

    /// The process-wide table.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<AllocatorManager> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    fn issue_generation(&self) -> u32 {
        loop {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            if generation != 0 {
                return generation;
            }
        }
    }

    /// Create and register a new allocator.
    pub fn create_allocator(&self, config: ArenaConfig) -> Result<AllocatorId, ArenaError> {
        let mut entries = self.entries.write();
        let id = AllocatorId::new(entries.len() as u32, self.issue_generation());
        let allocator = Allocator::with_id(id, config)?;
        entries.push(Entry {
            generation: id.generation,
            allocator: SharedAllocator::new(allocator),
        });
        debug!(%id, live = entries.len(), "allocator registered");
        Ok(id)
    }

    /// Register an existing allocator (for example one read back from a
    /// snapshot) under a fresh id.
    ///
    /// Handles minted under the allocator's previous id keep working with
    /// the allocator itself; [`owner_of`](Self::owner_of) only recognises
    /// handles carrying the new id.
    pub fn adopt(&self, mut allocator: Allocator) -> AllocatorId {
        let mut entries = self.entries.write();
        let id = AllocatorId::new(entries.len() as u32, self.issue_generation());
        allocator.set_id(id);
        entries.push(Entry {
            generation: id.generation,
            allocator: SharedAllocator::new(allocator),
        });
        debug!(%id, live = entries.len(), "allocator adopted");
        id
    }

    /// Unregister and dispose the allocator behind `id`.
    ///
    /// The last live allocator moves into the vacated slot. Other clones of
    /// the [`SharedAllocator`] stay alive but see an empty allocator.
    pub fn remove_allocator(&self, id: AllocatorId) -> Result<(), ArenaError> {
        let removed = {
            let mut entries = self.entries.write();
            let index = locate(&entries, id).ok_or(ArenaError::StaleAllocator { id })?;
            let removed = entries.swap_remove(index);
            debug!(%id, live = entries.len(), "allocator removed");
            removed
        };
        removed.allocator.with_mut(Allocator::dispose)
    }

    /// The allocator behind `id`, if it is still registered.
    pub fn get(&self, id: AllocatorId) -> Option<SharedAllocator> {
        let entries = self.entries.read();
        locate(&entries, id).map(|index| entries[index].allocator.clone())
    }

    /// Whether `id` names a registered allocator.
    pub fn is_valid(&self, id: AllocatorId) -> bool {
        locate(&self.entries.read(), id).is_some()
    }

    /// `id` with its index hint refreshed, if still registered.
    pub fn resolve(&self, id: AllocatorId) -> Option<AllocatorId> {
        locate(&self.entries.read(), id).map(|index| id.with_index(index as u32))
    }

    /// The allocator that issued `ptr`.
    pub fn owner_of(&self, ptr: MemPtr) -> Option<SharedAllocator> {
        self.get(ptr.allocator_id())
    }

    /// Number of registered allocators.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no allocator is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for AllocatorManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot index of `id`: the hinted slot when its generation matches,
/// otherwise whichever slot carries the generation.
fn locate(entries: &[Entry], id: AllocatorId) -> Option<usize> {
    if id.is_empty() {
        return None;
    }
    let hint = id.index as usize;
    if entries.get(hint).is_some_and(|e| e.generation == id.generation) {
        return Some(hint);
    }
    entries.iter().position(|e| e.generation == id.generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ArenaConfig {
        ArenaConfig::new(4096)
    }

    #[test]
    fn create_and_get() {
        let m = AllocatorManager::new();
        let id = m.create_allocator(config()).unwrap();
        assert_eq!(id.index, 0);
        assert_eq!(id.generation, 1);
        let shared = m.get(id).unwrap();
        assert_eq!(shared.id().unwrap(), id);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn empty_id_never_resolves() {
        let m = AllocatorManager::new();
        m.create_allocator(config()).unwrap();
        assert!(!m.is_valid(AllocatorId::EMPTY));
    }

    #[test]
    fn swap_remove_keeps_other_ids_resolvable() {
        let m = AllocatorManager::new();
        let a = m.create_allocator(config()).unwrap();
        let b = m.create_allocator(config()).unwrap();
        let c = m.create_allocator(config()).unwrap();
        m.remove_allocator(a).unwrap();

        assert!(!m.is_valid(a));
        assert!(m.is_valid(b));
        // `c` moved into slot 0; its hint is stale but the rescan finds it.
        assert!(m.is_valid(c));
        assert_eq!(m.resolve(c), Some(c.with_index(0)));
        assert_eq!(m.get(c).unwrap().id().unwrap(), c);
    }

    #[test]
    fn remove_twice_is_stale() {
        let m = AllocatorManager::new();
        let a = m.create_allocator(config()).unwrap();
        m.remove_allocator(a).unwrap();
        assert_eq!(
            m.remove_allocator(a),
            Err(ArenaError::StaleAllocator { id: a })
        );
    }

    #[test]
    fn removed_allocator_is_disposed() {
        let m = AllocatorManager::new();
        let a = m.create_allocator(config()).unwrap();
        let shared = m.get(a).unwrap();
        m.remove_allocator(a).unwrap();
        assert_eq!(shared.with(Allocator::zone_count).unwrap(), 0);
    }

    #[test]
    fn owner_of_follows_handle() {
        let m = AllocatorManager::new();
        let _a = m.create_allocator(config()).unwrap();
        let b = m.create_allocator(config()).unwrap();
        let p = m.get(b).unwrap().with_mut(|x| x.alloc(8)).unwrap().unwrap();
        let owner = m.owner_of(p).unwrap();
        assert!(owner.ptr_eq(&m.get(b).unwrap()));
        assert!(m.owner_of(MemPtr::INVALID).is_none());
    }

    #[test]
    fn adopt_assigns_fresh_id() {
        let m = AllocatorManager::new();
        let first = m.create_allocator(config()).unwrap();
        let loose = Allocator::new(config()).unwrap();
        let id = m.adopt(loose);
        assert_ne!(id, first);
        assert_eq!(m.get(id).unwrap().id().unwrap(), id);
    }

    #[test]
    fn global_is_shared() {
        assert!(std::ptr::eq(
            AllocatorManager::global(),
            AllocatorManager::global()
        ));
    }
}
