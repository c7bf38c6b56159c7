//! A lockable, clonable allocator handle.

use std::cell::RefCell;
use std::sync::Arc;

use strata_core::AllocatorId;

use crate::allocator::Allocator;
use crate::error::ArenaError;
use crate::lock::{ReentrantGuard, ReentrantSpinLock};

/// Shared ownership of an [`Allocator`] behind a [`ReentrantSpinLock`].
///
/// Every call locks for its duration. A thread already inside a call may
/// lock again (for reads or to hold the lock across several calls with
/// [`lock`](Self::lock)), but a second mutable borrow on the same thread
/// fails with [`ArenaError::AlreadyBorrowed`] instead of deadlocking.
#[derive(Clone)]
pub struct SharedAllocator {
    inner: Arc<ReentrantSpinLock<RefCell<Allocator>>>,
}

impl SharedAllocator {
    /// Take ownership of `allocator`.
    pub fn new(allocator: Allocator) -> Self {
        let sleep = allocator.config().lock_sleep;
        Self {
            inner: Arc::new(ReentrantSpinLock::new(RefCell::new(allocator), sleep)),
        }
    }

    /// Run `f` with shared access.
    pub fn with<R>(&self, f: impl FnOnce(&Allocator) -> R) -> Result<R, ArenaError> {
        let guard = self.inner.lock();
        let allocator = guard
            .try_borrow()
            .map_err(|_| ArenaError::AlreadyBorrowed)?;
        Ok(f(&allocator))
    }

    /// Run `f` with exclusive access.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Allocator) -> R) -> Result<R, ArenaError> {
        let guard = self.inner.lock();
        let mut allocator = guard
            .try_borrow_mut()
            .map_err(|_| ArenaError::AlreadyBorrowed)?;
        Ok(f(&mut allocator))
    }

    /// Hold the lock across several calls.
    ///
    /// Calls to [`with`](Self::with) and [`with_mut`](Self::with_mut) from
    /// the same thread still succeed while the guard is alive.
    pub fn lock(&self) -> ReentrantGuard<'_, RefCell<Allocator>> {
        self.inner.lock()
    }

    /// Id of the wrapped allocator.
    pub fn id(&self) -> Result<AllocatorId, ArenaError> {
        self.with(Allocator::id)
    }

    /// Whether both handles share one allocator.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SharedAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAllocator")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}
