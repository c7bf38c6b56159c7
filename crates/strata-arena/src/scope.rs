//! Per-thread "current allocator" stack.
//!
//! Code that allocates deep inside a call tree can pick up the allocator
//! from the innermost [`AllocatorScope`] instead of threading it through
//! every signature. Scopes nest; dropping one restores the previous
//! current allocator.

use std::cell::RefCell;
use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::allocator::Allocator;
use crate::error::ArenaError;
use crate::shared::SharedAllocator;

thread_local! {
    static CURRENT: RefCell<SmallVec<[SharedAllocator; 4]>> = RefCell::new(SmallVec::new());
}

/// Guard that makes an allocator current on this thread until dropped.
#[must_use = "the allocator stops being current as soon as the scope is dropped"]
pub struct AllocatorScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl AllocatorScope {
    /// Push `allocator` as the current allocator.
    pub fn enter(allocator: SharedAllocator) -> Self {
        let depth = CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(allocator);
            stack.len()
        });
        Self {
            depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for AllocatorScope {
    fn drop(&mut self) {
        // During thread teardown the stack may already be gone.
        let _ = CURRENT.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "allocator scopes dropped out of order");
            stack.truncate(self.depth - 1);
        });
    }
}

/// The innermost current allocator on this thread.
pub fn current() -> Option<SharedAllocator> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

/// `explicit` if given, otherwise the current allocator.
pub fn resolve(explicit: Option<&SharedAllocator>) -> Result<SharedAllocator, ArenaError> {
    explicit
        .cloned()
        .or_else(current)
        .ok_or(ArenaError::NoCurrentAllocator)
}

/// Run `f` against the current allocator with exclusive access.
pub fn with_current<R>(f: impl FnOnce(&mut Allocator) -> R) -> Result<R, ArenaError> {
    resolve(None)?.with_mut(f)
}
