//! Reentrant spin lock.
//!
//! The only module in this crate that uses `unsafe`. Every `unsafe` block
//! has a `// SAFETY:` comment.
//!
//! The lock is owned by a thread, identified by a per-thread token drawn
//! from a global counter. The owning thread may lock again without
//! blocking; the lock is released when the outermost guard drops. Guards
//! only hand out `&T`, so reentrant guards can coexist; mutation goes
//! through interior mutability in `T` (see
//! [`SharedAllocator`](crate::SharedAllocator)).

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff;

const UNOWNED: u64 = 0;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static OWNER_TOKEN: u64 = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
}

/// Token identifying the calling thread. Never `0`, never reused.
fn current_owner() -> u64 {
    OWNER_TOKEN.with(|token| *token)
}

/// A spin lock the owning thread may re-acquire.
///
/// Contended acquisition spins with exponential backoff and then sleeps
/// for `sleep` between attempts. There is no timeout.
pub struct ReentrantSpinLock<T> {
    owner: AtomicU64,
    depth: AtomicU32,
    sleep: Duration,
    data: T,
}

// SAFETY: `data` is only reachable through a `ReentrantGuard`, and guards
// exist only on the thread that owns the lock. Guards are `!Send`, so at
// any moment at most one thread can observe `&T`. That makes sharing the
// lock equivalent to sending `T` to whichever thread holds it, which
// `T: Send` permits.
unsafe impl<T: Send> Sync for ReentrantSpinLock<T> {}

impl<T> ReentrantSpinLock<T> {
    /// Wrap `data`. `sleep` is the pause between attempts once spinning
    /// has backed off.
    pub fn new(data: T, sleep: Duration) -> Self {
        Self {
            owner: AtomicU64::new(UNOWNED),
            depth: AtomicU32::new(0),
            sleep,
            data,
        }
    }

    /// Acquire the lock, waiting as long as it takes.
    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let me = current_owner();
        if self.owner.load(Ordering::Relaxed) == me {
            return self.reenter();
        }
        let backoff = Backoff::new();
        while self
            .owner
            .compare_exchange_weak(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if backoff.is_completed() {
                thread::sleep(self.sleep);
            } else {
                backoff.snooze();
            }
        }
        self.depth.store(1, Ordering::Relaxed);
        self.guard()
    }

    /// Acquire the lock if it is free or already held by this thread.
    pub fn try_lock(&self) -> Option<ReentrantGuard<'_, T>> {
        let me = current_owner();
        if self.owner.load(Ordering::Relaxed) == me {
            return Some(self.reenter());
        }
        self.owner
            .compare_exchange(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        self.depth.store(1, Ordering::Relaxed);
        Some(self.guard())
    }

    /// Whether any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNOWNED
    }

    /// Whether the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_owner()
    }

    /// Exclusive access without locking; `&mut self` proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.data
    }

    /// Consume the lock and return the data.
    pub fn into_inner(self) -> T {
        self.data
    }

    fn reenter(&self) -> ReentrantGuard<'_, T> {
        let depth = self.depth.load(Ordering::Relaxed);
        assert!(depth < u32::MAX, "reentrant lock depth overflow");
        self.depth.store(depth + 1, Ordering::Relaxed);
        self.guard()
    }

    fn guard(&self) -> ReentrantGuard<'_, T> {
        ReentrantGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReentrantSpinLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantSpinLock")
            .field("locked", &self.is_locked())
            .field("depth", &self.depth.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Proof that the current thread holds a [`ReentrantSpinLock`].
///
/// Releases one level of the lock on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantGuard<'a, T> {
    lock: &'a ReentrantSpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for ReentrantGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.lock.data
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        // Only the owning thread touches `depth`, so load + store is fine.
        let depth = self.lock.depth.load(Ordering::Relaxed) - 1;
        self.lock.depth.store(depth, Ordering::Relaxed);
        if depth == 0 {
            self.lock.owner.store(UNOWNED, Ordering::Release);
        }
    }
}
