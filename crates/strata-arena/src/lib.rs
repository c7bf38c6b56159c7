//! Relocatable zone/block allocator with handle-based addressing.
//!
//! Memory lives in growable zones and is addressed by [`MemPtr`] handles
//! (zone index + byte offset), never by raw address. Zones can therefore
//! grow, move, be copied wholesale, or be written to a stream and read
//! back, and every handle stays valid.
//!
//! # Architecture
//!
//! ```text
//! AllocatorManager (process-wide id table, swap-remove + generation tags)
//! └── SharedAllocator (Arc<ReentrantSpinLock<RefCell<Allocator>>>)
//!     └── Allocator
//!         ├── Zone[] (Vec<Option<Zone>>, holes reused lowest-first)
//!         │   └── header │ sentinel │ block │ block │ ...
//!         └── service table (itself an arena block)
//! ```
//!
//! # Safety
//!
//! Zone bytes are `Vec<u64>` viewed through `bytemuck`; no `unsafe` is
//! needed for block headers or typed access. The one `unsafe` item is the
//! `Sync` impl of the reentrant lock in `lock.rs`.
//!
//! # Checking
//!
//! [`SafetyTier`] selects how much each access validates, from bare slice
//! bounds (`Unchecked`) to a full consistency walk after every mutation
//! (`Paranoid`).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod allocator;
pub mod config;
mod copy;
pub mod error;
pub mod handle;
mod hash;
pub mod lock;
pub mod manager;
pub mod scope;
pub mod services;
pub mod shared;
pub mod snapshot;
pub mod zone;

// Public re-exports for the primary API surface.
pub use allocator::Allocator;
pub use config::{ArenaConfig, SafetyTier};
pub use error::ArenaError;
pub use handle::{IndexedPtr, MemPtr, Ptr};
pub use lock::{ReentrantGuard, ReentrantSpinLock};
pub use manager::AllocatorManager;
pub use scope::AllocatorScope;
pub use services::CachedService;
pub use shared::SharedAllocator;
pub use snapshot::SnapshotError;
pub use zone::{BlockInfo, FreeMode, Zone, ZoneStats};
