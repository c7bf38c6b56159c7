//! Strata: a relocatable, handle-addressed zone allocator.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Strata sub-crates. For most users, adding `strata` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use strata::prelude::*;
//!
//! #[repr(C)]
//! #[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
//! struct Score {
//!     points: u64,
//! }
//!
//! impl Service for Score {
//!     const TYPE_INDEX: TypeIndex = TypeIndex(0);
//! }
//!
//! let mut allocator = Allocator::new(ArenaConfig::new(64 * 1024)).unwrap();
//!
//! // Handles, not addresses: they survive growth, copies and snapshots.
//! let ptr = allocator.alloc(128).unwrap();
//! allocator.bytes_mut(ptr).unwrap()[..5].copy_from_slice(b"hello");
//! allocator.grow_zone(0, 1 << 20).unwrap();
//! assert_eq!(&allocator.bytes(ptr).unwrap()[..5], b"hello");
//!
//! // Singletons live in the arena too.
//! allocator.get_or_register_service::<Score>().unwrap().points = 10;
//!
//! let snapshot = allocator.to_snapshot().unwrap();
//! let restored = Allocator::from_snapshot(&snapshot).unwrap();
//! assert_eq!(&restored.bytes(ptr).unwrap()[..5], b"hello");
//! assert_eq!(restored.get_service::<Score>().unwrap().points, 10);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`arena`] | `strata-arena` | Allocator, zones, handles, snapshots, registry, manager |
//! | [`types`] | `strata-core` | Allocator ids, type indices, the `Service` trait |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Allocator, zones, handles, and snapshots (`strata-arena`).
///
/// Most users only need [`arena::Allocator`] and the handle types; they
/// are also available in the [`prelude`].
pub use strata_arena as arena;

/// Identifiers and traits shared by every Strata crate (`strata-core`).
pub use strata_core as types;

/// Common imports for typical Strata usage.
///
/// ```rust
/// use strata::prelude::*;
/// ```
pub mod prelude {
    // Allocator and handles
    pub use strata_arena::{Allocator, IndexedPtr, MemPtr, Ptr};

    // Configuration and errors
    pub use strata_arena::{ArenaConfig, ArenaError, SafetyTier, SnapshotError};

    // Sharing and scoping
    pub use strata_arena::{AllocatorManager, AllocatorScope, CachedService, SharedAllocator};

    // Core types and traits
    pub use strata_core::{AllocatorId, Extends, Service, TypeIndex};
}
