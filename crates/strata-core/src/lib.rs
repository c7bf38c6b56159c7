//! Core identifiers and traits for the Strata relocatable allocator.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the small value types shared by every other Strata crate: allocator
//! identities, registry type indices, and the [`Service`] trait that
//! marks a type as storable in an arena-resident service registry.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod id;
pub mod traits;

pub use id::{AllocatorId, TypeIndex};
pub use traits::{Extends, Service};
