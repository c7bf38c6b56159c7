//! Traits for values stored in an arena-resident service registry.

use bytemuck::Pod;

use crate::id::TypeIndex;

/// A type that can live as a singleton in a service registry.
///
/// Services are plain-old-data so they can be stored inside arena memory,
/// copied verbatim by snapshots, and viewed in place without fixups.
/// `Default` provides the value used by lazy registration.
///
/// # Examples
///
/// ```
/// use strata_core::{Service, TypeIndex};
///
/// #[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Clock {
///     tick: u64,
/// }
///
/// impl Service for Clock {
///     const TYPE_INDEX: TypeIndex = TypeIndex(0);
/// }
///
/// assert_eq!(Clock::TYPE_INDEX, TypeIndex(0));
/// ```
pub trait Service: Pod + Default {
    /// Registry slot for this type. Must be unique among the service
    /// types used with one registry.
    const TYPE_INDEX: TypeIndex;
}

/// Declares that `Self` begins with a `B`, so a `Self` instance may be
/// registered and looked up under `B`'s [`TypeIndex`].
///
/// Implementors should be `#[repr(C)]` with the base as the first field.
/// The registry only relies on `size_of::<B>() <= size_of::<Self>()`,
/// which it checks at registration time.
pub trait Extends<B: Service>: Service {}
