//! Reusable service fixtures.
//!
//! Small `Pod` types with fixed type indices for registry tests:
//!
//! - [`Counter`]: a single `u64`.
//! - [`Transform`]: four `f32`s.
//! - [`BaseStats`] / [`HeroStats`]: a base type and a type extending it.

use bytemuck::{Pod, Zeroable};
use strata_core::{Extends, Service, TypeIndex};

/// A monotonically bumped counter.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Counter {
    pub value: u64,
}

impl Service for Counter {
    const TYPE_INDEX: TypeIndex = TypeIndex(0);
}

/// Position plus uniform scale.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub scale: f32,
}

impl Service for Transform {
    const TYPE_INDEX: TypeIndex = TypeIndex(1);
}

/// Base type for [`HeroStats`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BaseStats {
    pub health: u32,
    pub armor: u32,
}

impl Service for BaseStats {
    const TYPE_INDEX: TypeIndex = TypeIndex(2);
}

/// Extends [`BaseStats`], which it stores as its first field.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HeroStats {
    pub base: BaseStats,
    pub level: u32,
    pub experience: u32,
}

impl Service for HeroStats {
    const TYPE_INDEX: TypeIndex = TypeIndex(3);
}

impl Extends<BaseStats> for HeroStats {}
