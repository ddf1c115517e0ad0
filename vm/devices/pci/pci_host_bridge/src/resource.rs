// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resource kinds a root bridge can forward, and a table keyed by them.

use crate::capability::RootBridgeCapability;
use core::fmt;
use core::ops::Index;
use core::ops::IndexMut;

/// A kind of address-space aperture.
///
/// Declaration order is the allocation priority order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// I/O port space.
    Io = 0,
    /// Prefetchable memory below 4GiB.
    PrefetchMem32 = 1,
    /// Non-prefetchable memory below 4GiB.
    Mem32 = 2,
    /// Prefetchable memory above 4GiB.
    PrefetchMem64 = 3,
    /// Non-prefetchable memory above 4GiB.
    Mem64 = 4,
}

impl ResourceKind {
    /// Every kind, in allocation priority order.
    pub const ALL: [Self; 5] = [
        Self::Io,
        Self::PrefetchMem32,
        Self::Mem32,
        Self::PrefetchMem64,
        Self::Mem64,
    ];

    /// The capability flag advertising an aperture of this kind.
    pub const fn capability(self) -> RootBridgeCapability {
        match self {
            Self::Io => RootBridgeCapability::IoPorts,
            Self::PrefetchMem32 => RootBridgeCapability::PrefetchMem32,
            Self::Mem32 => RootBridgeCapability::Mem32,
            Self::PrefetchMem64 => RootBridgeCapability::PrefetchMem64,
            Self::Mem64 => RootBridgeCapability::Mem64,
        }
    }

    /// Whether every bridge with devices needs an aperture of this kind.
    pub const fn is_mandatory(self) -> bool {
        matches!(self, Self::Io | Self::Mem32)
    }

    /// Whether this kind is decoded above 4GiB.
    pub const fn is_64bit(self) -> bool {
        matches!(self, Self::PrefetchMem64 | Self::Mem64)
    }

    /// Whether this kind is a memory (rather than I/O port) aperture.
    pub const fn is_memory(self) -> bool {
        !matches!(self, Self::Io)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Io => "io",
            Self::PrefetchMem32 => "pmem32",
            Self::Mem32 => "mem32",
            Self::PrefetchMem64 => "pmem64",
            Self::Mem64 => "mem64",
        })
    }
}

/// A value for each [`ResourceKind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PerKind<T>([T; 5]);

impl<T> PerKind<T> {
    /// Builds a table by calling `f` for each kind in allocation order.
    pub fn from_fn(mut f: impl FnMut(ResourceKind) -> T) -> Self {
        Self(core::array::from_fn(|i| f(ResourceKind::ALL[i])))
    }

    /// Builds a table by calling the fallible `f` for each kind in allocation
    /// order, stopping at the first error.
    pub fn try_from_fn<E>(mut f: impl FnMut(ResourceKind) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self([
            f(ResourceKind::Io)?,
            f(ResourceKind::PrefetchMem32)?,
            f(ResourceKind::Mem32)?,
            f(ResourceKind::PrefetchMem64)?,
            f(ResourceKind::Mem64)?,
        ]))
    }

    /// Iterates over `(kind, value)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &T)> {
        ResourceKind::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<ResourceKind> for PerKind<T> {
    type Output = T;

    fn index(&self, kind: ResourceKind) -> &T {
        &self.0[kind as usize]
    }
}

impl<T> IndexMut<ResourceKind> for PerKind<T> {
    fn index_mut(&mut self, kind: ResourceKind) -> &mut T {
        &mut self.0[kind as usize]
    }
}
