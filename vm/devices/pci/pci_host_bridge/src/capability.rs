// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Root bridge capability flags.

use core::fmt;

/// A capability a root bridge may support (and, if supported, have enabled).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RootBridgeCapability {
    /// Forwards an I/O port aperture.
    IoPorts = 0,
    /// Forwards a non-prefetchable memory aperture below 4GiB.
    Mem32 = 1,
    /// Forwards a non-prefetchable memory aperture above 4GiB.
    Mem64 = 2,
    /// Forwards a prefetchable memory aperture below 4GiB.
    PrefetchMem32 = 3,
    /// Forwards a prefetchable memory aperture above 4GiB.
    PrefetchMem64 = 4,
    /// Prefetchable and non-prefetchable memory share one aperture.
    CombinedMemPref = 5,
    /// Decodes 64-bit memory cycles alongside 32-bit ones.
    MixedMemoryDecode = 6,
    /// Exposes the 4KiB PCIe extended configuration space per function.
    ExtendedConfigSpace = 7,
    /// Forwards legacy ISA/VGA port ranges in addition to its I/O aperture.
    CombinedIoPortAndAttribute = 8,
}

impl RootBridgeCapability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::IoPorts,
        Self::Mem32,
        Self::Mem64,
        Self::PrefetchMem32,
        Self::PrefetchMem64,
        Self::CombinedMemPref,
        Self::MixedMemoryDecode,
        Self::ExtendedConfigSpace,
        Self::CombinedIoPortAndAttribute,
    ];

    const fn bit(self) -> u16 {
        1 << self as u8
    }
}

/// A set of [`RootBridgeCapability`] values.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// The set of every capability.
    pub const ALL: Self = Self::from_slice(&RootBridgeCapability::ALL);

    /// Builds a set from a list of capabilities.
    pub const fn from_slice(caps: &[RootBridgeCapability]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < caps.len() {
            bits |= caps[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// Returns a copy of the set with `cap` added.
    #[must_use]
    pub const fn with(self, cap: RootBridgeCapability) -> Self {
        Self(self.0 | cap.bit())
    }

    /// Adds `cap` to the set.
    pub fn insert(&mut self, cap: RootBridgeCapability) {
        self.0 |= cap.bit();
    }

    /// Removes `cap` from the set.
    pub fn remove(&mut self, cap: RootBridgeCapability) {
        self.0 &= !cap.bit();
    }

    /// Whether `cap` is in the set.
    pub const fn contains(&self, cap: RootBridgeCapability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// The capabilities in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// The capabilities in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// The capabilities in `self` but not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether every capability in `self` is also in `other`.
    pub const fn is_subset(&self, other: &Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Whether the set is empty.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the capabilities in the set, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = RootBridgeCapability> + use<> {
        let set = *self;
        RootBridgeCapability::ALL
            .into_iter()
            .filter(move |&cap| set.contains(cap))
    }

    /// The raw bit encoding, for the hand-off table.
    pub(crate) const fn bits(&self) -> u16 {
        self.0
    }
}

impl FromIterator<RootBridgeCapability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = RootBridgeCapability>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The supported and enabled capabilities of a root bridge.
///
/// The enabled set is always a subset of the supported set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Capabilities {
    supports: CapabilitySet,
    attributes: CapabilitySet,
}

impl Capabilities {
    /// Creates a new value supporting `supports`, with the supported
    /// capabilities that are also in `enable` enabled.
    pub const fn new(supports: CapabilitySet, enable: CapabilitySet) -> Self {
        Self {
            supports,
            attributes: supports.intersection(enable),
        }
    }

    /// The capabilities the bridge supports.
    pub const fn supports(&self) -> CapabilitySet {
        self.supports
    }

    /// The capabilities currently enabled on the bridge.
    pub const fn attributes(&self) -> CapabilitySet {
        self.attributes
    }
}
