// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The description of a single discovered root bridge.

use crate::capability::Capabilities;
use crate::capability::CapabilitySet;
use crate::error::DiscoveryDiagnostic;
use crate::resource::ResourceKind;
use core::fmt;
use memory_range::MemoryRange;

/// Compressed EISA ID of `PNP0A03`, the ACPI hardware ID of a PCI root
/// bridge.
pub const PNP0A03_HID: u32 = 0x0a03_41d0;

/// An address range forwarded by a root bridge to its downstream bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Aperture {
    range: MemoryRange,
    translation_offset: u64,
}

impl Aperture {
    /// Creates an aperture covering `range`. Returns `None` for an empty
    /// range; an unsupported aperture is absent, never zero length.
    pub fn new(range: MemoryRange, translation_offset: u64) -> Option<Self> {
        if range.is_empty() {
            return None;
        }
        Some(Self {
            range,
            translation_offset,
        })
    }

    /// The first host address of the aperture.
    pub fn base(&self) -> u64 {
        self.range.start()
    }

    /// The last host address of the aperture (inclusive).
    pub fn limit(&self) -> u64 {
        self.range.end() - 1
    }

    /// The host addresses of the aperture.
    pub fn range(&self) -> MemoryRange {
        self.range
    }

    /// Offset added to a host address to produce the PCI bus address.
    pub fn translation_offset(&self) -> u64 {
        self.translation_offset
    }
}

/// An inclusive range of bus numbers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BusRange {
    start: u8,
    end: u8,
}

impl BusRange {
    /// Returns the range `start..=end`, or `None` if `start > end`.
    pub const fn new(start: u8, end: u8) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }

    /// The root bus number.
    pub const fn start(&self) -> u8 {
        self.start
    }

    /// The highest subordinate bus number.
    pub const fn end(&self) -> u8 {
        self.end
    }

    /// The number of bus numbers in the range.
    pub const fn len(&self) -> u16 {
        self.end as u16 - self.start as u16 + 1
    }

    /// Whether the two ranges share a bus number.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for BusRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}-{:#04x}", self.start, self.end)
    }
}

/// The ACPI device path node naming a root bridge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RootBridgeDevicePath {
    /// Compressed EISA hardware ID.
    pub hid: u32,
    /// Unique ID distinguishing bridges with the same `hid`.
    pub uid: u32,
}

impl RootBridgeDevicePath {
    /// The path of the PCI root bridge with unique ID `uid`.
    pub const fn pci_root(uid: u32) -> Self {
        Self {
            hid: PNP0A03_HID,
            uid,
        }
    }
}

impl fmt::Display for RootBridgeDevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hid == PNP0A03_HID {
            write!(f, "PciRoot({:#x})", self.uid)
        } else {
            write!(f, "Acpi({:#x},{:#x})", self.hid, self.uid)
        }
    }
}

/// Everything the bus driver needs to know about one root bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootBridgeDescriptor {
    /// The platform's index for this bridge.
    pub bridge_index: u32,
    /// PCI segment group number.
    pub segment: u16,
    /// Supported and enabled capabilities.
    pub capabilities: Capabilities,
    /// Devices may DMA above 4GiB without an IOMMU.
    pub dma_above_4g: bool,
    /// Configuration access is limited to the first 256 bytes per function.
    pub no_extended_config_space: bool,
    /// The apertures are fixed; the bus driver must not reassign them.
    pub resource_assigned_by_firmware: bool,
    /// Bus numbers owned by this bridge.
    pub bus_range: BusRange,
    /// I/O port aperture.
    pub io: Option<Aperture>,
    /// Non-prefetchable memory aperture below 4GiB.
    pub mem32: Option<Aperture>,
    /// Non-prefetchable memory aperture above 4GiB.
    pub mem64: Option<Aperture>,
    /// Prefetchable memory aperture below 4GiB.
    pub prefetch_mem32: Option<Aperture>,
    /// Prefetchable memory aperture above 4GiB.
    pub prefetch_mem64: Option<Aperture>,
    /// The bridge's device path.
    pub device_path: RootBridgeDevicePath,
    /// Shortfalls recorded while allocating this bridge's apertures.
    pub diagnostics: Vec<DiscoveryDiagnostic>,
}

impl RootBridgeDescriptor {
    /// The supported capabilities.
    pub fn supports(&self) -> CapabilitySet {
        self.capabilities.supports()
    }

    /// The enabled capabilities.
    pub fn attributes(&self) -> CapabilitySet {
        self.capabilities.attributes()
    }

    /// The aperture of `kind`, if present.
    pub fn aperture(&self, kind: ResourceKind) -> Option<&Aperture> {
        match kind {
            ResourceKind::Io => self.io.as_ref(),
            ResourceKind::PrefetchMem32 => self.prefetch_mem32.as_ref(),
            ResourceKind::Mem32 => self.mem32.as_ref(),
            ResourceKind::PrefetchMem64 => self.prefetch_mem64.as_ref(),
            ResourceKind::Mem64 => self.mem64.as_ref(),
        }
    }

    /// The present apertures, in allocation order.
    pub fn apertures(&self) -> impl Iterator<Item = (ResourceKind, &Aperture)> {
        ResourceKind::ALL
            .into_iter()
            .filter_map(|kind| self.aperture(kind).map(|aperture| (kind, aperture)))
    }

    /// Whether allocating `kind` for this bridge ran out of space.
    pub fn is_exhausted(&self, kind: ResourceKind) -> bool {
        self.diagnostics.iter().any(|d| {
            matches!(d, DiscoveryDiagnostic::ApertureExhausted { kind: k, .. } if *k == kind)
        })
    }
}
