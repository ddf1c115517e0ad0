// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The platform facts that root bridge discovery is built from.
//!
//! Discovery never talks to the configuration transport (fw_cfg, CMOS, a
//! device tree) directly. Instead the platform implements
//! [`PlatformInfoSource`] over data it has already latched, and discovery
//! issues pure queries against it.

use crate::capability::CapabilitySet;
use crate::resource::PerKind;
use crate::resource::ResourceKind;
use memory_range::MemoryRange;
use thiserror::Error;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Default allocation granularity for I/O apertures.
pub const DEFAULT_IO_GRANULARITY: u64 = 4 * KB;
/// Default allocation granularity for memory apertures.
pub const DEFAULT_MEM_GRANULARITY: u64 = MB;

/// Number of additional attempts [`RetryingSource`] makes by default.
pub const DEFAULT_SOURCE_RETRIES: u32 = 3;

/// Errors returned by a [`PlatformInfoSource`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformSourceError {
    /// The configuration source cannot be reached at all.
    #[error("platform configuration source is unreachable")]
    Unreachable,
    /// The configuration source is momentarily unable to answer.
    #[error("platform configuration source is temporarily unavailable")]
    Transient,
    /// The configuration source answered with data discovery cannot use.
    #[error("platform configuration source returned invalid {what} for bridge {bridge}")]
    InvalidData {
        /// The queried fact.
        what: &'static str,
        /// The bridge index the query was for.
        bridge: u32,
    },
}

/// The raw capacity a platform requests for one bridge and resource kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RawCapacity {
    /// The platform does not offer this kind for the bridge.
    Unsupported,
    /// The number of bytes (or ports) requested. Zero requests nothing.
    Bytes(u64),
}

impl Default for RawCapacity {
    fn default() -> Self {
        Self::Bytes(0)
    }
}

/// A platform address window that apertures are carved from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ApertureWindow {
    /// The host-visible addresses of the window.
    pub range: MemoryRange,
    /// Offset added to a host address to produce the PCI bus address.
    pub translation_offset: u64,
}

impl ApertureWindow {
    /// An identity-mapped window.
    pub const fn new(range: MemoryRange) -> Self {
        Self {
            range,
            translation_offset: 0,
        }
    }

    /// Sets the host-to-bus translation offset.
    pub const fn with_translation(self, translation_offset: u64) -> Self {
        Self {
            translation_offset,
            ..self
        }
    }
}

/// Platform-wide facts governing aperture allocation and descriptor flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLayout {
    /// The address window for each resource kind, if the platform has one.
    pub windows: PerKind<Option<ApertureWindow>>,
    /// Allocation granularity for I/O apertures. Must be a power of two.
    pub io_granularity: u64,
    /// Allocation granularity for memory apertures. Must be a power of two.
    pub mem_granularity: u64,
    /// The platform explicitly enables decoding above 4GiB. Without this,
    /// 64-bit requests are placed below 4GiB even on capable hardware.
    pub above_4g_decode: bool,
    /// Prefetchable and non-prefetchable memory are allocated from the same
    /// aperture.
    pub combine_mem_pmem: bool,
    /// The platform exposes PCIe extended configuration space.
    pub extended_config_space: bool,
    /// Apertures are fixed by firmware and must not be reassigned.
    pub resources_fixed: bool,
    /// Devices may DMA above 4GiB without an IOMMU.
    pub dma_above_4g: bool,
    /// The bridges forward legacy ISA/VGA port ranges.
    pub legacy_io_forwarding: bool,
    /// Supported capabilities that should also be enabled.
    pub attribute_mask: CapabilitySet,
    /// Bus number of the first root bridge.
    pub base_bus: u8,
    /// Width of the guest physical address space.
    pub phys_address_bits: u8,
}

impl PlatformLayout {
    /// A layout with no windows and default granularity.
    pub fn empty() -> Self {
        Self {
            windows: PerKind::default(),
            io_granularity: DEFAULT_IO_GRANULARITY,
            mem_granularity: DEFAULT_MEM_GRANULARITY,
            above_4g_decode: false,
            combine_mem_pmem: false,
            extended_config_space: false,
            resources_fixed: false,
            dma_above_4g: false,
            legacy_io_forwarding: false,
            attribute_mask: CapabilitySet::ALL,
            base_bus: 0,
            phys_address_bits: 36,
        }
    }

    /// The layout of a virtual Q35-class machine: the top quarter of the I/O
    /// space, 2GiB..0xFC00_0000 below 4GiB and 512GiB..1TiB above, with
    /// prefetchable memory sharing the plain memory windows.
    pub fn virtual_q35() -> Self {
        let mut layout = Self::empty();
        layout.windows[ResourceKind::Io] =
            Some(ApertureWindow::new(MemoryRange::new(0xc000..0x1_0000)));
        layout.windows[ResourceKind::Mem32] = Some(ApertureWindow::new(MemoryRange::new(
            2 * GB..0xfc00_0000,
        )));
        layout.windows[ResourceKind::Mem64] = Some(ApertureWindow::new(MemoryRange::new(
            512 * GB..1024 * GB,
        )));
        layout.above_4g_decode = true;
        layout.combine_mem_pmem = true;
        layout.extended_config_space = true;
        layout.legacy_io_forwarding = true;
        layout.phys_address_bits = 40;
        layout
    }

    /// Sets the window for `kind`.
    pub fn with_window(mut self, kind: ResourceKind, window: ApertureWindow) -> Self {
        self.windows[kind] = Some(window);
        self
    }

    /// The window apertures of `kind` are carved from.
    pub fn window(&self, kind: ResourceKind) -> Option<&ApertureWindow> {
        self.windows[kind].as_ref()
    }

    /// The allocation granularity for `kind`.
    pub fn granularity(&self, kind: ResourceKind) -> u64 {
        if kind.is_memory() {
            self.mem_granularity
        } else {
            self.io_granularity
        }
    }

    /// The whole address space an aperture of `kind` must lie in.
    pub fn address_space(&self, kind: ResourceKind) -> MemoryRange {
        match kind {
            ResourceKind::Io => MemoryRange::new(0..0x1_0000),
            ResourceKind::PrefetchMem32 | ResourceKind::Mem32 => MemoryRange::new(0..4 * GB),
            ResourceKind::PrefetchMem64 | ResourceKind::Mem64 => {
                let end = 1u64
                    .checked_shl(self.phys_address_bits.into())
                    .unwrap_or(u64::MAX);
                MemoryRange::new(0..end)
            }
        }
    }
}

/// The queries root bridge discovery makes against the platform.
///
/// All methods are pure reads of configuration the platform has already
/// latched. An error from any of them aborts discovery.
pub trait PlatformInfoSource {
    /// The number of root bridges. Must be at least one.
    fn bridge_count(&self) -> Result<u32, PlatformSourceError>;

    /// The capacity requested for `bridge` in address space `kind`.
    fn raw_capacity(
        &self,
        bridge: u32,
        kind: ResourceKind,
    ) -> Result<RawCapacity, PlatformSourceError>;

    /// Whether the processor and chipset can address memory above 4GiB.
    fn has_extended_address_support(&self) -> Result<bool, PlatformSourceError>;

    /// The platform windows and flags.
    fn layout(&self) -> Result<PlatformLayout, PlatformSourceError>;

    /// The number of bus numbers `bridge` needs, if the platform declares
    /// one.
    fn bus_count(&self, bridge: u32) -> Result<Option<u16>, PlatformSourceError> {
        let _ = bridge;
        Ok(None)
    }

    /// The PCI segment group of `bridge`. Defaults to the bridge index.
    fn segment(&self, bridge: u32) -> Result<u16, PlatformSourceError> {
        u16::try_from(bridge).map_err(|_| PlatformSourceError::InvalidData {
            what: "segment",
            bridge,
        })
    }
}

impl<T: PlatformInfoSource + ?Sized> PlatformInfoSource for &T {
    fn bridge_count(&self) -> Result<u32, PlatformSourceError> {
        (**self).bridge_count()
    }

    fn raw_capacity(
        &self,
        bridge: u32,
        kind: ResourceKind,
    ) -> Result<RawCapacity, PlatformSourceError> {
        (**self).raw_capacity(bridge, kind)
    }

    fn has_extended_address_support(&self) -> Result<bool, PlatformSourceError> {
        (**self).has_extended_address_support()
    }

    fn layout(&self) -> Result<PlatformLayout, PlatformSourceError> {
        (**self).layout()
    }

    fn bus_count(&self, bridge: u32) -> Result<Option<u16>, PlatformSourceError> {
        (**self).bus_count(bridge)
    }

    fn segment(&self, bridge: u32) -> Result<u16, PlatformSourceError> {
        (**self).segment(bridge)
    }
}

/// A [`PlatformInfoSource`] wrapper that retries queries failing with
/// [`PlatformSourceError::Transient`] a bounded number of times.
pub struct RetryingSource<S> {
    inner: S,
    retries: u32,
}

impl<S: PlatformInfoSource> RetryingSource<S> {
    /// Wraps `inner`, allowing up to `retries` extra attempts per query.
    pub fn new(inner: S, retries: u32) -> Self {
        Self { inner, retries }
    }

    fn query<T>(
        &self,
        what: &'static str,
        mut f: impl FnMut(&S) -> Result<T, PlatformSourceError>,
    ) -> Result<T, PlatformSourceError> {
        let mut attempt = 0;
        loop {
            match f(&self.inner) {
                Err(PlatformSourceError::Transient) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        what,
                        attempt,
                        retries = self.retries,
                        "transient platform source failure, retrying"
                    );
                }
                result => break result,
            }
        }
    }
}

impl<S: PlatformInfoSource> PlatformInfoSource for RetryingSource<S> {
    fn bridge_count(&self) -> Result<u32, PlatformSourceError> {
        self.query("bridge_count", |s| s.bridge_count())
    }

    fn raw_capacity(
        &self,
        bridge: u32,
        kind: ResourceKind,
    ) -> Result<RawCapacity, PlatformSourceError> {
        self.query("raw_capacity", |s| s.raw_capacity(bridge, kind))
    }

    fn has_extended_address_support(&self) -> Result<bool, PlatformSourceError> {
        self.query("has_extended_address_support", |s| {
            s.has_extended_address_support()
        })
    }

    fn layout(&self) -> Result<PlatformLayout, PlatformSourceError> {
        self.query("layout", |s| s.layout())
    }

    fn bus_count(&self, bridge: u32) -> Result<Option<u16>, PlatformSourceError> {
        self.query("bus_count", |s| s.bus_count(bridge))
    }

    fn segment(&self, bridge: u32) -> Result<u16, PlatformSourceError> {
        self.query("segment", |s| s.segment(bridge))
    }
}

/// The requests of one bridge in a [`StaticPlatformInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticBridge {
    capacities: PerKind<RawCapacity>,
    bus_count: Option<u16>,
    segment: Option<u16>,
}

impl StaticBridge {
    /// A bridge requesting nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `bytes` of `kind`.
    pub fn with_capacity(mut self, kind: ResourceKind, bytes: u64) -> Self {
        self.capacities[kind] = RawCapacity::Bytes(bytes);
        self
    }

    /// Marks `kind` as not offered for this bridge.
    pub fn with_unsupported(mut self, kind: ResourceKind) -> Self {
        self.capacities[kind] = RawCapacity::Unsupported;
        self
    }

    /// Declares the number of bus numbers the bridge needs.
    pub fn with_bus_count(mut self, bus_count: u16) -> Self {
        self.bus_count = Some(bus_count);
        self
    }

    /// Places the bridge in an explicit segment group.
    pub fn with_segment(mut self, segment: u16) -> Self {
        self.segment = Some(segment);
        self
    }
}

/// A [`PlatformInfoSource`] backed by a fixed table.
#[derive(Debug, Clone)]
pub struct StaticPlatformInfo {
    layout: PlatformLayout,
    extended_address_support: bool,
    bridges: Vec<StaticBridge>,
}

impl StaticPlatformInfo {
    /// A platform with `layout` and no bridges.
    pub fn new(layout: PlatformLayout) -> Self {
        Self {
            layout,
            extended_address_support: false,
            bridges: Vec::new(),
        }
    }

    /// Sets whether the platform can address memory above 4GiB.
    pub fn with_extended_address_support(mut self, supported: bool) -> Self {
        self.extended_address_support = supported;
        self
    }

    /// Appends a bridge.
    pub fn with_bridge(mut self, bridge: StaticBridge) -> Self {
        self.bridges.push(bridge);
        self
    }

    fn bridge(&self, bridge: u32, what: &'static str) -> Result<&StaticBridge, PlatformSourceError> {
        self.bridges
            .get(bridge as usize)
            .ok_or(PlatformSourceError::InvalidData { what, bridge })
    }
}

impl PlatformInfoSource for StaticPlatformInfo {
    fn bridge_count(&self) -> Result<u32, PlatformSourceError> {
        u32::try_from(self.bridges.len()).map_err(|_| PlatformSourceError::InvalidData {
            what: "bridge count",
            bridge: u32::MAX,
        })
    }

    fn raw_capacity(
        &self,
        bridge: u32,
        kind: ResourceKind,
    ) -> Result<RawCapacity, PlatformSourceError> {
        Ok(self.bridge(bridge, "capacity")?.capacities[kind])
    }

    fn has_extended_address_support(&self) -> Result<bool, PlatformSourceError> {
        Ok(self.extended_address_support)
    }

    fn layout(&self) -> Result<PlatformLayout, PlatformSourceError> {
        Ok(self.layout.clone())
    }

    fn bus_count(&self, bridge: u32) -> Result<Option<u16>, PlatformSourceError> {
        Ok(self.bridge(bridge, "bus count")?.bus_count)
    }

    fn segment(&self, bridge: u32) -> Result<u16, PlatformSourceError> {
        match self.bridge(bridge, "segment")?.segment {
            Some(segment) => Ok(segment),
            None => u16::try_from(bridge).map_err(|_| PlatformSourceError::InvalidData {
                what: "segment",
                bridge,
            }),
        }
    }
}
