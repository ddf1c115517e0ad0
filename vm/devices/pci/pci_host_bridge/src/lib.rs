// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI root bridge discovery.
//!
//! Early in boot, firmware queries the platform for how many PCI host
//! bridges exist and how much I/O and memory address space each one asks
//! for, carves non-overlapping apertures for them out of the platform's
//! address windows, and publishes the result as an immutable
//! [`RootBridgeRegistry`] for the PCI bus driver to enumerate from.
//!
//! Running out of space for one bridge's aperture is not fatal: the aperture
//! is left out of that bridge's descriptor, its capability flag is cleared,
//! and a [`DiscoveryDiagnostic`] is recorded. A platform configuration that
//! would yield a malformed resource map fails discovery outright.

#![forbid(unsafe_code)]

mod allocator;
mod builder;
mod capability;
mod descriptor;
mod error;
mod handoff;
mod options;
mod platform;
#[cfg(test)]
mod proptests;
mod registry;
mod resource;
#[cfg(test)]
mod test_helpers;

pub use allocator::ApertureAllocator;
pub use allocator::ApertureGrant;
pub use builder::RootBridgeBuilder;
pub use builder::RootBridgeIdentity;
pub use capability::Capabilities;
pub use capability::CapabilitySet;
pub use capability::RootBridgeCapability;
pub use descriptor::Aperture;
pub use descriptor::BusRange;
pub use descriptor::PNP0A03_HID;
pub use descriptor::RootBridgeDescriptor;
pub use descriptor::RootBridgeDevicePath;
pub use error::DiscoveryDiagnostic;
pub use error::DiscoveryError;
pub use error::InvariantViolation;
pub use handoff::ApertureRecord;
pub use handoff::RecordFlags;
pub use handoff::RootBridgeRecord;
pub use options::BootOptions;
pub use platform::ApertureWindow;
pub use platform::DEFAULT_IO_GRANULARITY;
pub use platform::DEFAULT_MEM_GRANULARITY;
pub use platform::DEFAULT_SOURCE_RETRIES;
pub use platform::PlatformInfoSource;
pub use platform::PlatformLayout;
pub use platform::PlatformSourceError;
pub use platform::RawCapacity;
pub use platform::RetryingSource;
pub use platform::StaticBridge;
pub use platform::StaticPlatformInfo;
pub use registry::MAX_ROOT_BRIDGES;
pub use registry::RootBridgeRegistry;
pub use resource::PerKind;
pub use resource::ResourceKind;

/// Discovers every root bridge `source` describes.
pub fn discover_root_bridges(
    source: &dyn PlatformInfoSource,
) -> Result<RootBridgeRegistry, DiscoveryError> {
    discover(source, None)
}

/// Discovers every root bridge `source` describes, with the layout
/// overrides and retry budget in `options`.
pub fn discover_root_bridges_with_options(
    source: &dyn PlatformInfoSource,
    options: &BootOptions,
) -> Result<RootBridgeRegistry, DiscoveryError> {
    if options.source_retries > 0 {
        discover(
            &RetryingSource::new(source, options.source_retries),
            Some(options),
        )
    } else {
        discover(source, Some(options))
    }
}

fn discover(
    source: &dyn PlatformInfoSource,
    options: Option<&BootOptions>,
) -> Result<RootBridgeRegistry, DiscoveryError> {
    let result = try_discover(source, options);
    if let Err(err) = &result {
        tracing::error!(
            error = err as &dyn std::error::Error,
            "root bridge discovery failed"
        );
    }
    result
}

fn try_discover(
    source: &dyn PlatformInfoSource,
    options: Option<&BootOptions>,
) -> Result<RootBridgeRegistry, DiscoveryError> {
    let count = source.bridge_count()?;
    if count == 0 {
        return Err(InvariantViolation::NoRootBridges.into());
    }
    if count > MAX_ROOT_BRIDGES {
        return Err(InvariantViolation::TooManyRootBridges { count }.into());
    }

    let extended_address_support = source.has_extended_address_support()?;
    let mut layout = source.layout()?;
    if let Some(options) = options {
        options.apply(&mut layout);
    }
    let decode_above_4g = extended_address_support && layout.above_4g_decode;
    tracing::debug!(
        count,
        extended_address_support,
        decode_above_4g,
        combine_mem_pmem = layout.combine_mem_pmem,
        "discovering root bridges"
    );

    let mut allocator = ApertureAllocator::new(&layout, decode_above_4g)?;
    let mut builder = RootBridgeBuilder::new(&layout);
    let mut descriptors = Vec::with_capacity(count as usize);
    for bridge in 0..count {
        let requests = PerKind::try_from_fn(|kind| source.raw_capacity(bridge, kind))?;
        let identity = RootBridgeIdentity {
            bridge_index: bridge,
            segment: source.segment(bridge)?,
            bus_count: source.bus_count(bridge)?,
            is_last: bridge + 1 == count,
        };
        let grant = allocator.allocate(bridge, &requests);
        descriptors.push(builder.build(identity, grant)?);
    }

    let registry = RootBridgeRegistry::new(descriptors, &layout)?;
    tracing::info!(
        count = registry.count(),
        shortfalls = registry.iter().map(|d| d.diagnostics.len()).sum::<usize>(),
        "root bridges discovered"
    );
    Ok(registry)
}

/// Root bridge discovery for one boot.
///
/// Discovery succeeds at most once. After that the registry is fixed until
/// it is handed off with [`RootBridgeDiscovery::into_registry`].
#[derive(Debug)]
pub struct RootBridgeDiscovery {
    registry: Option<RootBridgeRegistry>,
}

impl RootBridgeDiscovery {
    /// Returns a discovery that has not run yet.
    pub fn new() -> Self {
        Self { registry: None }
    }

    /// Runs discovery against `source`.
    ///
    /// A failed discovery leaves the state unchanged and may be retried.
    pub fn discover(
        &mut self,
        source: &dyn PlatformInfoSource,
    ) -> Result<&RootBridgeRegistry, DiscoveryError> {
        self.discover_with(|| discover_root_bridges(source))
    }

    /// Runs discovery against `source` with boot command line `options`.
    pub fn discover_with_options(
        &mut self,
        source: &dyn PlatformInfoSource,
        options: &BootOptions,
    ) -> Result<&RootBridgeRegistry, DiscoveryError> {
        self.discover_with(|| discover_root_bridges_with_options(source, options))
    }

    fn discover_with(
        &mut self,
        f: impl FnOnce() -> Result<RootBridgeRegistry, DiscoveryError>,
    ) -> Result<&RootBridgeRegistry, DiscoveryError> {
        if self.registry.is_some() {
            return Err(DiscoveryError::AlreadyDiscovered);
        }
        Ok(self.registry.insert(f()?))
    }

    /// Whether discovery has completed.
    pub fn is_discovered(&self) -> bool {
        self.registry.is_some()
    }

    /// The discovered registry, if discovery has completed.
    pub fn registry(&self) -> Option<&RootBridgeRegistry> {
        self.registry.as_ref()
    }

    /// Hands off the discovered registry.
    pub fn into_registry(self) -> Option<RootBridgeRegistry> {
        self.registry
    }
}

impl Default for RootBridgeDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FlakySource;
    use crate::test_helpers::MB;
    use crate::test_helpers::single_bridge_platform;
    use crate::test_helpers::test_layout;
    use memory_range::MemoryRange;
    use test_with_tracing::test;
    use zerocopy::IntoBytes;

    fn mem_range(aperture: Option<&Aperture>) -> Option<(u64, u64)> {
        aperture.map(|a| (a.base(), a.limit()))
    }

    #[test]
    fn test_single_bridge() {
        let registry = discover_root_bridges(&single_bridge_platform()).unwrap();
        assert_eq!(registry.count(), 1);

        let d = registry.descriptor_at(0).unwrap();
        assert_eq!(mem_range(d.io.as_ref()), Some((0, 0xfff)));
        assert_eq!(mem_range(d.mem32.as_ref()), Some((0, 0xf_ffff)));
        assert!(d.mem64.is_none());
        assert!(!d.supports().contains(RootBridgeCapability::Mem64));
        assert!(d.supports().contains(RootBridgeCapability::IoPorts));
        assert!(d.supports().contains(RootBridgeCapability::Mem32));
        assert!(d.diagnostics.is_empty());
        assert_eq!(d.bus_range, BusRange::new(0, 0xff).unwrap());
    }

    #[test]
    fn test_second_bridge_exhausts_window() {
        let layout = test_layout().with_window(
            ResourceKind::Mem32,
            ApertureWindow::new(MemoryRange::new(0..MB + MB / 2)),
        );
        let source = StaticPlatformInfo::new(layout)
            .with_bridge(StaticBridge::new().with_capacity(ResourceKind::Mem32, MB))
            .with_bridge(StaticBridge::new().with_capacity(ResourceKind::Mem32, MB));
        let registry = discover_root_bridges(&source).unwrap();
        assert_eq!(registry.count(), 2);

        let first = registry.descriptor_at(0).unwrap();
        assert_eq!(mem_range(first.mem32.as_ref()), Some((0, MB - 1)));
        assert!(first.supports().contains(RootBridgeCapability::Mem32));

        let second = registry.descriptor_at(1).unwrap();
        assert!(second.mem32.is_none());
        assert!(!second.supports().contains(RootBridgeCapability::Mem32));
        assert!(second.is_exhausted(ResourceKind::Mem32));
        assert_eq!(
            second.diagnostics,
            [DiscoveryDiagnostic::ApertureExhausted {
                bridge: 1,
                kind: ResourceKind::Mem32,
                requested: MB,
            }]
        );
    }

    #[test]
    fn test_no_extended_address_support() {
        let mut layout = test_layout();
        layout.above_4g_decode = true;
        let source = StaticPlatformInfo::new(layout)
            .with_extended_address_support(false)
            .with_bridge(
                StaticBridge::new()
                    .with_capacity(ResourceKind::Mem32, MB)
                    .with_capacity(ResourceKind::Mem64, 64 * MB),
            );
        let registry = discover_root_bridges(&source).unwrap();
        let d = registry.descriptor_at(0).unwrap();
        assert!(d.mem64.is_none());
        assert!(!d.supports().contains(RootBridgeCapability::Mem64));
        assert!(!d.supports().contains(RootBridgeCapability::MixedMemoryDecode));
        // The 64-bit request was placed below 4GiB instead.
        assert_eq!(d.mem32.unwrap().range().len(), 65 * MB);
    }

    #[test]
    fn test_extended_address_support() {
        let mut layout = test_layout();
        layout.above_4g_decode = true;
        let source = StaticPlatformInfo::new(layout)
            .with_extended_address_support(true)
            .with_bridge(StaticBridge::new().with_capacity(ResourceKind::Mem64, 64 * MB));
        let registry = discover_root_bridges(&source).unwrap();
        let d = registry.descriptor_at(0).unwrap();
        assert!(d.mem64.unwrap().base() >= 1 << 32);
        assert!(d.supports().contains(RootBridgeCapability::Mem64));
        assert!(d.supports().contains(RootBridgeCapability::MixedMemoryDecode));
    }

    #[test]
    fn test_zero_capacity_is_absent() {
        let source = StaticPlatformInfo::new(test_layout())
            .with_bridge(
                StaticBridge::new()
                    .with_capacity(ResourceKind::Io, 0x1000)
                    .with_capacity(ResourceKind::PrefetchMem64, 0),
            )
            .with_bridge(StaticBridge::new().with_capacity(ResourceKind::Mem32, 0));
        let registry = discover_root_bridges(&source).unwrap();
        for d in &registry {
            assert!(d.prefetch_mem64.is_none());
            assert!(d.mem32.is_none());
            assert!(d.apertures().all(|(_, a)| !a.range().is_empty()));
            assert!(d.diagnostics.is_empty());
        }
    }

    #[test]
    fn test_discovery_is_deterministic() {
        let source = StaticPlatformInfo::new(PlatformLayout::virtual_q35())
            .with_extended_address_support(true)
            .with_bridge(
                StaticBridge::new()
                    .with_capacity(ResourceKind::Io, 0x1000)
                    .with_capacity(ResourceKind::Mem32, 16 * MB)
                    .with_capacity(ResourceKind::PrefetchMem64, 256 * MB)
                    .with_bus_count(8),
            )
            .with_bridge(
                StaticBridge::new()
                    .with_capacity(ResourceKind::Io, 0x2000)
                    .with_capacity(ResourceKind::Mem64, 4 * MB),
            );
        let first = discover_root_bridges(&source).unwrap();
        let second = discover_root_bridges(&source).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.to_records().as_bytes(),
            second.to_records().as_bytes()
        );
    }

    #[test]
    fn test_no_bridges() {
        let source = StaticPlatformInfo::new(test_layout());
        assert!(matches!(
            discover_root_bridges(&source),
            Err(DiscoveryError::InvariantViolation(
                InvariantViolation::NoRootBridges
            ))
        ));
    }

    #[test]
    fn test_source_unavailable() {
        let source = FlakySource::unreachable(single_bridge_platform());
        assert!(matches!(
            discover_root_bridges(&source),
            Err(DiscoveryError::PlatformSourceUnavailable(
                PlatformSourceError::Unreachable
            ))
        ));
    }

    #[test]
    fn test_duplicate_segment_aborts() {
        let source = StaticPlatformInfo::new(test_layout())
            .with_bridge(StaticBridge::new().with_capacity(ResourceKind::Mem32, MB))
            .with_bridge(
                StaticBridge::new()
                    .with_capacity(ResourceKind::Mem32, MB)
                    .with_segment(0),
            );
        assert!(matches!(
            discover_root_bridges(&source),
            Err(DiscoveryError::InvariantViolation(
                InvariantViolation::DuplicateSegment { segment: 0 }
            ))
        ));
    }

    #[test]
    fn test_bus_count_overflows_bus_space() {
        let mut layout = test_layout();
        layout.base_bus = 1;
        let source = StaticPlatformInfo::new(layout).with_bridge(
            StaticBridge::new()
                .with_capacity(ResourceKind::Io, 0x1000)
                .with_bus_count(u16::MAX),
        );
        assert!(matches!(
            discover_root_bridges(&source),
            Err(DiscoveryError::InvariantViolation(
                InvariantViolation::BusNumbersExhausted { bridge: 0 }
            ))
        ));
    }

    #[test]
    fn test_options_retry_transient_failures() {
        let source = FlakySource::new(single_bridge_platform(), 2);
        assert!(matches!(
            discover_root_bridges(&source),
            Err(DiscoveryError::PlatformSourceUnavailable(
                PlatformSourceError::Transient
            ))
        ));

        let source = FlakySource::new(single_bridge_platform(), 2);
        let registry = discover_root_bridges_with_options(&source, &BootOptions::new()).unwrap();
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_options_override_layout() {
        let mut layout = test_layout();
        layout.above_4g_decode = true;
        let source = StaticPlatformInfo::new(layout)
            .with_extended_address_support(true)
            .with_bridge(StaticBridge::new().with_capacity(ResourceKind::Mem64, MB));

        let mut options = BootOptions::new();
        options.parse("PCI_HOST_BRIDGE_ABOVE_4G_DECODE=0 PCI_HOST_BRIDGE_FIXED_RESOURCES=1");
        let registry = discover_root_bridges_with_options(&source, &options).unwrap();
        let d = registry.descriptor_at(0).unwrap();
        assert!(d.mem64.is_none());
        assert!(d.mem32.is_some());
        assert!(d.resource_assigned_by_firmware);
    }

    #[test]
    fn test_discovery_runs_once() {
        let source = single_bridge_platform();
        let mut discovery = RootBridgeDiscovery::new();
        assert!(!discovery.is_discovered());
        assert!(discovery.registry().is_none());

        // A failed attempt does not advance the state.
        assert!(
            discovery
                .discover(&FlakySource::unreachable(single_bridge_platform()))
                .is_err()
        );
        assert!(!discovery.is_discovered());

        assert_eq!(discovery.discover(&source).unwrap().count(), 1);
        assert!(discovery.is_discovered());
        assert!(matches!(
            discovery.discover(&source),
            Err(DiscoveryError::AlreadyDiscovered)
        ));
        assert_eq!(discovery.into_registry().unwrap().count(), 1);
    }
}
