// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembles root bridge descriptors from identities and aperture grants.

use crate::allocator::ApertureGrant;
use crate::capability::Capabilities;
use crate::capability::CapabilitySet;
use crate::capability::RootBridgeCapability;
use crate::descriptor::BusRange;
use crate::descriptor::RootBridgeDescriptor;
use crate::descriptor::RootBridgeDevicePath;
use crate::error::InvariantViolation;
use crate::platform::PlatformLayout;
use crate::resource::ResourceKind;

const MAX_BUS: u16 = 0xff;

/// Who a bridge is, as opposed to what it was granted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RootBridgeIdentity {
    /// The platform's index for the bridge.
    pub bridge_index: u32,
    /// PCI segment group number.
    pub segment: u16,
    /// Declared number of bus numbers the bridge needs.
    pub bus_count: Option<u16>,
    /// Whether this is the last bridge on the platform.
    pub is_last: bool,
}

/// Builds descriptors in bridge index order, handing out contiguous bus
/// ranges starting at the platform's base bus.
pub struct RootBridgeBuilder<'a> {
    layout: &'a PlatformLayout,
    next_bus: u16,
}

impl<'a> RootBridgeBuilder<'a> {
    /// Creates a builder for bridges on the platform described by `layout`.
    pub fn new(layout: &'a PlatformLayout) -> Self {
        Self {
            layout,
            next_bus: layout.base_bus.into(),
        }
    }

    fn assign_buses(
        &mut self,
        identity: &RootBridgeIdentity,
    ) -> Result<BusRange, InvariantViolation> {
        let exhausted = InvariantViolation::BusNumbersExhausted {
            bridge: identity.bridge_index,
        };
        let start = self.next_bus;
        if start > MAX_BUS {
            return Err(exhausted);
        }

        // Without a declared need, a bridge gets its root bus only, except
        // for the last one which takes the rest of the bus number space.
        let count = match identity.bus_count {
            Some(count) => count.max(1),
            None if identity.is_last => MAX_BUS + 1 - start,
            None => 1,
        };
        let end = start
            .checked_add(count - 1)
            .filter(|&end| end <= MAX_BUS)
            .ok_or_else(|| exhausted.clone())?;

        self.next_bus = end + 1;
        BusRange::new(start as u8, end as u8).ok_or(exhausted)
    }

    /// Builds the descriptor for one bridge from what it was actually
    /// granted.
    pub fn build(
        &mut self,
        identity: RootBridgeIdentity,
        grant: ApertureGrant,
    ) -> Result<RootBridgeDescriptor, InvariantViolation> {
        let bus_range = self.assign_buses(&identity)?;
        let layout = self.layout;
        let apertures = grant.apertures;

        let mut supports: CapabilitySet = apertures
            .iter()
            .filter(|(_, aperture)| aperture.is_some())
            .map(|(kind, _)| kind.capability())
            .collect();
        if layout.combine_mem_pmem {
            supports.insert(RootBridgeCapability::CombinedMemPref);
        }
        if apertures[ResourceKind::Mem64].is_some()
            || apertures[ResourceKind::PrefetchMem64].is_some()
        {
            supports.insert(RootBridgeCapability::MixedMemoryDecode);
        }
        if layout.extended_config_space {
            supports.insert(RootBridgeCapability::ExtendedConfigSpace);
        }
        if layout.legacy_io_forwarding && apertures[ResourceKind::Io].is_some() {
            supports.insert(RootBridgeCapability::CombinedIoPortAndAttribute);
        }
        let capabilities = Capabilities::new(supports, layout.attribute_mask);

        let descriptor = RootBridgeDescriptor {
            bridge_index: identity.bridge_index,
            segment: identity.segment,
            capabilities,
            dma_above_4g: layout.dma_above_4g,
            no_extended_config_space: !layout.extended_config_space,
            resource_assigned_by_firmware: layout.resources_fixed,
            bus_range,
            io: apertures[ResourceKind::Io],
            mem32: apertures[ResourceKind::Mem32],
            mem64: apertures[ResourceKind::Mem64],
            prefetch_mem32: apertures[ResourceKind::PrefetchMem32],
            prefetch_mem64: apertures[ResourceKind::PrefetchMem64],
            device_path: RootBridgeDevicePath::pci_root(identity.bridge_index),
            diagnostics: grant.diagnostics,
        };

        tracing::info!(
            bridge = descriptor.bridge_index,
            segment = descriptor.segment,
            buses = %descriptor.bus_range,
            path = %descriptor.device_path,
            supports = ?descriptor.supports(),
            shortfalls = descriptor.diagnostics.len(),
            "built root bridge"
        );

        Ok(descriptor)
    }
}
