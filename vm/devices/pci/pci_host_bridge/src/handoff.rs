// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fixed-layout records for handing the registry to a consumer as plain
//! bytes.

use crate::descriptor::Aperture;
use crate::descriptor::RootBridgeDescriptor;
use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Per-bridge flags.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct RecordFlags {
    /// Devices may DMA above 4GiB without an IOMMU.
    pub dma_above_4g: bool,
    /// Only the first 256 bytes of config space are accessible.
    pub no_extended_config_space: bool,
    /// The apertures must not be reassigned.
    pub resource_assigned_by_firmware: bool,
    #[bits(29)]
    _reserved: u32,
}

/// One aperture. An absent aperture has `base > limit`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ApertureRecord {
    /// The first host address.
    pub base: u64,
    /// The last host address, inclusive.
    pub limit: u64,
    /// Offset added to a host address to produce the PCI bus address.
    pub translation: u64,
}

impl ApertureRecord {
    /// The encoding of a missing aperture.
    pub const ABSENT: Self = Self {
        base: u64::MAX,
        limit: 0,
        translation: 0,
    };

    /// Whether the record describes an aperture.
    pub const fn is_present(&self) -> bool {
        self.base <= self.limit
    }
}

impl From<Option<&Aperture>> for ApertureRecord {
    fn from(aperture: Option<&Aperture>) -> Self {
        match aperture {
            Some(aperture) => Self {
                base: aperture.base(),
                limit: aperture.limit(),
                translation: aperture.translation_offset(),
            },
            None => Self::ABSENT,
        }
    }
}

/// The hand-off encoding of a [`RootBridgeDescriptor`].
///
/// Diagnostics are not carried; they are reported through tracing during
/// discovery.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RootBridgeRecord {
    /// PCI segment group number.
    pub segment: u16,
    /// The root bus number.
    pub bus_start: u8,
    /// The highest subordinate bus number.
    pub bus_end: u8,
    /// Supported capabilities, one bit per capability in declaration order.
    pub supports: u16,
    /// Enabled capabilities, encoded like `supports`.
    pub attributes: u16,
    /// Per-bridge flags.
    pub flags: RecordFlags,
    /// Compressed EISA hardware ID of the device path.
    pub device_path_hid: u32,
    /// Unique ID of the device path.
    pub device_path_uid: u32,
    /// The platform's index for the bridge.
    pub bridge_index: u32,
    /// I/O port aperture.
    pub io: ApertureRecord,
    /// Non-prefetchable memory below 4GiB.
    pub mem32: ApertureRecord,
    /// Non-prefetchable memory above 4GiB.
    pub mem64: ApertureRecord,
    /// Prefetchable memory below 4GiB.
    pub prefetch_mem32: ApertureRecord,
    /// Prefetchable memory above 4GiB.
    pub prefetch_mem64: ApertureRecord,
}

impl From<&RootBridgeDescriptor> for RootBridgeRecord {
    fn from(d: &RootBridgeDescriptor) -> Self {
        Self {
            segment: d.segment,
            bus_start: d.bus_range.start(),
            bus_end: d.bus_range.end(),
            supports: d.supports().bits(),
            attributes: d.attributes().bits(),
            flags: RecordFlags::new()
                .with_dma_above_4g(d.dma_above_4g)
                .with_no_extended_config_space(d.no_extended_config_space)
                .with_resource_assigned_by_firmware(d.resource_assigned_by_firmware),
            device_path_hid: d.device_path.hid,
            device_path_uid: d.device_path.uid,
            bridge_index: d.bridge_index,
            io: d.io.as_ref().into(),
            mem32: d.mem32.as_ref().into(),
            mem64: d.mem64.as_ref().into(),
            prefetch_mem32: d.prefetch_mem32.as_ref().into(),
            prefetch_mem64: d.prefetch_mem64.as_ref().into(),
        }
    }
}
