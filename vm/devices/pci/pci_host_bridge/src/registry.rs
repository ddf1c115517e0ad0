// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The validated, immutable set of discovered root bridges.

use crate::descriptor::RootBridgeDescriptor;
use crate::error::InvariantViolation;
use crate::handoff::RootBridgeRecord;
use crate::platform::PlatformLayout;
use crate::resource::ResourceKind;
use std::collections::BTreeSet;

/// The most root bridges a platform can have, one per bus number.
pub const MAX_ROOT_BRIDGES: u32 = 256;

/// The published resource map of every root bridge on the platform.
///
/// A registry can only be constructed from descriptors that together form a
/// consistent map, and it cannot be modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootBridgeRegistry {
    descriptors: Vec<RootBridgeDescriptor>,
}

impl RootBridgeRegistry {
    /// Validates `descriptors` against each other and `layout`.
    ///
    /// Either every descriptor is accepted or none is.
    pub fn new(
        descriptors: Vec<RootBridgeDescriptor>,
        layout: &PlatformLayout,
    ) -> Result<Self, InvariantViolation> {
        if let Err(err) = validate(&descriptors, layout) {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "rejecting root bridge resource map"
            );
            return Err(err);
        }
        Ok(Self { descriptors })
    }

    /// The number of root bridges.
    pub fn count(&self) -> usize {
        self.descriptors.len()
    }

    /// The descriptor at position `index`, in bridge index order.
    pub fn descriptor_at(&self, index: usize) -> Option<&RootBridgeDescriptor> {
        self.descriptors.get(index)
    }

    /// Iterates over the descriptors in bridge index order.
    pub fn iter(&self) -> impl Iterator<Item = &RootBridgeDescriptor> {
        self.descriptors.iter()
    }

    /// Hands the descriptors over to the consumer.
    pub fn into_descriptors(self) -> Vec<RootBridgeDescriptor> {
        self.descriptors
    }

    /// Encodes the registry as a table of fixed-layout records.
    pub fn to_records(&self) -> Vec<RootBridgeRecord> {
        self.descriptors.iter().map(RootBridgeRecord::from).collect()
    }
}

impl<'a> IntoIterator for &'a RootBridgeRegistry {
    type Item = &'a RootBridgeDescriptor;
    type IntoIter = std::slice::Iter<'a, RootBridgeDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}

fn validate(
    descriptors: &[RootBridgeDescriptor],
    layout: &PlatformLayout,
) -> Result<(), InvariantViolation> {
    if descriptors.is_empty() {
        return Err(InvariantViolation::NoRootBridges);
    }
    if descriptors.len() > MAX_ROOT_BRIDGES as usize {
        return Err(InvariantViolation::TooManyRootBridges {
            count: descriptors.len() as u32,
        });
    }

    let mut segments = BTreeSet::new();
    let mut paths = BTreeSet::new();
    for d in descriptors {
        if !segments.insert(d.segment) {
            return Err(InvariantViolation::DuplicateSegment { segment: d.segment });
        }
        if !paths.insert((d.device_path.hid, d.device_path.uid)) {
            return Err(InvariantViolation::DuplicateDevicePath {
                path: d.device_path,
            });
        }
        validate_apertures(d, layout)?;
    }

    // Bus numbers are assigned from one range and apertures from one set of
    // host windows, so no two bridges may overlap even across segments.
    for (i, first) in descriptors.iter().enumerate() {
        for second in &descriptors[i + 1..] {
            let bridge = second.bridge_index;
            if first.bus_range.overlaps(&second.bus_range) {
                return Err(InvariantViolation::BusRangeOverlap {
                    bridge,
                    first: first.bus_range,
                    second: second.bus_range,
                });
            }
            for kind in ResourceKind::ALL {
                if let (Some(a), Some(b)) = (first.aperture(kind), second.aperture(kind)) {
                    if a.range().overlaps(&b.range()) {
                        return Err(InvariantViolation::ApertureOverlap {
                            bridge,
                            kind,
                            first: a.range(),
                            second: b.range(),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

fn validate_apertures(
    d: &RootBridgeDescriptor,
    layout: &PlatformLayout,
) -> Result<(), InvariantViolation> {
    let bridge = d.bridge_index;
    for kind in ResourceKind::ALL {
        let aperture = d.aperture(kind);
        if aperture.is_some() != d.supports().contains(kind.capability()) {
            return Err(InvariantViolation::CapabilityMismatch { bridge, kind });
        }
        let Some(aperture) = aperture else {
            continue;
        };

        let range = aperture.range();
        let in_window = layout
            .window(kind)
            .is_some_and(|window| window.range.contains(&range));
        if !in_window || !layout.address_space(kind).contains(&range) {
            return Err(InvariantViolation::ApertureOutOfRange {
                bridge,
                kind,
                aperture: range,
            });
        }

        let granularity = layout.granularity(kind);
        if !granularity.is_power_of_two() {
            return Err(InvariantViolation::InvalidGranularity { kind, granularity });
        }
        if !range.is_aligned(granularity) {
            return Err(InvariantViolation::ApertureMisaligned {
                bridge,
                kind,
                aperture: range,
                granularity,
            });
        }
    }
    Ok(())
}
