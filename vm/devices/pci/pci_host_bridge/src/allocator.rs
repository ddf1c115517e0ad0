// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Carves per-bridge apertures out of the platform windows.
//!
//! Each resource kind has one cursor that starts at the bottom of its window
//! and only moves up, so apertures handed out to successive bridges never
//! overlap. Requests that cannot be given their own kind of aperture (64-bit
//! requests without 64-bit decode, prefetchable requests without a
//! prefetchable window) are placed into the aperture of a compatible kind.

use crate::descriptor::Aperture;
use crate::error::DiscoveryDiagnostic;
use crate::error::InvariantViolation;
use crate::platform::PlatformLayout;
use crate::platform::RawCapacity;
use crate::resource::PerKind;
use crate::resource::ResourceKind;
use memory_range::MemoryRange;
use memory_range::align_up;

/// The apertures granted to one bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApertureGrant {
    /// The aperture for each kind, if one was granted.
    pub apertures: PerKind<Option<Aperture>>,
    /// Shortfalls encountered while allocating.
    pub diagnostics: Vec<DiscoveryDiagnostic>,
}

#[derive(Debug, Copy, Clone)]
struct Window {
    range: MemoryRange,
    translation_offset: u64,
}

/// The requests that end up in one kind of aperture.
#[derive(Debug, Default)]
struct Placement {
    primary: u64,
    folded: Vec<(ResourceKind, u64)>,
}

/// Allocates apertures for bridges in ascending index order.
#[derive(Debug)]
pub struct ApertureAllocator {
    windows: PerKind<Option<Window>>,
    granularity: PerKind<u64>,
    cursors: PerKind<u64>,
    decode_above_4g: bool,
    combine_mem_pmem: bool,
}

impl ApertureAllocator {
    /// Creates an allocator over the windows in `layout`.
    ///
    /// 64-bit apertures are only handed out when `decode_above_4g` is set;
    /// otherwise 64-bit requests are placed below 4GiB.
    pub fn new(layout: &PlatformLayout, decode_above_4g: bool) -> Result<Self, InvariantViolation> {
        let granularity = PerKind::from_fn(|kind| layout.granularity(kind));
        for (kind, &granularity) in granularity.iter() {
            if !granularity.is_power_of_two() {
                return Err(InvariantViolation::InvalidGranularity { kind, granularity });
            }
        }

        let windows = PerKind::try_from_fn(|kind| {
            let Some(window) = layout.window(kind) else {
                return Ok(None);
            };
            if !layout.address_space(kind).contains(&window.range) {
                return Err(InvariantViolation::InvalidWindow {
                    kind,
                    window: window.range,
                });
            }
            let range = window.range.aligned_subrange(granularity[kind]);
            if range.is_empty() {
                tracing::warn!(%kind, window = %window.range, "platform window too small to use");
                return Ok(None);
            }
            Ok(Some(Window {
                range,
                translation_offset: window.translation_offset,
            }))
        })?;

        let cursors = PerKind::from_fn(|kind| windows[kind].map_or(0, |w| w.range.start()));

        Ok(Self {
            windows,
            granularity,
            cursors,
            decode_above_4g,
            combine_mem_pmem: layout.combine_mem_pmem,
        })
    }

    /// The kind of aperture a request of `kind` is placed into, or `None` if
    /// no compatible window exists.
    fn target(&self, kind: ResourceKind) -> Option<ResourceKind> {
        let has = |kind: ResourceKind| self.windows[kind].is_some();
        match kind {
            ResourceKind::Io => has(kind).then_some(kind),
            ResourceKind::Mem32 => has(kind).then_some(kind),
            ResourceKind::PrefetchMem32 => {
                if !self.combine_mem_pmem && has(kind) {
                    Some(kind)
                } else {
                    self.target(ResourceKind::Mem32)
                }
            }
            ResourceKind::Mem64 => {
                if self.decode_above_4g && has(kind) {
                    Some(kind)
                } else {
                    self.target(ResourceKind::Mem32)
                }
            }
            ResourceKind::PrefetchMem64 => {
                if !self.decode_above_4g {
                    self.target(ResourceKind::PrefetchMem32)
                } else if !self.combine_mem_pmem && has(kind) {
                    Some(kind)
                } else {
                    self.target(ResourceKind::Mem64)
                }
            }
        }
    }

    fn rounded(&self, kind: ResourceKind, size: u64) -> u64 {
        align_up(size, self.granularity[kind]).unwrap_or(u64::MAX)
    }

    /// Whether `size` bytes would fit at the current cursor for `kind`.
    fn fits(&self, kind: ResourceKind, size: u64) -> bool {
        let Some(window) = self.windows[kind] else {
            return false;
        };
        self.cursors[kind]
            .checked_add(self.rounded(kind, size))
            .is_some_and(|end| end <= window.range.end())
    }

    /// Carves `size` bytes, rounded up to the kind's granularity, from the
    /// window for `kind`. Leaves the cursor untouched on failure.
    fn carve(&mut self, kind: ResourceKind, size: u64) -> Result<Aperture, u64> {
        let rounded = self.rounded(kind, size);
        let window = self.windows[kind].ok_or(rounded)?;
        let start = self.cursors[kind];
        let end = start.checked_add(rounded).ok_or(rounded)?;
        if end > window.range.end() {
            return Err(rounded);
        }
        let range = MemoryRange::new(start..end);
        let aperture = Aperture::new(range, window.translation_offset).ok_or(rounded)?;
        self.cursors[kind] = end;
        Ok(aperture)
    }

    /// Allocates the apertures for `bridge`.
    ///
    /// Bridges must be allocated in ascending index order for the result to
    /// be reproducible.
    pub fn allocate(&mut self, bridge: u32, requests: &PerKind<RawCapacity>) -> ApertureGrant {
        let mut grant = ApertureGrant::default();
        let mut placements: PerKind<Placement> = PerKind::default();

        for (kind, &request) in requests.iter() {
            let size = match request {
                RawCapacity::Unsupported => {
                    tracing::debug!(bridge, %kind, "capability not offered by platform");
                    grant
                        .diagnostics
                        .push(DiscoveryDiagnostic::UnsupportedCapability { bridge, kind });
                    continue;
                }
                RawCapacity::Bytes(0) => continue,
                RawCapacity::Bytes(size) => size,
            };

            match self.target(kind) {
                Some(target) if target == kind => {
                    let placement = &mut placements[target];
                    placement.primary = placement.primary.saturating_add(size);
                }
                Some(target) => {
                    tracing::debug!(bridge, %kind, %target, size, "placing request in another aperture");
                    placements[target].folded.push((kind, size));
                }
                None => {
                    tracing::warn!(bridge, %kind, size, "no platform window for request");
                    grant
                        .diagnostics
                        .push(DiscoveryDiagnostic::UnsupportedCapability { bridge, kind });
                }
            }
        }

        for kind in ResourceKind::ALL {
            let placement = &placements[kind];
            if placement.primary == 0 && placement.folded.is_empty() {
                continue;
            }

            // The kind's own request is placed first, then each folded
            // request in priority order while the running total still fits.
            let mut total = 0;
            if placement.primary != 0 {
                if self.fits(kind, placement.primary) {
                    total = placement.primary;
                } else {
                    let requested = self.rounded(kind, placement.primary);
                    if kind.is_mandatory() {
                        tracing::error!(bridge, %kind, requested, "mandatory aperture exhausted");
                    } else {
                        tracing::warn!(bridge, %kind, requested, "aperture exhausted");
                    }
                    grant.diagnostics.push(DiscoveryDiagnostic::ApertureExhausted {
                        bridge,
                        kind,
                        requested,
                    });
                }
            }
            for &(requested_kind, size) in &placement.folded {
                match total.checked_add(size) {
                    Some(combined) if self.fits(kind, combined) => total = combined,
                    _ => {
                        tracing::warn!(
                            bridge,
                            %requested_kind,
                            target_kind = %kind,
                            size,
                            "request does not fit in fallback aperture"
                        );
                        grant.diagnostics.push(DiscoveryDiagnostic::FallbackUnsatisfied {
                            bridge,
                            requested_kind,
                            target_kind: kind,
                            size,
                        });
                    }
                }
            }

            // Cannot fail once `fits` holds for `total`.
            let aperture = if total != 0 {
                self.carve(kind, total).ok()
            } else {
                None
            };
            if let Some(aperture) = &aperture {
                tracing::debug!(bridge, %kind, range = %aperture.range(), "granted aperture");
            }
            grant.apertures[kind] = aperture;
        }

        grant
    }
}
