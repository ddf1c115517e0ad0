// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared fixtures for unit tests.

use crate::platform::ApertureWindow;
use crate::platform::PlatformInfoSource;
use crate::platform::PlatformLayout;
use crate::platform::PlatformSourceError;
use crate::platform::RawCapacity;
use crate::platform::StaticBridge;
use crate::platform::StaticPlatformInfo;
use crate::resource::PerKind;
use crate::resource::ResourceKind;
use memory_range::MemoryRange;
use std::cell::Cell;

pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * MB;

/// A small layout with identity-mapped windows starting at zero, separate
/// 64-bit windows above 4GiB, and no 32-bit prefetchable window.
pub fn test_layout() -> PlatformLayout {
    PlatformLayout::empty()
        .with_window(
            ResourceKind::Io,
            ApertureWindow::new(MemoryRange::new(0..0x1_0000)),
        )
        .with_window(
            ResourceKind::Mem32,
            ApertureWindow::new(MemoryRange::new(0..2 * GB)),
        )
        .with_window(
            ResourceKind::Mem64,
            ApertureWindow::new(MemoryRange::new(4 * GB..8 * GB)),
        )
        .with_window(
            ResourceKind::PrefetchMem64,
            ApertureWindow::new(MemoryRange::new(8 * GB..12 * GB)),
        )
}

/// Builds a request table; kinds not listed request nothing.
pub fn requests(list: &[(ResourceKind, u64)]) -> PerKind<RawCapacity> {
    let mut requests = PerKind::<RawCapacity>::default();
    for &(kind, size) in list {
        requests[kind] = RawCapacity::Bytes(size);
    }
    requests
}

/// One bridge asking for a little I/O and 32-bit memory.
pub fn single_bridge_platform() -> StaticPlatformInfo {
    StaticPlatformInfo::new(test_layout()).with_bridge(
        StaticBridge::new()
            .with_capacity(ResourceKind::Io, 0x1000)
            .with_capacity(ResourceKind::Mem32, MB),
    )
}

/// Wraps a source, failing the first `failures` queries with a transient
/// error, or every query as unreachable.
pub struct FlakySource<S> {
    inner: S,
    failures: Cell<u32>,
    unreachable: bool,
    calls: Cell<u32>,
}

impl<S: PlatformInfoSource> FlakySource<S> {
    pub fn new(inner: S, failures: u32) -> Self {
        Self {
            inner,
            failures: Cell::new(failures),
            unreachable: false,
            calls: Cell::new(0),
        }
    }

    pub fn unreachable(inner: S) -> Self {
        Self {
            unreachable: true,
            ..Self::new(inner, 0)
        }
    }

    /// The number of queries made so far, failed or not.
    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    fn check(&self) -> Result<&S, PlatformSourceError> {
        self.calls.set(self.calls.get() + 1);
        if self.unreachable {
            return Err(PlatformSourceError::Unreachable);
        }
        let failures = self.failures.get();
        if failures > 0 {
            self.failures.set(failures - 1);
            return Err(PlatformSourceError::Transient);
        }
        Ok(&self.inner)
    }
}

impl<S: PlatformInfoSource> PlatformInfoSource for FlakySource<S> {
    fn bridge_count(&self) -> Result<u32, PlatformSourceError> {
        self.check()?.bridge_count()
    }

    fn raw_capacity(
        &self,
        bridge: u32,
        kind: ResourceKind,
    ) -> Result<RawCapacity, PlatformSourceError> {
        self.check()?.raw_capacity(bridge, kind)
    }

    fn has_extended_address_support(&self) -> Result<bool, PlatformSourceError> {
        self.check()?.has_extended_address_support()
    }

    fn layout(&self) -> Result<PlatformLayout, PlatformSourceError> {
        self.check()?.layout()
    }

    fn bus_count(&self, bridge: u32) -> Result<Option<u16>, PlatformSourceError> {
        self.check()?.bus_count(bridge)
    }

    fn segment(&self, bridge: u32) -> Result<u16, PlatformSourceError> {
        self.check()?.segment(bridge)
    }
}
