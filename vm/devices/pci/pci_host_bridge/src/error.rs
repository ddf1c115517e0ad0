// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Discovery errors and diagnostics.

use crate::descriptor::BusRange;
use crate::descriptor::RootBridgeDevicePath;
use crate::platform::PlatformSourceError;
use crate::resource::ResourceKind;
use memory_range::MemoryRange;
use thiserror::Error;

/// A fatal discovery failure. No registry is produced.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The platform info source could not answer a query.
    #[error("platform info source unavailable")]
    PlatformSourceUnavailable(#[from] PlatformSourceError),
    /// The resulting resource map would be malformed.
    #[error("root bridge resource map is inconsistent")]
    InvariantViolation(#[from] InvariantViolation),
    /// Discovery has already completed for this boot.
    #[error("root bridges have already been discovered")]
    AlreadyDiscovered,
}

/// A platform configuration that cannot be expressed as a valid resource map.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The platform reported zero root bridges.
    #[error("platform reported no root bridges")]
    NoRootBridges,
    /// The platform reported more root bridges than there are bus numbers.
    #[error("platform reported {count} root bridges, more than the bus number space")]
    TooManyRootBridges {
        /// The reported count.
        count: u32,
    },
    /// Bus numbers ran out while assigning bus ranges.
    #[error("bus numbers exhausted at root bridge {bridge}")]
    BusNumbersExhausted {
        /// The bridge index that could not be given a bus range.
        bridge: u32,
    },
    /// A platform window lies outside the address space for its kind.
    #[error("{kind} window {window} is outside the {kind} address space")]
    InvalidWindow {
        /// The window's resource kind.
        kind: ResourceKind,
        /// The offending window.
        window: MemoryRange,
    },
    /// An allocation granularity is not a power of two.
    #[error("{kind} allocation granularity {granularity:#x} is not a power of two")]
    InvalidGranularity {
        /// The resource kind the granularity applies to.
        kind: ResourceKind,
        /// The offending granularity.
        granularity: u64,
    },
    /// Two descriptors share a segment number.
    #[error("segment {segment} is used by more than one root bridge")]
    DuplicateSegment {
        /// The shared segment.
        segment: u16,
    },
    /// Two descriptors share a device path.
    #[error("device path {path} is used by more than one root bridge")]
    DuplicateDevicePath {
        /// The shared device path.
        path: RootBridgeDevicePath,
    },
    /// Two bridges were given overlapping bus ranges.
    #[error("root bridge {bridge} bus range {second} overlaps {first}")]
    BusRangeOverlap {
        /// The later of the two bridges.
        bridge: u32,
        /// The earlier bridge's range.
        first: BusRange,
        /// The later bridge's range.
        second: BusRange,
    },
    /// Two bridges were given overlapping apertures of the same kind.
    #[error("root bridge {bridge} {kind} aperture {second} overlaps {first}")]
    ApertureOverlap {
        /// The later of the two bridges.
        bridge: u32,
        /// The resource kind of both apertures.
        kind: ResourceKind,
        /// The earlier bridge's aperture.
        first: MemoryRange,
        /// The later bridge's aperture.
        second: MemoryRange,
    },
    /// An aperture lies outside its platform window or address space.
    #[error("root bridge {bridge} {kind} aperture {aperture} is out of range")]
    ApertureOutOfRange {
        /// The bridge index.
        bridge: u32,
        /// The aperture's resource kind.
        kind: ResourceKind,
        /// The offending aperture.
        aperture: MemoryRange,
    },
    /// An aperture is not aligned to its kind's granularity.
    #[error("root bridge {bridge} {kind} aperture {aperture} is not {granularity:#x} aligned")]
    ApertureMisaligned {
        /// The bridge index.
        bridge: u32,
        /// The aperture's resource kind.
        kind: ResourceKind,
        /// The offending aperture.
        aperture: MemoryRange,
        /// The required alignment.
        granularity: u64,
    },
    /// An aperture's presence disagrees with the supported capabilities.
    #[error("root bridge {bridge} {kind} aperture does not match its supported capabilities")]
    CapabilityMismatch {
        /// The bridge index.
        bridge: u32,
        /// The resource kind in question.
        kind: ResourceKind,
    },
}

/// A local shortfall recorded while allocating a bridge's apertures.
///
/// These do not stop discovery; the affected aperture is left absent and its
/// capability flag cleared.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryDiagnostic {
    /// The platform window for `kind` had too little space left.
    #[error("root bridge {bridge} {kind} aperture exhausted ({requested:#x} bytes requested)")]
    ApertureExhausted {
        /// The bridge index.
        bridge: u32,
        /// The exhausted resource kind.
        kind: ResourceKind,
        /// The rounded size that did not fit.
        requested: u64,
    },
    /// The platform does not offer `kind` for this bridge.
    #[error("root bridge {bridge} {kind} apertures are not supported by the platform")]
    UnsupportedCapability {
        /// The bridge index.
        bridge: u32,
        /// The unsupported resource kind.
        kind: ResourceKind,
    },
    /// A request placed into another kind's aperture did not fit there.
    #[error(
        "root bridge {bridge} {requested_kind} request of {size:#x} bytes does not fit in {target_kind} space"
    )]
    FallbackUnsatisfied {
        /// The bridge index.
        bridge: u32,
        /// The kind originally requested.
        requested_kind: ResourceKind,
        /// The kind the request was placed into.
        target_kind: ResourceKind,
        /// The requested size.
        size: u64,
    },
}
