// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The [`MemoryRange`] type, which represents a half-open range of addresses
//! in a guest-visible address space (memory or port I/O).

#![cfg_attr(not(test), no_std)]

use core::fmt;
use core::ops::Range;
use thiserror::Error;

/// A range of addresses `start..end`.
///
/// The range is half open. An empty range has `start == end`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MemoryRange {
    start: u64,
    end: u64,
}

/// Error returned by [`MemoryRange::try_new`].
#[derive(Debug, Error)]
#[error("invalid memory range {start:#x}..{end:#x}")]
pub struct InvalidMemoryRange {
    start: u64,
    end: u64,
}

impl fmt::Debug for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<MemoryRange> for Range<u64> {
    fn from(range: MemoryRange) -> Self {
        range.start..range.end
    }
}

impl TryFrom<Range<u64>> for MemoryRange {
    type Error = InvalidMemoryRange;

    fn try_from(range: Range<u64>) -> Result<Self, Self::Error> {
        Self::try_new(range)
    }
}

impl MemoryRange {
    /// The empty range, starting at address 0.
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    /// Returns a new range for the given addresses.
    ///
    /// Panics if `range.start > range.end`.
    #[track_caller]
    pub const fn new(range: Range<u64>) -> Self {
        assert!(range.start <= range.end);
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// Returns a new range for the given addresses, or an error if
    /// `range.start > range.end`.
    pub const fn try_new(range: Range<u64>) -> Result<Self, InvalidMemoryRange> {
        if range.start > range.end {
            return Err(InvalidMemoryRange {
                start: range.start,
                end: range.end,
            });
        }
        Ok(Self {
            start: range.start,
            end: range.end,
        })
    }

    /// Returns a range of `len` bytes starting at `start`, or `None` if the
    /// end would overflow the address space.
    pub const fn from_base_len(start: u64, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    /// The first address in the range.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// The address just past the end of the range.
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// The last address in the range, or `None` for an empty range.
    pub const fn last(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }

    /// The length of the range in bytes.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the range is empty.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `addr` is within the range.
    pub const fn contains_addr(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Whether `other` is entirely within this range.
    ///
    /// An empty `other` is contained if its start lies within `self` or at
    /// its end.
    pub const fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether this range and `other` share at least one address.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether both the start and the length of the range are multiples of
    /// `alignment`, which must be a power of two.
    pub const fn is_aligned(&self, alignment: u64) -> bool {
        debug_assert!(alignment.is_power_of_two());
        self.start & (alignment - 1) == 0 && self.len() & (alignment - 1) == 0
    }

    /// Returns the largest subrange whose start and end are aligned to
    /// `alignment`, which must be a power of two.
    ///
    /// Returns an empty range at the aligned start if no aligned subrange
    /// exists.
    pub fn aligned_subrange(&self, alignment: u64) -> Self {
        debug_assert!(alignment.is_power_of_two());
        let start = align_up(self.start, alignment).unwrap_or(self.end);
        let end = align_down(self.end, alignment);
        if start >= end {
            let start = start.min(self.end);
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }
}

/// Rounds `value` up to a multiple of `alignment`, which must be a power of
/// two. Returns `None` on overflow.
pub const fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Rounds `value` down to a multiple of `alignment`, which must be a power of
/// two.
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}
