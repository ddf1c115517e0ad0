// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Randomized discovery over generated platforms.

use crate::DiscoveryError;
use crate::InvariantViolation;
use crate::PlatformInfoSource;
use crate::discover_root_bridges;
use crate::platform::ApertureWindow;
use crate::platform::PlatformLayout;
use crate::platform::RawCapacity;
use crate::platform::StaticBridge;
use crate::platform::StaticPlatformInfo;
use crate::registry::RootBridgeRegistry;
use crate::resource::ResourceKind;
use crate::test_helpers::GB;
use crate::test_helpers::MB;
use crate::test_helpers::test_layout;
use memory_range::MemoryRange;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeSet;
use zerocopy::IntoBytes;

const MAX_BRIDGES: usize = 8;

fn capacity_strategy(max: u64) -> BoxedStrategy<RawCapacity> {
    prop_oneof![
        1 => Just(RawCapacity::Unsupported),
        2 => Just(RawCapacity::Bytes(0)),
        6 => (1..=max).prop_map(RawCapacity::Bytes),
    ]
    .boxed()
}

fn request(bridge: StaticBridge, kind: ResourceKind, capacity: RawCapacity) -> StaticBridge {
    match capacity {
        RawCapacity::Unsupported => bridge.with_unsupported(kind),
        RawCapacity::Bytes(bytes) => bridge.with_capacity(kind, bytes),
    }
}

fn bridge_strategy(
    bus_count: impl Strategy<Value = Option<u16>>,
) -> impl Strategy<Value = StaticBridge> {
    (
        capacity_strategy(0x4000),
        prop::array::uniform4(capacity_strategy(64 * MB)),
        bus_count,
    )
        .prop_map(|(io, [pmem32, mem32, pmem64, mem64], bus_count)| {
            let mut bridge = request(StaticBridge::new(), ResourceKind::Io, io);
            bridge = request(bridge, ResourceKind::PrefetchMem32, pmem32);
            bridge = request(bridge, ResourceKind::Mem32, mem32);
            bridge = request(bridge, ResourceKind::PrefetchMem64, pmem64);
            bridge = request(bridge, ResourceKind::Mem64, mem64);
            match bus_count {
                Some(count) => bridge.with_bus_count(count),
                None => bridge,
            }
        })
}

fn layout_strategy() -> impl Strategy<Value = PlatformLayout> {
    (
        8u64..=256,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(mem32_mb, above_4g_decode, combine_mem_pmem, pmem32_window, fixed)| {
                let mut layout = test_layout().with_window(
                    ResourceKind::Mem32,
                    ApertureWindow::new(MemoryRange::new(0..mem32_mb * MB)),
                );
                if pmem32_window {
                    layout = layout.with_window(
                        ResourceKind::PrefetchMem32,
                        ApertureWindow::new(MemoryRange::new(2 * GB..2 * GB + 128 * MB)),
                    );
                }
                layout.above_4g_decode = above_4g_decode;
                layout.combine_mem_pmem = combine_mem_pmem;
                layout.resources_fixed = fixed;
                layout
            },
        )
}

fn platform_strategy() -> impl Strategy<Value = StaticPlatformInfo> {
    (
        layout_strategy(),
        any::<bool>(),
        prop::collection::vec(bridge_strategy(prop::option::of(0u16..16)), 1..=MAX_BRIDGES),
    )
        .prop_map(|(layout, extended, bridges)| {
            bridges.into_iter().fold(
                StaticPlatformInfo::new(layout).with_extended_address_support(extended),
                StaticPlatformInfo::with_bridge,
            )
        })
}

/// Platforms whose bus number demands can run past the last bus.
fn crowded_bus_strategy() -> impl Strategy<Value = StaticPlatformInfo> {
    (
        layout_strategy(),
        any::<u8>(),
        prop::collection::vec(
            bridge_strategy(prop::option::of(any::<u16>())),
            1..=MAX_BRIDGES,
        ),
    )
        .prop_map(|(mut layout, base_bus, bridges)| {
            layout.base_bus = base_bus;
            bridges.into_iter().fold(
                StaticPlatformInfo::new(layout),
                StaticPlatformInfo::with_bridge,
            )
        })
}

fn discover(source: &StaticPlatformInfo) -> Result<RootBridgeRegistry, TestCaseError> {
    discover_root_bridges(source).map_err(|err| TestCaseError::fail(format!("{err:?}")))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_segments_unique_and_apertures_disjoint(source in platform_strategy()) {
        let registry = discover(&source)?;
        prop_assert_eq!(registry.count() as u32, source.bridge_count().unwrap());

        let segments: BTreeSet<_> = registry.iter().map(|d| d.segment).collect();
        prop_assert_eq!(segments.len(), registry.count());

        for kind in ResourceKind::ALL {
            let ranges: Vec<MemoryRange> = registry
                .iter()
                .filter_map(|d| d.aperture(kind).map(|a| a.range()))
                .collect();
            for (i, a) in ranges.iter().enumerate() {
                for b in &ranges[i + 1..] {
                    prop_assert!(!a.overlaps(b), "{kind}: {a} overlaps {b}");
                }
            }
        }
    }

    #[test]
    fn prop_apertures_match_capabilities(source in platform_strategy()) {
        let registry = discover(&source)?;
        let layout = source.layout().unwrap();
        for d in &registry {
            prop_assert!(d.attributes().is_subset(&d.supports()));
            prop_assert_eq!(d.resource_assigned_by_firmware, layout.resources_fixed);
            for kind in ResourceKind::ALL {
                let aperture = d.aperture(kind);
                prop_assert_eq!(aperture.is_some(), d.supports().contains(kind.capability()));
                if let Some(aperture) = aperture {
                    let window = layout.window(kind).unwrap();
                    prop_assert!(window.range.contains(&aperture.range()));
                    prop_assert!(aperture.range().is_aligned(layout.granularity(kind)));
                    prop_assert!(!aperture.range().is_empty());
                }
            }
        }
    }

    #[test]
    fn prop_no_64bit_apertures_without_decode(source in platform_strategy()) {
        let registry = discover(&source)?;
        let decode = source.has_extended_address_support().unwrap()
            && source.layout().unwrap().above_4g_decode;
        if !decode {
            for d in &registry {
                prop_assert!(d.mem64.is_none());
                prop_assert!(d.prefetch_mem64.is_none());
            }
        }
    }

    #[test]
    fn prop_discovery_is_deterministic(source in platform_strategy()) {
        let first = discover(&source)?.to_records();
        let second = discover(&source)?.to_records();
        prop_assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn prop_bus_numbers_stay_in_bus_space(source in crowded_bus_strategy()) {
        let base_bus = source.layout().unwrap().base_bus;
        match discover_root_bridges(&source) {
            Ok(registry) => {
                let mut next_bus = u16::from(base_bus);
                for d in &registry {
                    prop_assert_eq!(u16::from(d.bus_range.start()), next_bus);
                    prop_assert!(d.bus_range.start() <= d.bus_range.end());
                    next_bus = u16::from(d.bus_range.end()) + 1;
                }
            }
            Err(DiscoveryError::InvariantViolation(
                InvariantViolation::BusNumbersExhausted { .. },
            )) => {}
            Err(err) => prop_assert!(false, "unexpected error: {err:?}"),
        }
    }
}
