// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Boot command line overrides for root bridge discovery.

use crate::platform::DEFAULT_SOURCE_RETRIES;
use crate::platform::PlatformLayout;

/// Force decoding above 4GiB on (`1`) or off (`0`), regardless of what the
/// platform layout says. Has no effect on hardware that cannot address memory
/// above 4GiB.
const ABOVE_4G_DECODE: &str = "PCI_HOST_BRIDGE_ABOVE_4G_DECODE=";

/// Allocate prefetchable memory from the non-prefetchable apertures (`1`) or
/// keep them separate (`0`).
const COMBINE_MEM_PMEM: &str = "PCI_HOST_BRIDGE_COMBINE_MEM_PMEM=";

/// Report the apertures as fixed by firmware (`1`) so the bus driver does not
/// reassign them.
const FIXED_RESOURCES: &str = "PCI_HOST_BRIDGE_FIXED_RESOURCES=";

/// How many times a transiently failing platform query is retried. `0`
/// disables retries.
const SOURCE_RETRIES: &str = "PCI_HOST_BRIDGE_SOURCE_RETRIES=";

/// Discovery settings taken from the boot command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOptions {
    /// Overrides [`PlatformLayout::above_4g_decode`].
    pub above_4g_decode: Option<bool>,
    /// Overrides [`PlatformLayout::combine_mem_pmem`].
    pub combine_mem_pmem: Option<bool>,
    /// Overrides [`PlatformLayout::resources_fixed`].
    pub fixed_resources: Option<bool>,
    /// Extra attempts for transient platform source failures.
    pub source_retries: u32,
}

impl BootOptions {
    /// Options that leave the platform layout untouched.
    pub const fn new() -> Self {
        Self {
            above_4g_decode: None,
            combine_mem_pmem: None,
            fixed_resources: None,
            source_retries: DEFAULT_SOURCE_RETRIES,
        }
    }

    /// Parse arguments from a command line. Unrelated arguments are ignored.
    pub fn parse(&mut self, cmdline: &str) {
        for arg in cmdline.split_whitespace() {
            if arg.starts_with(ABOVE_4G_DECODE) {
                parse_flag(arg, &mut self.above_4g_decode);
            } else if arg.starts_with(COMBINE_MEM_PMEM) {
                parse_flag(arg, &mut self.combine_mem_pmem);
            } else if arg.starts_with(FIXED_RESOURCES) {
                parse_flag(arg, &mut self.fixed_resources);
            } else if arg.starts_with(SOURCE_RETRIES) {
                match arg.split_once('=').map(|(_, v)| v.parse::<u32>()) {
                    Some(Ok(retries)) => self.source_retries = retries,
                    _ => tracing::warn!(arg, "ignoring malformed boot option"),
                }
            }
        }
    }

    /// Applies the layout overrides.
    pub fn apply(&self, layout: &mut PlatformLayout) {
        if let Some(enable) = self.above_4g_decode {
            layout.above_4g_decode = enable;
        }
        if let Some(combine) = self.combine_mem_pmem {
            layout.combine_mem_pmem = combine;
        }
        if let Some(fixed) = self.fixed_resources {
            layout.resources_fixed = fixed;
        }
    }
}

impl Default for BootOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(arg: &str, flag: &mut Option<bool>) {
    match arg.split_once('=').map(|(_, v)| v) {
        Some("0") => *flag = Some(false),
        Some("1") => *flag = Some(true),
        _ => tracing::warn!(arg, "ignoring malformed boot option"),
    }
}
