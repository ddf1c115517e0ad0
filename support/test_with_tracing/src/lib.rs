// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provides a `#[test]` attribute that initializes a `tracing` subscriber
//! before running the test body, so that events emitted by the code under
//! test show up in the captured test output.
//!
//! ```ignore
//! use test_with_tracing::test;
//!
//! #[test]
//! fn my_test() {
//!     tracing::info!("visible in `cargo test` output");
//! }
//! ```

pub use test_with_tracing_macro::test;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Installs the global test subscriber. Called by the code generated by
/// [`test`]; calling it more than once is harmless.
#[doc(hidden)]
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(tracing::Level::DEBUG.as_str()));

        // Another harness in the same process may have installed a subscriber
        // already, in which case that one wins.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_test_writer()
            .try_init();
    });
}
