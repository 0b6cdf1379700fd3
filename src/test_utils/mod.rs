//! Test utilities for delta-update
//!
//! This module provides in-memory fakes for the update seams and fixtures for
//! building release artifacts on disk, so that checker, scheduler, and
//! installer tests never touch the network.
//!
//! # Fakes
//!
//! - [`FakeReleaseProvider`] - serves a fixed list of releases, can be slowed down or made to fail
//! - [`FakeDownloader`] - "downloads" fixed bytes into a directory
//! - [`FakeUpdateManager`] - records install attempts and fails on demand
//! - [`AcceptAllValidator`] - accepts any regular file as a valid binary
//!
//! # Fixtures
//!
//! - [`write_script`] - executable `#!/bin/sh` script
//! - [`write_tar_gz`] / [`write_zip`] - archives with given entries
//! - [`release_with_assets`] - release metadata with named assets
//!
//! # Example
//!
//! ```rust,no_run
//! use delta_update::test_utils::{FakeReleaseProvider, release_with_assets};
//!
//! let provider = FakeReleaseProvider::with_releases(vec![
//!     release_with_assets("v1.1.0", &["delta-linux-amd64.tar.gz"]),
//! ]);
//! provider.set_failing(true);
//! ```

mod fakes;
mod fixtures;

pub use fakes::{AcceptAllValidator, FakeDownloader, FakeReleaseProvider, FakeUpdateManager};
pub use fixtures::{asset, release_with_assets, write_script, write_tar_gz, write_zip};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Initializes the tracing subscriber once regardless of how many times it's
/// called. It respects the `RUST_LOG` environment variable if set, or uses the
/// provided log level.
///
/// # Example
///
/// ```rust,no_run
/// use tracing::Level;
///
/// fn my_test() {
///     delta_update::test_utils::init_test_logging(Some(Level::DEBUG));
/// }
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
