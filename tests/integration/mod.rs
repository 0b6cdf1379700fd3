//! Integration test suite for delta-update
//!
//! End-to-end tests for the update flow (check, download, install, rollback,
//! scheduled installs) against in-process fakes, plus tests of the
//! `delta-update` binary's offline commands.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: `delta-update` binary commands that need no network
//! - **self_update**: full check → install → rollback flows with real archives and executables

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod self_update;
