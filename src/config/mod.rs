//! Configuration persistence for the update subsystem
//!
//! The update settings themselves are modelled by
//! [`UpdateConfig`](crate::upgrade::config::UpdateConfig); this module decides
//! where they live and how they are read and written.
//!
//! # Configuration File
//!
//! **Location** (first match wins):
//! 1. `--config <PATH>` on the command line
//! 2. The `DELTA_UPDATE_CONFIG` environment variable
//! 3. `<config dir>/delta/update.json` where `<config dir>` is
//!    `~/.config` on Linux, `~/Library/Application Support` on macOS and
//!    `%APPDATA%` on Windows
//!
//! A missing file is not an error: defaults are used and the file is created
//! on the first save. Writes are atomic (temp file plus rename).
//!
//! # Stores
//!
//! - [`JsonConfigStore`] - the file-backed store used by the CLI
//! - [`MemoryConfigStore`] - an in-memory store for tests and embedding
//!
//! # Example
//!
//! ```rust,no_run
//! use delta_update::config::{ConfigStore, JsonConfigStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = JsonConfigStore::new(JsonConfigStore::default_path()?);
//! let mut config = store.load().await?;
//! config.auto_install = true;
//! store.save(&config).await?;
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::{ConfigStore, JsonConfigStore, MemoryConfigStore};
