//! Cross-platform utilities used by the update subsystem.
//!
//! - [`fs`] - atomic writes, directory creation, executable permissions
//! - [`platform`] - `os-arch` platform detection and data directories
//! - [`progress`] - download progress bars

pub mod fs;
pub mod platform;
pub mod progress;

pub use fs::{atomic_write, ensure_dir, set_executable};
pub use platform::{Platform, is_windows};
pub use progress::ProgressBar;
