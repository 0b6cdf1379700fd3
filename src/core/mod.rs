//! Core types shared across the update subsystem.
//!
//! Currently this is the error taxonomy ([`UpdateError`]) and the CLI-facing
//! error reporting ([`ErrorContext`], [`user_friendly_error`]).

pub mod error;

pub use error::{ErrorContext, UpdateError, user_friendly_error};
