//! Shared types and utilities for iolens.
//!
//! This crate provides common functionality used across all iolens crates:
//! - Virtual-to-backing path translation
//! - Shared constants and error types

pub mod constants;
pub mod error;
pub mod path_utils;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::PathError;
pub use path_utils::{canonical_backing_root, resolve_backing};
