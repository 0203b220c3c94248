//! Common Utilities and Types Library
//!
//! This crate provides shared radio types and utilities used across the UE implementation.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
