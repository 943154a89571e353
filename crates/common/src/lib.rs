//! dayreel Common Utilities
//!
//! Shared infrastructure for all dayreel crates:
//! - Error types and result aliases
//! - Run clock, frame/sample arithmetic, and cancellation tokens
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
