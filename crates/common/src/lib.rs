//! Cardcast Common Utilities
//!
//! Shared infrastructure for all Cardcast crates:
//! - Error types and result aliases
//! - Export clock and frame scheduling
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
