//! Liveproof Common Utilities
//!
//! Shared infrastructure for all liveproof crates:
//! - Error types and result aliases
//! - Clock utilities for recording duration and scheduling
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
