//! A3S Build Core - Foundational Types
//!
//! Errors, builder configuration and build events shared by the
//! A3S image builder crates.

pub mod config;
pub mod error;
pub mod event;

// Re-export commonly used types
pub use config::{BuilderConfig, LogLevel};
pub use error::{BuildError, Result};
pub use event::{BuildEvent, EventEmitter};

/// A3S Build version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
