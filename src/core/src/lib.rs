//! dhi-migrate Core - Shared Types
//!
//! Error taxonomy and migration configuration used by the engine and the CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{MigrateConfig, MigrateOptions};
pub use error::{MigrateError, ParseErrorKind, Result};

/// dhi-migrate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
