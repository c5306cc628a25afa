//! # rosdbg Utilities
//!
//! Logging setup and persisted settings shared by the rosdbg binaries.

pub mod config;
pub mod logging;

pub use config::{ConfigError, Settings};
// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_for_tui, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
