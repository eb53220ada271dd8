//! # ovly Utilities
//!
//! Shared logging setup for hosts embedding the `ovly` overlay engine.
//!
//! The engine crate only emits `tracing` events; this crate installs the
//! subscriber that turns them into console or file output.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    LogFormat, LogLevel, LoggingError, LoggingGuard, dated_file_name, init_logging, init_logging_to_dir,
    init_logging_with_level,
};
pub use tracing::{debug, error, info, trace, warn};
