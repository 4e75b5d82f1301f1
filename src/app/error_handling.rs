//! Error handling utilities
//!
//! This module provides centralized error handling for the binary.

use tracing::error;

use crate::config::ConfigError;

/// Exit code for configuration and usage problems
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for `error`: configuration problems are distinguished from
/// runtime failures
pub fn exit_code(error: &anyhow::Error) -> i32 {
    if error.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_CONFIG
    } else {
        EXIT_FAILURE
    }
}

/// Print `error` and exit.
///
/// With `verbose >= 1` the full cause chain is shown as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    eprintln!("Error: {error}");

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code(&error))
}
