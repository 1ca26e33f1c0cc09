//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while setting up logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level/filter directive could not be parsed.
    #[error("Invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// The rejected directive string.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}
