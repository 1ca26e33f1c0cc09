//! Logging setup for Conveyor hosts.
//!
//! The pipeline core never installs a subscriber. Hosts build a
//! [`tracing::Dispatch`] here and pass it to the logging stage, or install it
//! globally with [`init_logging`].
//!
//! ```text
//! LogConfig ──build_dispatch──▶ Dispatch ──▶ LoggingMiddleware
//!                                   │
//!                      init_logging └──▶ global default
//! ```
//!
//! # Example
//!
//! ```no_run
//! use conveyor_telemetry::{init_logging, LogConfig};
//!
//! let dispatch = init_logging(&LogConfig::production()).unwrap();
//! tracing::info!("logging ready");
//! # drop(dispatch);
//! ```

#![doc(html_root_url = "https://docs.rs/conveyor-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{build_dispatch, create_env_filter, init_logging, LogConfig, LogWriter};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
