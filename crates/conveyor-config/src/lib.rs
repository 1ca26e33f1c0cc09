//! Typed configuration for Conveyor hosts.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - `.env` files and environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! [`ConveyorConfig`] implements the pipeline's
//! [`ConfigSource`](conveyor_core::config::ConfigSource) contract, so a loaded
//! configuration can be passed to `PipelineBuilder::configure` as is.
//!
//! # Example
//!
//! ```no_run
//! use conveyor_config::ConfigLoader;
//!
//! # fn main() -> Result<(), conveyor_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("conveyor.toml")?
//!     .with_env_prefix("CONVEYOR")
//!     .load()?;
//!
//! println!("pipeline: {}", config.pipeline.name);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! name = "orders"
//! request_timeout_ms = 30000
//!
//! [logging]
//! enabled = true
//! level = "info"
//! format = "json"
//! stream = "stderr"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden via environment variables using the format
//! `PREFIX__SECTION__KEY`. For example:
//!
//! - `CONVEYOR__PIPELINE__REQUEST_TIMEOUT_MS=5000`
//! - `CONVEYOR__LOGGING__LEVEL=debug`
//! - `CONVEYOR__LOGGING__FORMAT=pretty`

#![doc(html_root_url = "https://docs.rs/conveyor-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{ConveyorConfig, ConveyorConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{LogFormat, LogStream, LoggingSection, PipelineSection};
