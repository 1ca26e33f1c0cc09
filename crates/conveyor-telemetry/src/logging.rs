//! Structured logging setup.
//!
//! Conveyor's logging stage writes to an explicit [`Dispatch`] rather than
//! reaching for a process-wide subscriber. [`build_dispatch`] turns a
//! [`LogConfig`] into that capability; [`init_logging`] additionally installs
//! it as the global default for hosts that want one.
//!
//! # Example
//!
//! ```
//! use conveyor_telemetry::logging::{build_dispatch, LogConfig};
//!
//! let dispatch = build_dispatch(&LogConfig::development()).unwrap();
//! tracing::dispatcher::with_default(&dispatch, || {
//!     tracing::info!(pipeline = "orders", "ready");
//! });
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing::Dispatch;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Where formatted log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogWriter {
    /// Standard output.
    Stdout,
    /// Standard error. Keeps stdout free for program output.
    #[default]
    Stderr,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "conveyor_middleware=debug,warn").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Whether to emit ANSI colors in human-readable output.
    pub ansi: bool,

    /// Output stream.
    pub writer: LogWriter,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            thread_ids: false,
            include_target: true,
            ansi: true,
            writer: LogWriter::Stderr,
        }
    }

    /// Creates a production configuration with JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
            ansi: false,
            writer: LogWriter::Stderr,
        }
    }

    /// Returns a copy that logs nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::production()
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builds a dispatch from `config` without installing it anywhere.
///
/// A disabled configuration yields [`Dispatch::none`], which drops every
/// event.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] if `config.level` is not a valid
/// filter directive.
pub fn build_dispatch(config: &LogConfig) -> TelemetryResult<Dispatch> {
    if !config.enabled {
        return Ok(Dispatch::none());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: BoxedLayer = match (config.json_format, config.writer) {
        (true, LogWriter::Stdout) => json_layer(config, span_events)
            .with_writer(std::io::stdout)
            .with_filter(filter)
            .boxed(),
        (true, LogWriter::Stderr) => json_layer(config, span_events)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        (false, LogWriter::Stdout) => pretty_layer(config, span_events)
            .with_writer(std::io::stdout)
            .with_filter(filter)
            .boxed(),
        (false, LogWriter::Stderr) => pretty_layer(config, span_events)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    Ok(Dispatch::new(tracing_subscriber::registry().with(layer)))
}

fn json_layer(
    config: &LogConfig,
    span_events: FmtSpan,
) -> tracing_subscriber::fmt::Layer<
    Registry,
    tracing_subscriber::fmt::format::JsonFields,
    tracing_subscriber::fmt::format::Format<tracing_subscriber::fmt::format::Json>,
> {
    tracing_subscriber::fmt::layer()
        .json()
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target)
}

fn pretty_layer(
    config: &LogConfig,
    span_events: FmtSpan,
) -> tracing_subscriber::fmt::Layer<
    Registry,
    tracing_subscriber::fmt::format::Pretty,
    tracing_subscriber::fmt::format::Format<tracing_subscriber::fmt::format::Pretty>,
> {
    tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(config.ansi)
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target)
}

/// Builds a dispatch from `config` and installs it as the global default.
///
/// Returns the dispatch so it can also be handed to the logging stage.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for a bad filter and
/// [`TelemetryError::LoggingInit`] if a global default is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<Dispatch> {
    let dispatch = build_dispatch(config)?;
    tracing::dispatcher::set_global_default(dispatch.clone())
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    Ok(dispatch)
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}
