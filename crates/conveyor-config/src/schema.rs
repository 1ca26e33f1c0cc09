//! Configuration section schemas.

use conveyor_telemetry::{LogConfig, LogWriter};
use serde::{Deserialize, Serialize};

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Name recorded in log spans and metric labels.
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Per-invocation timeout in milliseconds.
    ///
    /// Absent means no timeout. A negative value makes every invocation
    /// start out cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<i64>,
}

fn default_pipeline_name() -> String {
    "default".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            request_timeout_ms: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Log output stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Whether logging is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `conveyor_middleware=debug,warn`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Whether span open/close events are logged.
    #[serde(default)]
    pub span_events: bool,

    /// Whether file and line are included.
    #[serde(default)]
    pub file_line_info: bool,

    /// Whether pretty output is colored.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Output stream.
    #[serde(default)]
    pub stream: LogStream,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_level(),
            format: LogFormat::Json,
            span_events: false,
            file_line_info: false,
            ansi_enabled: false,
            stream: LogStream::Stderr,
        }
    }
}

impl From<&LoggingSection> for LogConfig {
    fn from(section: &LoggingSection) -> Self {
        Self {
            enabled: section.enabled,
            level: section.level.clone(),
            json_format: section.format == LogFormat::Json,
            span_events: section.span_events,
            file_line_info: section.file_line_info,
            ansi: section.ansi_enabled,
            writer: match section.stream {
                LogStream::Stdout => LogWriter::Stdout,
                LogStream::Stderr => LogWriter::Stderr,
            },
            ..LogConfig::production()
        }
    }
}
