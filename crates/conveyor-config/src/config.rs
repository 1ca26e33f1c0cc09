//! Main configuration types.
//!
//! This module provides the top-level [`ConveyorConfig`] struct and its builder.

use conveyor_core::config::{ConfigSource, REQUEST_TIMEOUT_KEY};
use conveyor_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, LogFormat, LoggingSection, PipelineSection};

/// Complete Conveyor host configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables. The struct is itself a [`ConfigSource`], so it
/// can be handed straight to `PipelineBuilder::configure`.
///
/// # Example
///
/// ```
/// use conveyor_config::ConveyorConfig;
/// use conveyor_core::config::{ConfigSource, REQUEST_TIMEOUT_KEY};
///
/// let mut config = ConveyorConfig::default();
/// assert_eq!(config.get(REQUEST_TIMEOUT_KEY), None);
///
/// config.pipeline.request_timeout_ms = Some(1500);
/// assert_eq!(config.get(REQUEST_TIMEOUT_KEY).as_deref(), Some("1500"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConveyorConfig {
    /// Pipeline configuration.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ConveyorConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ConveyorConfigBuilder {
        ConveyorConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pipeline name is blank
    /// - The logging level is not a valid filter directive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "pipeline.name",
                "must not be empty",
            ));
        }

        if self.logging.enabled {
            conveyor_telemetry::create_env_filter(&self.logging.level)
                .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        }

        Ok(())
    }

    /// Returns the logging section as a telemetry configuration.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig::from(&self.logging)
    }

    /// Create a development configuration.
    ///
    /// Debug level, pretty colored output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            logging: LoggingSection {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
                span_events: true,
                file_line_info: true,
                ansi_enabled: true,
                ..LoggingSection::default()
            },
        }
    }

    /// Create a production configuration.
    ///
    /// Info level JSON logs and a 30 second request timeout.
    #[must_use]
    pub fn production() -> Self {
        Self {
            pipeline: PipelineSection {
                request_timeout_ms: Some(30_000),
                ..PipelineSection::default()
            },
            logging: LoggingSection::default(),
        }
    }
}

impl ConfigSource for ConveyorConfig {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            REQUEST_TIMEOUT_KEY => self.pipeline.request_timeout_ms.map(|ms| ms.to_string()),
            _ => None,
        }
    }
}

/// Builder for [`ConveyorConfig`].
#[derive(Debug, Default)]
pub struct ConveyorConfigBuilder {
    pipeline: Option<PipelineSection>,
    logging: Option<LoggingSection>,
}

impl ConveyorConfigBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pipeline section.
    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineSection) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Set the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingSection) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Build the configuration without validating it.
    #[must_use]
    pub fn build(self) -> ConveyorConfig {
        ConveyorConfig {
            pipeline: self.pipeline.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<ConveyorConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
