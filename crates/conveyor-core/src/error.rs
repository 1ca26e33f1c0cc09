//! Error types for Conveyor.
//!
//! This module provides [`PipelineError`], the single error type that flows
//! through a compiled pipeline, and the [`Outcome`] alias every middleware
//! unit returns.
//!
//! # Taxonomy
//!
//! | Variant | Raised when | Recoverable |
//! |---|---|---|
//! | `Configuration` | compiling the pipeline (missing dependency, bad argument) | no |
//! | `InvalidState` | registering middleware after compilation | no |
//! | `Cancelled` | a middleware or the terminal sink observed the cancellation signal | n/a |
//! | `Injection` | resolving a per-invocation dependency failed | depends on the container |
//! | `Middleware` | application code inside a middleware failed | application-defined |
//!
//! The framework never catches or rewraps errors while they unwind; a
//! middleware that wants a uniform error response must be registered first
//! and handle the `Err` it receives from `next`.

use crate::di::InjectionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What a middleware unit returns once it has finished with a context.
///
/// `Ok(())` means the unit completed (whether or not it delegated). The
/// response, if any, lives on the context.
pub type Outcome = PipelineResult<()>;

/// Broad classification of a [`PipelineError`].
///
/// Used as a low-cardinality label by the logging and metrics stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Setup errors detected while compiling the pipeline.
    Configuration,
    /// API misuse, such as registering after compilation.
    InvalidState,
    /// Cooperative cancellation or timeout.
    Cancelled,
    /// Dependency resolution failed during an invocation.
    Injection,
    /// Application error raised by middleware.
    Middleware,
}

impl ErrorCategory {
    /// Returns the snake_case label for this category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::InvalidState => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::Injection => "injection",
            Self::Middleware => "middleware",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for Conveyor pipelines.
///
/// # Example
///
/// ```
/// use conveyor_core::{ErrorCategory, PipelineError};
///
/// let err = PipelineError::configuration("middleware `Auth` needs a `Clock`");
/// assert_eq!(err.category(), ErrorCategory::Configuration);
/// assert!(!err.is_cancelled());
/// ```
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline could not be compiled.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Human-readable error message.
        message: String,
    },

    /// The invocation was cancelled before it could complete.
    #[error("Invocation cancelled")]
    Cancelled,

    /// A dependency could not be resolved during an invocation.
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// A middleware failed.
    #[error("Middleware error: {source}")]
    Middleware {
        /// The underlying application error.
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Wraps an application error raised inside a middleware.
    #[must_use]
    pub fn middleware(source: impl Into<anyhow::Error>) -> Self {
        Self::Middleware {
            source: source.into(),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::InvalidState { .. } => ErrorCategory::InvalidState,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Injection(_) => ErrorCategory::Injection,
            Self::Middleware { .. } => ErrorCategory::Middleware,
        }
    }

    /// Returns `true` if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this error was raised while compiling the pipeline.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
