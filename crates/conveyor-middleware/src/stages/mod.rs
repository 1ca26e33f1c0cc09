//! Built-in middleware stages.
//!
//! None of these are installed automatically. Register them with
//! `use_stage`, usually in this order so they wrap everything else:
//!
//! ```text
//! ErrorHandling → Logging → Metrics → (application middleware) → terminal
//! ```
//!
//! - [`error_handling`] - Turns errors into responses
//! - [`logging`] - One span and start/finish events per invocation
//! - [`metrics`] - Invocation counters, latency and in-flight gauge

pub mod error_handling;
pub mod logging;
pub mod metrics;

pub use self::error_handling::ErrorHandlingMiddleware;
pub use self::logging::LoggingMiddleware;
pub use self::metrics::MetricsMiddleware;

use conveyor_core::Outcome;

/// Label describing how an invocation ended: `ok` or the error category.
pub(crate) fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Ok(()) => "ok",
        Err(error) => error.category().as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::PipelineError;

    #[test]
    fn test_outcome_label() {
        assert_eq!(outcome_label(&Ok(())), "ok");
        assert_eq!(outcome_label(&Err(PipelineError::Cancelled)), "cancelled");
        assert_eq!(
            outcome_label(&Err(PipelineError::middleware(anyhow::anyhow!("boom")))),
            "middleware"
        );
    }
}
