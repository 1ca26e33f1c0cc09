//! Invocation metrics.
//!
//! Records through the [`metrics`](::metrics) facade. Nothing is exported
//! unless the host installs a recorder.
//!
//! # Metrics Emitted
//!
//! - `conveyor_invocations_total{pipeline, outcome}` - Counter of finished invocations
//! - `conveyor_invocation_duration_seconds{pipeline}` - Histogram of invocation latency
//! - `conveyor_in_flight_invocations{pipeline}` - Gauge of running invocations

use super::outcome_label;
use crate::middleware::{BoxFuture, Middleware, Next};
use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use conveyor_core::{Context, Outcome};
use std::time::Instant;

/// Counter of finished invocations.
pub const INVOCATIONS_TOTAL: &str = "conveyor_invocations_total";

/// Histogram of invocation latency in seconds.
pub const INVOCATION_DURATION_SECONDS: &str = "conveyor_invocation_duration_seconds";

/// Gauge of invocations currently running.
pub const IN_FLIGHT_INVOCATIONS: &str = "conveyor_in_flight_invocations";

/// Registers descriptions for the metrics this stage emits.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(INVOCATIONS_TOTAL, "Total pipeline invocations by outcome");
    describe_histogram!(
        INVOCATION_DURATION_SECONDS,
        "Pipeline invocation duration in seconds"
    );
    describe_gauge!(
        IN_FLIGHT_INVOCATIONS,
        "Number of pipeline invocations currently running"
    );
}

/// Metrics middleware.
#[derive(Debug, Clone)]
pub struct MetricsMiddleware {
    pipeline: String,
}

impl MetricsMiddleware {
    /// Creates the stage, labelling every metric with `pipeline`.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }

    /// Returns the pipeline label.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new(crate::pipeline::DEFAULT_PIPELINE_NAME)
    }
}

/// Keeps the in-flight gauge balanced even if the invocation is dropped.
struct InFlightGuard {
    pipeline: String,
}

impl InFlightGuard {
    fn new(pipeline: &str) -> Self {
        gauge!(IN_FLIGHT_INVOCATIONS, "pipeline" => pipeline.to_string()).increment(1.0);
        Self {
            pipeline: pipeline.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_INVOCATIONS, "pipeline" => self.pipeline.clone()).decrement(1.0);
    }
}

impl<Req, Res> Middleware<Req, Res> for MetricsMiddleware
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        next: Next<Req, Res>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new(&self.pipeline);
            let start = Instant::now();

            let outcome = next.run(ctx).await;

            counter!(
                INVOCATIONS_TOTAL,
                "pipeline" => self.pipeline.clone(),
                "outcome" => outcome_label(&outcome)
            )
            .increment(1);
            histogram!(
                INVOCATION_DURATION_SECONDS,
                "pipeline" => self.pipeline.clone()
            )
            .record(start.elapsed().as_secs_f64());

            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::PipelineError;

    #[test]
    fn test_middleware_name() {
        let stage = MetricsMiddleware::new("orders");
        assert_eq!(Middleware::<String, String>::name(&stage), "metrics");
        assert_eq!(stage.pipeline(), "orders");
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }

    #[test]
    fn test_in_flight_guard() {
        let guard = InFlightGuard::new("orders");
        assert_eq!(guard.pipeline, "orders");
        drop(guard);
    }

    #[tokio::test]
    async fn test_outcome_passes_through() {
        let stage = MetricsMiddleware::default();

        let mut ctx = Context::<String, String>::for_request("x".to_string());
        let ok = Next::new(|ctx: &mut Context<String, String>| {
            ctx.set_response("y".to_string());
            Box::pin(std::future::ready(Ok(())))
        });
        stage.process(&mut ctx, ok).await.unwrap();
        assert_eq!(ctx.response().map(String::as_str), Some("y"));

        let mut ctx = Context::<String, String>::for_request("x".to_string());
        let cancelled = Next::new(|_ctx: &mut Context<String, String>| {
            Box::pin(std::future::ready(Err::<(), _>(PipelineError::Cancelled)))
        });
        let outcome = stage.process(&mut ctx, cancelled).await;
        assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    }
}
