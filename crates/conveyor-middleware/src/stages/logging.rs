//! Per-invocation structured logging.
//!
//! The stage owns the [`Dispatch`] it logs to rather than relying on a
//! process-wide subscriber. Everything downstream of the stage, including
//! `tracing` events emitted by application middleware, runs under that
//! dispatch and inside an `invocation` span carrying the invocation id.
//!
//! # Events
//!
//! | Outcome | Level | Message |
//! |---------|-------|---------|
//! | start | `DEBUG` | `invocation started` |
//! | `Ok` | `INFO` | `invocation completed` |
//! | `Cancelled` | `WARN` | `invocation cancelled` |
//! | other error | `ERROR` | `invocation failed` |
//!
//! Completion events carry `elapsed_ms` and `outcome`.

use super::outcome_label;
use crate::middleware::{BoxFuture, Middleware, Next};
use conveyor_core::{Context, Outcome};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument};

/// Logging middleware bound to an explicit dispatch.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    dispatch: Dispatch,
    pipeline: String,
}

impl LoggingMiddleware {
    /// Creates the stage logging to `dispatch`.
    #[must_use]
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            pipeline: crate::pipeline::DEFAULT_PIPELINE_NAME.to_string(),
        }
    }

    /// Creates the stage logging to whatever dispatch is the default at
    /// construction time.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Sets the pipeline name recorded on the span.
    #[must_use]
    pub fn pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline = name.into();
        self
    }
}

impl<Req, Res> Middleware<Req, Res> for LoggingMiddleware
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        next: Next<Req, Res>,
    ) -> BoxFuture<'a, Outcome> {
        let span = tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info_span!(
                "invocation",
                pipeline = %self.pipeline,
                invocation_id = %ctx.id(),
            )
        });

        let run = async move {
            tracing::debug!(timestamp = %ctx.timestamp(), "invocation started");

            let outcome = next.run(ctx).await;
            let elapsed_ms = ctx.elapsed().as_secs_f64() * 1000.0;
            let label = outcome_label(&outcome);

            match &outcome {
                Ok(()) => tracing::info!(
                    elapsed_ms,
                    outcome = label,
                    has_response = ctx.has_response(),
                    "invocation completed"
                ),
                Err(error) if error.is_cancelled() => {
                    tracing::warn!(elapsed_ms, outcome = label, "invocation cancelled");
                }
                Err(error) => tracing::error!(
                    elapsed_ms,
                    outcome = label,
                    error = %error,
                    "invocation failed"
                ),
            }

            outcome
        };

        Box::pin(run.instrument(span).with_subscriber(self.dispatch.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::PipelineError;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capturing_stage() -> (LoggingMiddleware, Captured) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let stage = LoggingMiddleware::new(Dispatch::new(subscriber)).pipeline("orders");
        (stage, captured)
    }

    #[test]
    fn test_middleware_name() {
        let (stage, _) = capturing_stage();
        assert_eq!(Middleware::<String, String>::name(&stage), "logging");
    }

    #[tokio::test]
    async fn test_logs_completion_with_invocation_id() {
        let (stage, captured) = capturing_stage();
        let mut ctx = Context::<String, String>::for_request("x".to_string());
        let id = ctx.id();
        let next = Next::new(|ctx: &mut Context<String, String>| {
            tracing::info!("inside the chain");
            ctx.set_response("done".to_string());
            Box::pin(std::future::ready(Ok(())))
        });

        stage.process(&mut ctx, next).await.unwrap();

        let logs = captured.text();
        assert!(logs.contains("invocation started"));
        assert!(logs.contains("invocation completed"));
        assert!(logs.contains(&id.to_string()));
        assert!(logs.contains("pipeline=orders"));
    }

    #[tokio::test]
    async fn test_downstream_events_use_stage_dispatch() {
        let (stage, captured) = capturing_stage();
        let mut ctx = Context::<String, String>::for_request("x".to_string());
        let next = Next::new(|_ctx: &mut Context<String, String>| {
            Box::pin(async {
                tracing::info!("downstream event");
                Ok(())
            })
        });

        stage.process(&mut ctx, next).await.unwrap();
        assert!(captured.text().contains("downstream event"));
    }

    #[tokio::test]
    async fn test_logs_failure_and_returns_error() {
        let (stage, captured) = capturing_stage();
        let mut ctx = Context::<String, String>::for_request("x".to_string());
        let next = Next::new(|_ctx: &mut Context<String, String>| {
            Box::pin(std::future::ready(Err::<(), _>(PipelineError::middleware(
                anyhow::anyhow!("bad input"),
            ))))
        });

        let outcome = stage.process(&mut ctx, next).await;
        assert!(outcome.is_err());

        let logs = captured.text();
        assert!(logs.contains("invocation failed"));
        assert!(logs.contains("bad input"));
    }

    #[tokio::test]
    async fn test_logs_cancellation_as_warning() {
        let (stage, captured) = capturing_stage();
        let mut ctx = Context::<String, String>::for_request("x".to_string());
        let next = Next::new(|_ctx: &mut Context<String, String>| {
            Box::pin(std::future::ready(Err::<(), _>(PipelineError::Cancelled)))
        });

        let outcome = stage.process(&mut ctx, next).await;
        assert!(matches!(outcome, Err(PipelineError::Cancelled)));
        assert!(captured.text().contains("WARN"));
    }
}
