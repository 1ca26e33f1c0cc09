//! Error-to-response translation.
//!
//! The pipeline itself never turns an error into a response; errors travel
//! back to the caller of `invoke` unchanged. Hosts that want a structured
//! error response instead register this stage first, so it wraps the whole
//! chain:
//!
//! ```text
//! [ErrorHandling] → ... → terminal
//!        ↑ Err(e) becomes ctx.set_response(map(&e)) and Ok(())
//! ```
//!
//! Cancellation passes through untouched unless
//! [`handle_cancellation`](ErrorHandlingMiddleware::handle_cancellation) is
//! enabled.
//!
//! # Example
//!
//! ```
//! use conveyor_middleware::stages::ErrorHandlingMiddleware;
//!
//! let stage = ErrorHandlingMiddleware::<String, String>::new(|error| {
//!     format!("error: {}", error.category())
//! });
//! ```

use crate::middleware::{BoxFuture, Middleware, Next};
use conveyor_core::{Context, Outcome, PipelineError};
use std::fmt;
use std::sync::Arc;

type ErrorMapper<Res> = Arc<dyn Fn(&PipelineError) -> Res + Send + Sync>;

/// Converts downstream errors into responses.
pub struct ErrorHandlingMiddleware<Req, Res> {
    map: ErrorMapper<Res>,
    handle_cancellation: bool,
    _request: std::marker::PhantomData<fn() -> Req>,
}

impl<Req, Res> ErrorHandlingMiddleware<Req, Res> {
    /// Creates the stage with the function that builds an error response.
    #[must_use]
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&PipelineError) -> Res + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(map),
            handle_cancellation: false,
            _request: std::marker::PhantomData,
        }
    }

    /// Also converts [`PipelineError::Cancelled`] into a response.
    #[must_use]
    pub fn handle_cancellation(mut self, handle: bool) -> Self {
        self.handle_cancellation = handle;
        self
    }

    fn handles(&self, error: &PipelineError) -> bool {
        self.handle_cancellation || !error.is_cancelled()
    }
}

impl<Req, Res> fmt::Debug for ErrorHandlingMiddleware<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlingMiddleware")
            .field("handle_cancellation", &self.handle_cancellation)
            .finish_non_exhaustive()
    }
}

impl<Req, Res> Middleware<Req, Res> for ErrorHandlingMiddleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "error_handling"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        next: Next<Req, Res>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match next.run(ctx).await {
                Err(error) if self.handles(&error) => {
                    tracing::debug!(
                        invocation_id = %ctx.id(),
                        category = %error.category(),
                        error = %error,
                        "error converted to response"
                    );
                    ctx.set_response((self.map)(&error));
                    Ok(())
                }
                outcome => outcome,
            }
        })
    }
}
