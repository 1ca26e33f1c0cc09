//! Constructor-injected middleware.
//!
//! A [`BoundMiddleware`] is a type the pipeline instantiates itself. At
//! compile time the pipeline:
//!
//! 1. checks that every per-call dependency (`Deps`) is registered,
//! 2. builds the constructor arguments (`Args`), either from the root
//!    resolver or from the value given at registration,
//! 3. calls [`BoundMiddleware::new`] once with the next unit and the args.
//!
//! The resulting instance serves every invocation. Before each call the
//! adapter resolves `Deps` from the invocation's scope and passes them to
//! [`BoundMiddleware::invoke`].
//!
//! # Example
//!
//! ```
//! use conveyor_core::{Context, Outcome};
//! use conveyor_core::di::Inject;
//! use conveyor_middleware::{BoundMiddleware, BoxFuture, Next};
//!
//! struct Clock;
//! impl Clock {
//!     fn now(&self) -> u64 { 42 }
//! }
//!
//! struct Prefix {
//!     next: Next<String, String>,
//!     prefix: String,
//! }
//!
//! impl BoundMiddleware<String, String> for Prefix {
//!     type Args = String;
//!     type Deps = Inject<Clock>;
//!
//!     fn new(next: Next<String, String>, prefix: String) -> Self {
//!         Self { next, prefix }
//!     }
//!
//!     fn invoke<'a>(
//!         &'a self,
//!         ctx: &'a mut Context<String, String>,
//!         clock: Inject<Clock>,
//!     ) -> BoxFuture<'a, Outcome> {
//!         Box::pin(async move {
//!             let body = format!("{}-{}@{}", self.prefix, ctx.request(), clock.now());
//!             ctx.set_response(body);
//!             self.next.run(ctx).await
//!         })
//!     }
//! }
//! ```

use crate::middleware::{BoxFuture, Next};
use conveyor_core::di::{FromServices, Resolver};
use conveyor_core::{Context, Outcome, PipelineError, PipelineResult};
use std::any::type_name;
use std::sync::Arc;

/// Middleware constructed by the pipeline with injected dependencies.
///
/// `next` is always the first constructor parameter. Store it and call
/// `self.next.run(ctx)` from [`invoke`](Self::invoke) to continue the chain.
pub trait BoundMiddleware<Req, Res>: Send + Sync + Sized + 'static {
    /// Constructor arguments after `next`.
    ///
    /// Resolved from the root resolver when registered with
    /// `use_middleware`, or supplied directly with `use_middleware_with`.
    type Args: Send + 'static;

    /// Per-invocation dependencies, resolved from the invocation scope.
    type Deps: FromServices + Send;

    /// Builds the instance. Called once per pipeline compilation.
    fn new(next: Next<Req, Res>, args: Self::Args) -> Self;

    /// Handles one invocation.
    fn invoke<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        deps: Self::Deps,
    ) -> BoxFuture<'a, Outcome>;
}

/// Resolves `M::Args` from the root resolver.
pub(crate) fn resolve_args<Req, Res, M>(root: &dyn Resolver) -> PipelineResult<M::Args>
where
    M: BoundMiddleware<Req, Res>,
    M::Args: FromServices,
{
    M::Args::from_services(root).map_err(|e| {
        PipelineError::configuration(format!(
            "cannot construct middleware `{}`: {e}",
            type_name::<M>()
        ))
    })
}

/// Instantiates `M` around `next` and returns the unit that drives it.
pub(crate) fn bind<Req, Res, M>(
    next: Next<Req, Res>,
    args: M::Args,
    root: &dyn Resolver,
) -> PipelineResult<Next<Req, Res>>
where
    Req: Send + 'static,
    Res: Send + 'static,
    M: BoundMiddleware<Req, Res>,
{
    M::Deps::verify(root).map_err(|e| {
        PipelineError::configuration(format!(
            "middleware `{}` has an unsatisfiable invoke dependency: {e}",
            type_name::<M>()
        ))
    })?;

    let instance = Arc::new(M::new(next, args));
    tracing::trace!(middleware = type_name::<M>(), "bound middleware constructed");

    Ok(Next::new(move |ctx| {
        let instance = Arc::clone(&instance);
        Box::pin(async move {
            let deps = M::Deps::from_services(ctx.services())?;
            instance.invoke(ctx, deps).await
        })
    }))
}
