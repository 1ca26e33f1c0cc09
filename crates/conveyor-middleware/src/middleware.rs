//! Core middleware trait and types.
//!
//! A pipeline is a chain of [`Next`] units. Each unit receives the mutable
//! [`Context`] and decides whether to call the unit after it. Code before the
//! call runs on the way in (registration order); code after it runs on the
//! way out (reverse order).
//!
//! Middleware can be written three ways:
//!
//! - implement [`Middleware`] and register it with `use_stage`
//! - pass an inline closure to `use_fn` (wrapped in [`FnMiddleware`])
//! - implement [`BoundMiddleware`](crate::BoundMiddleware) and register the
//!   type with `use_middleware`
//!
//! # Example
//!
//! ```
//! use conveyor_middleware::{BoxFuture, Middleware, Next};
//! use conveyor_core::{Context, Outcome};
//!
//! struct Uppercase;
//!
//! impl Middleware<String, String> for Uppercase {
//!     fn name(&self) -> &'static str {
//!         "uppercase"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut Context<String, String>,
//!         next: Next<String, String>,
//!     ) -> BoxFuture<'a, Outcome> {
//!         Box::pin(async move {
//!             let upper = ctx.request().to_uppercase();
//!             ctx.set_response(upper);
//!             next.run(ctx).await
//!         })
//!     }
//! }
//! ```

use conveyor_core::{Context, Outcome};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type UnitFn<Req, Res> =
    dyn for<'a> Fn(&'a mut Context<Req, Res>) -> BoxFuture<'a, Outcome> + Send + Sync;

/// A compiled unit of the chain: everything from one middleware inward.
///
/// `Next` is cheap to clone. A compiled pipeline holds the outermost unit;
/// each middleware holds the unit after it.
///
/// Closures passed to [`Next::new`] cannot borrow their captures across the
/// returned future. Clone what the future needs before boxing it:
///
/// ```
/// use conveyor_middleware::Next;
///
/// let inner: Next<String, String> = Next::new(|ctx| {
///     Box::pin(async move { ctx.cancellation().check() })
/// });
///
/// let outer = {
///     let inner = inner.clone();
///     Next::new(move |ctx| {
///         let inner = inner.clone();
///         Box::pin(async move {
///             ctx.set_data("seen", true);
///             inner.run(ctx).await
///         })
///     })
/// };
/// # let _ = outer;
/// ```
pub struct Next<Req, Res> {
    inner: Arc<UnitFn<Req, Res>>,
}

impl<Req, Res> Next<Req, Res> {
    /// Wraps a unit function.
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<Req, Res>) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Runs this unit and everything after it.
    pub fn run<'a>(&self, ctx: &'a mut Context<Req, Res>) -> BoxFuture<'a, Outcome> {
        (self.inner)(ctx)
    }

    /// Returns `true` if both handles point at the same compiled unit.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Req, Res> Clone for Next<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> fmt::Debug for Next<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// A reusable middleware stage.
///
/// # Invariants
///
/// - Call `next.run()` at most once. Not calling it short-circuits the chain.
/// - Errors from downstream should be returned unchanged unless the stage
///   exists to translate them.
/// - Honor cancellation by returning `Err(PipelineError::Cancelled)`
///   (for example with `ctx.cancellation().check()?`).
pub trait Middleware<Req, Res>: Send + Sync + 'static {
    /// Returns the name of this stage, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Processes one invocation.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The invocation context
    /// * `next` - The rest of the chain
    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        next: Next<Req, Res>,
    ) -> BoxFuture<'a, Outcome>;
}

impl<Req, Res, M> Middleware<Req, Res> for Arc<M>
where
    M: Middleware<Req, Res> + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        next: Next<Req, Res>,
    ) -> BoxFuture<'a, Outcome> {
        (**self).process(ctx, next)
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```
/// use conveyor_middleware::FnMiddleware;
/// use conveyor_middleware::Middleware;
/// use conveyor_core::Context;
///
/// let stamp = FnMiddleware::new("stamp", |ctx: &mut Context<String, String>, next| {
///     Box::pin(async move {
///         ctx.set_data("stamped", true);
///         next.run(ctx).await
///     })
/// });
/// assert_eq!(Middleware::<String, String>::name(&stamp), "stamp");
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a new function-based middleware.
    pub fn new<Req, Res>(name: &'static str, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<Req, Res>, Next<Req, Res>) -> BoxFuture<'a, Outcome>
            + Send
            + Sync
            + 'static,
    {
        Self { name, func }
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<Req, Res, F> Middleware<Req, Res> for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context<Req, Res>, Next<Req, Res>) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<Req, Res>,
        next: Next<Req, Res>,
    ) -> BoxFuture<'a, Outcome> {
        (self.func)(ctx, next)
    }
}

/// Wraps a stage around `next`, producing the unit that runs the stage.
pub(crate) fn wrap<Req, Res, M>(stage: Arc<M>, next: Next<Req, Res>) -> Next<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    M: Middleware<Req, Res> + ?Sized,
{
    Next::new(move |ctx| {
        let stage = Arc::clone(&stage);
        let next = next.clone();
        Box::pin(async move { stage.process(ctx, next).await })
    })
}

/// The innermost unit of every compiled chain.
///
/// Reports cancellation if the signal has fired, otherwise completes.
pub(crate) fn terminal<Req, Res>() -> Next<Req, Res> {
    Next::new(|ctx| {
        let outcome = ctx.cancellation().check();
        Box::pin(std::future::ready(outcome))
    })
}
