//! Pipeline construction.
//!
//! [`PipelineBuilder`] records registrations in order and executes nothing.
//! Each registration is a deferred transform from "the rest of the chain" to
//! "this middleware plus the rest of the chain"; the pipeline applies them in
//! reverse when it compiles.

use crate::adapter::{self, BoundMiddleware};
use crate::middleware::{self, BoxFuture, FnMiddleware, Middleware, Next};
use crate::pipeline::{Pipeline, PipelineOptions};
use conveyor_core::config::ConfigSource;
use conveyor_core::di::{FromServices, Resolver, ServiceProvider};
use conveyor_core::{Context, Outcome, PipelineResult};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A deferred registration, applied once at compile time.
///
/// Receives the already-compiled rest of the chain and the root resolver.
pub(crate) type Registration<Req, Res> =
    Box<dyn FnOnce(Next<Req, Res>, &dyn Resolver) -> PipelineResult<Next<Req, Res>> + Send>;

pub(crate) fn from_unit<Req, Res, F>(transform: F) -> Registration<Req, Res>
where
    F: FnOnce(Next<Req, Res>) -> Next<Req, Res> + Send + 'static,
{
    Box::new(move |next: Next<Req, Res>, _root: &dyn Resolver| Ok(transform(next)))
}

pub(crate) fn from_stage<Req, Res, M>(stage: M) -> Registration<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    M: Middleware<Req, Res>,
{
    let stage = Arc::new(stage);
    Box::new(move |next: Next<Req, Res>, _root: &dyn Resolver| {
        Ok(middleware::wrap(stage, next))
    })
}

pub(crate) fn from_fn<Req, Res, F>(f: F) -> Registration<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    F: for<'a> Fn(&'a mut Context<Req, Res>, Next<Req, Res>) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    from_stage(FnMiddleware::new::<Req, Res>("fn", f))
}

pub(crate) fn from_bound<Req, Res, M>() -> Registration<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    M: BoundMiddleware<Req, Res>,
    M::Args: FromServices,
{
    Box::new(|next: Next<Req, Res>, root: &dyn Resolver| {
        let args = adapter::resolve_args::<Req, Res, M>(root)?;
        adapter::bind::<Req, Res, M>(next, args, root)
    })
}

pub(crate) fn from_bound_with<Req, Res, M>(args: M::Args) -> Registration<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
    M: BoundMiddleware<Req, Res>,
{
    Box::new(move |next: Next<Req, Res>, root: &dyn Resolver| {
        adapter::bind::<Req, Res, M>(next, args, root)
    })
}

/// Builder for constructing a [`Pipeline`].
///
/// The first registered middleware is the outermost: it sees the context
/// first on the way in and last on the way out.
///
/// # Example
///
/// ```
/// use conveyor_core::di::Container;
/// use conveyor_middleware::PipelineBuilder;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let pipeline = PipelineBuilder::<String, String>::new(Arc::new(Container::new()))
///     .use_fn(|ctx, next| {
///         Box::pin(async move {
///             let upper = ctx.request().to_uppercase();
///             ctx.set_response(upper);
///             next.run(ctx).await
///         })
///     })
///     .build();
///
/// let response = pipeline.invoke("Hello, World!".to_string()).await.unwrap();
/// assert_eq!(response.as_deref(), Some("HELLO, WORLD!"));
/// # });
/// ```
pub struct PipelineBuilder<Req, Res> {
    services: Arc<dyn ServiceProvider>,
    options: PipelineOptions,
    registrations: Vec<Registration<Req, Res>>,
}

impl<Req, Res> PipelineBuilder<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Creates an empty builder over the given root service provider.
    #[must_use]
    pub fn new(services: Arc<dyn ServiceProvider>) -> Self {
        Self {
            services,
            options: PipelineOptions::default(),
            registrations: Vec::new(),
        }
    }

    /// Replaces the pipeline options.
    #[must_use]
    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Reads the per-invocation timeout from a configuration source.
    ///
    /// Keeps the current pipeline name.
    pub fn configure(mut self, config: &dyn ConfigSource) -> PipelineResult<Self> {
        let name = std::mem::take(&mut self.options.name);
        self.options = PipelineOptions::from_config(config)?.with_name(name);
        Ok(self)
    }

    /// Sets the pipeline name used in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    /// Sets the per-invocation timeout.
    ///
    /// A zero duration makes every invocation start out cancelled.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Removes the per-invocation timeout.
    #[must_use]
    pub fn no_timeout(mut self) -> Self {
        self.options.timeout = None;
        self
    }

    /// Appends a raw unit transform.
    ///
    /// The transform receives the rest of the chain and returns the unit
    /// that runs this step. It is applied once, at compile time.
    #[must_use]
    pub fn use_unit<F>(mut self, transform: F) -> Self
    where
        F: FnOnce(Next<Req, Res>) -> Next<Req, Res> + Send + 'static,
    {
        self.registrations.push(from_unit(transform));
        self
    }

    /// Appends an inline middleware closure.
    #[must_use]
    pub fn use_fn<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<Req, Res>, Next<Req, Res>) -> BoxFuture<'a, Outcome>
            + Send
            + Sync
            + 'static,
    {
        self.registrations.push(from_fn(f));
        self
    }

    /// Appends a [`Middleware`] instance.
    #[must_use]
    pub fn use_stage<M>(mut self, stage: M) -> Self
    where
        M: Middleware<Req, Res>,
    {
        self.registrations.push(from_stage(stage));
        self
    }

    /// Appends a bound middleware whose constructor arguments come from the
    /// root service provider.
    #[must_use]
    pub fn use_middleware<M>(mut self) -> Self
    where
        M: BoundMiddleware<Req, Res>,
        M::Args: FromServices,
    {
        self.registrations.push(from_bound::<Req, Res, M>());
        self
    }

    /// Appends a bound middleware with explicit constructor arguments.
    #[must_use]
    pub fn use_middleware_with<M>(mut self, args: M::Args) -> Self
    where
        M: BoundMiddleware<Req, Res>,
    {
        self.registrations.push(from_bound_with::<Req, Res, M>(args));
        self
    }

    /// Returns the number of registrations so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Finishes the builder.
    ///
    /// Nothing is compiled yet; that happens on the first invocation or on
    /// an explicit [`Pipeline::prepare`].
    #[must_use]
    pub fn build(self) -> Pipeline<Req, Res> {
        Pipeline::from_parts(self.services, self.options, self.registrations)
    }
}

impl<Req, Res> fmt::Debug for PipelineBuilder<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("options", &self.options)
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::di::Container;
    use conveyor_core::config::REQUEST_TIMEOUT_KEY;
    use std::collections::HashMap;

    fn builder() -> PipelineBuilder<String, String> {
        PipelineBuilder::new(Arc::new(Container::new()))
    }

    #[test]
    fn test_builder_starts_empty() {
        let b = builder();
        assert!(b.is_empty());
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn test_builder_counts_registrations() {
        let b = builder()
            .use_unit(|next| next)
            .use_fn(|ctx, next| Box::pin(async move { next.run(ctx).await }));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_builder_options() {
        let b = builder().name("orders").timeout(Duration::from_secs(5));
        assert_eq!(b.options.name, "orders");
        assert_eq!(b.options.timeout, Some(Duration::from_secs(5)));

        let b = b.no_timeout();
        assert_eq!(b.options.timeout, None);
    }

    #[test]
    fn test_configure_keeps_name() {
        let config: HashMap<String, String> =
            [(REQUEST_TIMEOUT_KEY.to_string(), "250".to_string())].into();

        let b = builder().name("billing").configure(&config).unwrap();
        assert_eq!(b.options.name, "billing");
        assert_eq!(b.options.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_configure_rejects_bad_timeout() {
        let config: HashMap<String, String> =
            [(REQUEST_TIMEOUT_KEY.to_string(), "later".to_string())].into();

        let err = builder().configure(&config).unwrap_err();
        assert!(err.is_configuration());
    }
}
