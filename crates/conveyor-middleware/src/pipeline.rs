//! Compiled middleware pipeline.
//!
//! A [`Pipeline`] holds its registrations until the first invocation (or an
//! explicit [`Pipeline::prepare`]), then folds them into a single [`Next`]
//! chain exactly once:
//!
//! ```text
//! registrations: [M1, M2, M3]
//!
//! compile:  terminal ← M3 ← M2 ← M1        (fold in reverse)
//! execute:  M1 → M2 → M3 → terminal → M3 → M2 → M1
//! ```
//!
//! Every invocation gets a fresh [`Context`] and a fresh service scope. The
//! compiled chain and the root provider are the only things shared between
//! concurrent invocations.

use crate::adapter::BoundMiddleware;
use crate::builder::{self, PipelineBuilder, Registration};
use crate::middleware::{self, BoxFuture, Middleware, Next};
use conveyor_core::config::{ConfigSource, ConfigSourceExt, REQUEST_TIMEOUT_KEY};
use conveyor_core::di::{FromServices, ServiceProvider};
use conveyor_core::{CancellationSignal, Context, Outcome, PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Name used when none is configured.
pub const DEFAULT_PIPELINE_NAME: &str = "default";

/// Settings applied to every invocation of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Name used in logs and metrics.
    pub name: String,

    /// Per-invocation timeout. `None` means no timeout.
    pub timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_PIPELINE_NAME.to_string(),
            timeout: None,
        }
    }
}

impl PipelineOptions {
    /// Reads options from a configuration source.
    ///
    /// Only `RequestTimeout` is consulted. Absent or `infinite` disables the
    /// timeout; a negative value makes every invocation start out cancelled.
    pub fn from_config(config: &dyn ConfigSource) -> PipelineResult<Self> {
        Ok(Self {
            timeout: config.get_timeout(REQUEST_TIMEOUT_KEY)?,
            ..Self::default()
        })
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

enum State<Req, Res> {
    /// Registrations waiting for the first compilation.
    Pending(Vec<Registration<Req, Res>>),

    /// The chain lives in [`Pipeline::compiled`].
    Compiled,

    /// Compilation failed or panicked; the registrations were consumed.
    Failed(String),
}

/// A middleware pipeline.
///
/// Share it across tasks with `Arc<Pipeline<_, _>>`; every method takes
/// `&self`.
///
/// # Example
///
/// ```
/// use conveyor_core::di::Container;
/// use conveyor_middleware::Pipeline;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::<String, String>::builder(Arc::new(Container::new()))
///     .use_fn(|ctx, next| {
///         Box::pin(async move {
///             let lower = ctx.request().to_lowercase();
///             ctx.set_response(lower);
///             next.run(ctx).await
///         })
///     })
///     .build();
///
/// pipeline.prepare().unwrap();
/// let response = pipeline.invoke("LOUD".to_string()).await.unwrap();
/// assert_eq!(response.as_deref(), Some("loud"));
/// # });
/// ```
pub struct Pipeline<Req, Res> {
    services: Arc<dyn ServiceProvider>,
    options: PipelineOptions,
    state: Mutex<State<Req, Res>>,
    compiled: OnceLock<Next<Req, Res>>,
}

impl<Req, Res> Pipeline<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder(services: Arc<dyn ServiceProvider>) -> PipelineBuilder<Req, Res> {
        PipelineBuilder::new(services)
    }

    pub(crate) fn from_parts(
        services: Arc<dyn ServiceProvider>,
        options: PipelineOptions,
        registrations: Vec<Registration<Req, Res>>,
    ) -> Self {
        Self {
            services,
            options,
            state: Mutex::new(State::Pending(registrations)),
            compiled: OnceLock::new(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Returns the per-invocation timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout
    }

    /// Returns `true` once the chain has been compiled.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Compiles the chain if needed and returns it.
    ///
    /// Compilation happens at most once; later calls return the same chain.
    /// Bound middleware is constructed here, so missing dependencies surface
    /// as [`PipelineError::Configuration`] before any request runs.
    ///
    /// If a constructor or factory panics during compilation the pipeline is
    /// left failed; it never falls back to an empty chain.
    pub fn prepare(&self) -> PipelineResult<Next<Req, Res>> {
        if let Some(chain) = self.compiled.get() {
            return Ok(chain.clone());
        }

        let mut state = self.state.lock();

        // Marked failed until compile returns, so an unwinding constructor
        // cannot leave an empty pending list behind.
        let taken = std::mem::replace(
            &mut *state,
            State::Failed("compilation panicked".to_string()),
        );
        let registrations = match taken {
            State::Pending(registrations) => registrations,
            State::Compiled => {
                *state = State::Compiled;
                return self.compiled.get().cloned().ok_or_else(|| {
                    PipelineError::invalid_state("compiled chain is missing")
                });
            }
            State::Failed(reason) => {
                let error = PipelineError::configuration(format!(
                    "pipeline `{}` failed to compile: {reason}",
                    self.options.name
                ));
                *state = State::Failed(reason);
                return Err(error);
            }
        };

        let count = registrations.len();
        match self.compile(registrations) {
            Ok(chain) => {
                tracing::debug!(
                    pipeline = %self.options.name,
                    middleware = count,
                    "pipeline compiled"
                );
                // Only ever set while holding the state lock.
                let _ = self.compiled.set(chain.clone());
                *state = State::Compiled;
                Ok(chain)
            }
            Err(error) => {
                tracing::warn!(
                    pipeline = %self.options.name,
                    error = %error,
                    "pipeline compilation failed"
                );
                *state = State::Failed(error.to_string());
                Err(error)
            }
        }
    }

    fn compile(&self, registrations: Vec<Registration<Req, Res>>) -> PipelineResult<Next<Req, Res>> {
        let root = self.services.as_resolver();
        registrations
            .into_iter()
            .rev()
            .try_fold(middleware::terminal(), |next, register| register(next, root))
    }

    /// Runs one invocation and returns the response, if any middleware set one.
    ///
    /// The configured timeout starts when the context is created.
    pub async fn invoke(&self, request: Req) -> PipelineResult<Option<Res>> {
        self.execute(request, None).await
    }

    /// Like [`invoke`](Self::invoke), also observing a caller-supplied signal.
    ///
    /// The invocation is cancelled when either the caller's signal fires or
    /// the configured timeout elapses.
    pub async fn invoke_with_cancellation(
        &self,
        request: Req,
        cancellation: CancellationSignal,
    ) -> PipelineResult<Option<Res>> {
        self.execute(request, Some(cancellation)).await
    }

    async fn execute(
        &self,
        request: Req,
        parent: Option<CancellationSignal>,
    ) -> PipelineResult<Option<Res>> {
        let chain = self.prepare()?;

        let scope = Arc::clone(&self.services).create_scope();
        let signal = CancellationSignal::linked(self.options.timeout, parent);
        let mut ctx = Context::new(request, Arc::clone(&scope), signal);

        let outcome = chain.run(&mut ctx).await;
        scope.dispose();

        match outcome {
            Ok(()) => Ok(ctx.take_response()),
            Err(error) => {
                tracing::debug!(
                    pipeline = %self.options.name,
                    invocation_id = %ctx.id(),
                    category = %error.category(),
                    "invocation failed"
                );
                Err(error)
            }
        }
    }

    fn register(&self, registration: Registration<Req, Res>) -> PipelineResult<()> {
        match &mut *self.state.lock() {
            State::Pending(registrations) => {
                registrations.push(registration);
                Ok(())
            }
            State::Compiled | State::Failed(_) => Err(PipelineError::invalid_state(format!(
                "pipeline `{}` is already compiled; middleware can no longer be added",
                self.options.name
            ))),
        }
    }

    /// Appends a raw unit transform. Fails once the pipeline is compiled.
    pub fn use_unit<F>(&self, transform: F) -> PipelineResult<()>
    where
        F: FnOnce(Next<Req, Res>) -> Next<Req, Res> + Send + 'static,
    {
        self.register(builder::from_unit(transform))
    }

    /// Appends an inline middleware closure. Fails once the pipeline is compiled.
    pub fn use_fn<F>(&self, f: F) -> PipelineResult<()>
    where
        F: for<'a> Fn(&'a mut Context<Req, Res>, Next<Req, Res>) -> BoxFuture<'a, Outcome>
            + Send
            + Sync
            + 'static,
    {
        self.register(builder::from_fn(f))
    }

    /// Appends a [`Middleware`] instance. Fails once the pipeline is compiled.
    pub fn use_stage<M>(&self, stage: M) -> PipelineResult<()>
    where
        M: Middleware<Req, Res>,
    {
        self.register(builder::from_stage(stage))
    }

    /// Appends a bound middleware resolved from the root provider.
    /// Fails once the pipeline is compiled.
    pub fn use_middleware<M>(&self) -> PipelineResult<()>
    where
        M: BoundMiddleware<Req, Res>,
        M::Args: FromServices,
    {
        self.register(builder::from_bound::<Req, Res, M>())
    }

    /// Appends a bound middleware with explicit constructor arguments.
    /// Fails once the pipeline is compiled.
    pub fn use_middleware_with<M>(&self, args: M::Args) -> PipelineResult<()>
    where
        M: BoundMiddleware<Req, Res>,
    {
        self.register(builder::from_bound_with::<Req, Res, M>(args))
    }
}

impl<Req, Res> fmt::Debug for Pipeline<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            State::Pending(registrations) => format!("pending({})", registrations.len()),
            State::Compiled => "compiled".to_string(),
            State::Failed(_) => "failed".to_string(),
        };
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
