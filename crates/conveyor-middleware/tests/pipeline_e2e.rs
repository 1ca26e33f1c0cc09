//! End-to-end pipeline integration tests.
//!
//! These tests drive complete pipelines through `invoke` and verify:
//!
//! 1. Ordering - registration order in, reverse order out
//! 2. Response semantics - last writer wins, short-circuit, empty pipeline
//! 3. Compilation - lazy, exactly once, frozen afterwards
//! 4. Injection - constructor args from the root, per-call deps per scope
//! 5. Cancellation - timeouts and caller tokens
//! 6. Concurrency - one prepared pipeline shared across tasks

use conveyor_core::config::REQUEST_TIMEOUT_KEY;
use conveyor_core::di::{Container, Inject, Lifetime};
use conveyor_core::{
    CancellationSource, Context, ErrorCategory, Outcome, PipelineError, Void,
};
use conveyor_middleware::stages::{ErrorHandlingMiddleware, LoggingMiddleware, MetricsMiddleware};
use conveyor_middleware::{BoundMiddleware, BoxFuture, Middleware, Next, Pipeline};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Trace = Arc<Mutex<Vec<String>>>;

fn empty_services() -> Arc<Container> {
    Arc::new(Container::new())
}

/// Records `name:pre` before delegating and `name:post` after.
struct Recorder {
    name: String,
    trace: Trace,
}

impl Recorder {
    fn new(name: impl Into<String>, trace: &Trace) -> Self {
        Self {
            name: name.into(),
            trace: Arc::clone(trace),
        }
    }
}

impl Middleware<String, String> for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<String, String>,
        next: Next<String, String>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            self.trace.lock().push(format!("{}:pre", self.name));
            let outcome = next.run(ctx).await;
            self.trace.lock().push(format!("{}:post", self.name));
            outcome
        })
    }
}

fn uppercase(
    ctx: &mut Context<String, String>,
    next: Next<String, String>,
) -> BoxFuture<'_, Outcome> {
    Box::pin(async move {
        let upper = ctx.request().to_uppercase();
        ctx.set_response(upper);
        next.run(ctx).await
    })
}

fn lowercase(
    ctx: &mut Context<String, String>,
    next: Next<String, String>,
) -> BoxFuture<'_, Outcome> {
    Box::pin(async move {
        let lower = ctx.request().to_lowercase();
        ctx.set_response(lower);
        next.run(ctx).await
    })
}

/// Bound middleware taking its prefix as an explicit constructor argument.
struct PrefixMiddleware {
    next: Next<String, String>,
    prefix: String,
}

impl BoundMiddleware<String, String> for PrefixMiddleware {
    type Args = String;
    type Deps = ();

    fn new(next: Next<String, String>, prefix: String) -> Self {
        Self { next, prefix }
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut Context<String, String>,
        _deps: (),
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let body = format!("{}-{}", self.prefix, ctx.request().to_lowercase());
            ctx.set_response(body);
            self.next.run(ctx).await
        })
    }
}

#[derive(Debug)]
struct Constructions {
    count: AtomicUsize,
}

#[derive(Debug)]
struct RequestState {
    serial: usize,
}

/// Bound middleware with a root-resolved constructor dependency and a
/// scoped per-call dependency.
struct StateStamp {
    next: Next<String, String>,
}

impl BoundMiddleware<String, String> for StateStamp {
    type Args = Inject<Constructions>;
    type Deps = Inject<RequestState>;

    fn new(next: Next<String, String>, constructions: Inject<Constructions>) -> Self {
        constructions.count.fetch_add(1, Ordering::SeqCst);
        Self { next }
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut Context<String, String>,
        state: Inject<RequestState>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let mut serials: Vec<usize> = ctx.remove_data("serials").unwrap_or_default();
            serials.push(state.serial);
            ctx.set_data("serials", serials.clone());
            ctx.set_response(
                serials
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            );
            self.next.run(ctx).await
        })
    }
}

fn stateful_services() -> (Arc<Container>, Arc<Constructions>) {
    let constructions = Arc::new(Constructions {
        count: AtomicUsize::new(0),
    });
    let serial = Arc::new(AtomicUsize::new(0));

    let mut container = Container::new();
    container.register(Arc::clone(&constructions));
    container.register_factory(Lifetime::Scoped, move |_| {
        Ok(RequestState {
            serial: serial.fetch_add(1, Ordering::SeqCst),
        })
    });
    (Arc::new(container), constructions)
}

// ============================================================================
// Responses
// ============================================================================

#[tokio::test]
async fn empty_pipeline_returns_none() {
    let pipeline = Pipeline::<String, String>::builder(empty_services()).build();

    let response = pipeline.invoke("Hello, World!".to_string()).await.unwrap();
    assert!(response.is_none());
}

#[tokio::test]
async fn single_middleware_sets_response() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_fn(uppercase)
        .build();

    let response = pipeline.invoke("Hello, World!".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("HELLO, WORLD!"));
}

#[tokio::test]
async fn last_registered_writer_wins() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_fn(uppercase)
        .use_fn(lowercase)
        .build();

    let response = pipeline.invoke("Hello, World!".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("hello, world!"));
}

#[tokio::test]
async fn bound_middleware_receives_constructor_argument() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_middleware_with::<PrefixMiddleware>("prefix".to_string())
        .build();

    let response = pipeline.invoke("World".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("prefix-world"));
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_invocation() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .timeout(Duration::from_millis(1))
        .use_fn(|ctx: &mut Context<String, String>, next| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if ctx.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                ctx.set_response("too late".to_string());
                next.run(ctx).await
            })
        })
        .build();

    let outcome = pipeline.invoke("slow".to_string()).await;
    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
}

// ============================================================================
// Laws
// ============================================================================

#[tokio::test]
async fn ordering_law_pre_in_order_post_in_reverse() {
    let trace = Trace::default();
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_stage(Recorder::new("m1", &trace))
        .use_stage(Recorder::new("m2", &trace))
        .use_stage(Recorder::new("m3", &trace))
        .build();

    pipeline.invoke("x".to_string()).await.unwrap();

    assert_eq!(
        *trace.lock(),
        vec!["m1:pre", "m2:pre", "m3:pre", "m3:post", "m2:post", "m1:post"]
    );
}

#[tokio::test]
async fn short_circuit_law_skips_downstream() {
    let trace = Trace::default();
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_stage(Recorder::new("outer", &trace))
        .use_fn(|ctx: &mut Context<String, String>, _next| {
            ctx.set_response("cached".to_string());
            Box::pin(std::future::ready(Ok(())))
        })
        .use_stage(Recorder::new("inner", &trace))
        .build();

    let response = pipeline.invoke("x".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("cached"));
    assert_eq!(*trace.lock(), vec!["outer:pre", "outer:post"]);
}

#[tokio::test]
async fn empty_pipeline_law_reports_cancellation() {
    let pipeline = Pipeline::<String, String>::builder(empty_services()).build();
    let source = CancellationSource::new();
    source.cancel();

    let outcome = pipeline
        .invoke_with_cancellation("x".to_string(), source.signal())
        .await;
    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
}

#[tokio::test]
async fn use_unit_transform_wraps_rest_of_chain() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_unit(|next: Next<String, String>| {
            Next::new(move |ctx: &mut Context<String, String>| {
                let next = next.clone();
                Box::pin(async move {
                    let outcome = next.run(ctx).await;
                    if let Some(body) = ctx.response_mut() {
                        body.push('!');
                    }
                    outcome
                })
            })
        })
        .use_fn(uppercase)
        .build();

    let response = pipeline.invoke("hey".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("HEY!"));
}

// ============================================================================
// Compilation
// ============================================================================

#[tokio::test]
async fn compilation_is_lazy_and_happens_once() {
    let (services, constructions) = stateful_services();
    let pipeline = Pipeline::<String, String>::builder(services)
        .use_middleware::<StateStamp>()
        .build();

    assert!(!pipeline.is_compiled());
    assert_eq!(constructions.count.load(Ordering::SeqCst), 0);

    for _ in 0..5 {
        pipeline.invoke("x".to_string()).await.unwrap();
    }

    assert!(pipeline.is_compiled());
    assert_eq!(constructions.count.load(Ordering::SeqCst), 1);
}

#[test]
fn prepare_returns_the_same_chain() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_fn(uppercase)
        .build();

    let first = pipeline.prepare().unwrap();
    let second = pipeline.prepare().unwrap();
    assert!(first.ptr_eq(&second));
}

#[tokio::test]
async fn registration_after_compilation_is_invalid_state() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_fn(uppercase)
        .build();

    pipeline.use_fn(lowercase).unwrap();
    pipeline.invoke("x".to_string()).await.unwrap();

    let err = pipeline.use_fn(uppercase).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidState);
    assert!(pipeline
        .use_middleware_with::<PrefixMiddleware>("p".to_string())
        .is_err());

    // The registration made before compiling took effect.
    let response = pipeline.invoke("MiXeD".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("mixed"));
}

// ============================================================================
// Injection
// ============================================================================

#[tokio::test]
async fn missing_invoke_dependency_fails_before_any_request() {
    let mut container = Container::new();
    container.register(Arc::new(Constructions {
        count: AtomicUsize::new(0),
    }));
    let pipeline = Pipeline::<String, String>::builder(Arc::new(container))
        .use_middleware::<StateStamp>()
        .build();

    let err = pipeline.prepare().unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("RequestState"));

    let err = pipeline.invoke("x".to_string()).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn missing_constructor_dependency_fails_at_compile() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_middleware::<StateStamp>()
        .build();

    let err = pipeline.invoke("x".to_string()).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("Constructions"));
}

#[tokio::test]
async fn scoped_dependencies_are_per_invocation() {
    let (services, _) = stateful_services();
    let pipeline = Pipeline::<String, String>::builder(services)
        .use_middleware::<StateStamp>()
        .use_middleware::<StateStamp>()
        .build();

    let first = pipeline.invoke("x".to_string()).await.unwrap().unwrap();
    let second = pipeline.invoke("x".to_string()).await.unwrap().unwrap();

    // Both stages of one invocation see the same scoped instance.
    assert_eq!(first, "0,0");
    assert_eq!(second, "1,1");
}

#[tokio::test]
async fn scope_is_disposed_after_each_invocation() {
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct UsesTracked {
        next: Next<String, String>,
    }

    impl BoundMiddleware<String, String> for UsesTracked {
        type Args = ();
        type Deps = Inject<Tracked>;

        fn new(next: Next<String, String>, (): ()) -> Self {
            Self { next }
        }

        fn invoke<'a>(
            &'a self,
            ctx: &'a mut Context<String, String>,
            _tracked: Inject<Tracked>,
        ) -> BoxFuture<'a, Outcome> {
            self.next.run(ctx)
        }
    }

    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    let mut container = Container::new();
    container.register_factory(Lifetime::Scoped, move |_| Ok(Tracked(Arc::clone(&counter))));

    let pipeline = Pipeline::<String, String>::builder(Arc::new(container))
        .use_middleware::<UsesTracked>()
        .build();

    pipeline.invoke("a".to_string()).await.unwrap();
    pipeline.invoke("b".to_string()).await.unwrap();
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Cancellation and errors
// ============================================================================

#[tokio::test]
async fn caller_token_cancels_in_flight_invocation() {
    let pipeline = Arc::new(
        Pipeline::<String, String>::builder(empty_services())
            .use_fn(|ctx: &mut Context<String, String>, next| {
                Box::pin(async move {
                    ctx.cancellation().cancelled().await;
                    ctx.cancellation().check()?;
                    next.run(ctx).await
                })
            })
            .build(),
    );

    let source = CancellationSource::new();
    let task = {
        let pipeline = Arc::clone(&pipeline);
        let signal = source.signal();
        tokio::spawn(async move {
            pipeline
                .invoke_with_cancellation("wait".to_string(), signal)
                .await
        })
    };

    tokio::task::yield_now().await;
    source.cancel();

    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_while_caller_token_is_live() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .timeout(Duration::from_millis(10))
        .use_fn(|ctx: &mut Context<String, String>, next| {
            Box::pin(async move {
                ctx.cancellation().cancelled().await;
                ctx.cancellation().check()?;
                ctx.set_response("unreachable".to_string());
                next.run(ctx).await
            })
        })
        .build();

    let source = CancellationSource::new();
    let started = tokio::time::Instant::now();

    let outcome = pipeline
        .invoke_with_cancellation("wait".to_string(), source.signal())
        .await;

    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert!(!source.is_cancelled());
}

#[tokio::test]
async fn negative_configured_timeout_starts_cancelled() {
    let config: HashMap<String, String> =
        [(REQUEST_TIMEOUT_KEY.to_string(), "-1".to_string())].into();

    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .configure(&config)
        .unwrap()
        .build();

    assert_eq!(pipeline.timeout(), Some(Duration::ZERO));
    let outcome = pipeline.invoke("x".to_string()).await;
    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
}

#[tokio::test]
async fn middleware_errors_propagate_unchanged() {
    let trace = Trace::default();
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_stage(Recorder::new("outer", &trace))
        .use_fn(|_ctx: &mut Context<String, String>, _next| {
            Box::pin(async { Err(PipelineError::middleware(anyhow::anyhow!("disk full"))) })
        })
        .build();

    let err = pipeline.invoke("x".to_string()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Middleware);
    assert!(err.to_string().contains("disk full"));
    assert_eq!(*trace.lock(), vec!["outer:pre", "outer:post"]);
}

#[tokio::test]
async fn error_handling_stage_produces_response() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .use_stage(ErrorHandlingMiddleware::new(|error: &PipelineError| {
            format!("error: {}", error.category())
        }))
        .use_fn(|_ctx: &mut Context<String, String>, _next| {
            Box::pin(async { Err(PipelineError::middleware(anyhow::anyhow!("nope"))) })
        })
        .build();

    let response = pipeline.invoke("x".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("error: middleware"));
}

#[tokio::test]
async fn builtin_stages_compose() {
    let pipeline = Pipeline::<String, String>::builder(empty_services())
        .name("composed")
        .use_stage(ErrorHandlingMiddleware::new(|error: &PipelineError| {
            error.to_string()
        }))
        .use_stage(LoggingMiddleware::current().pipeline("composed"))
        .use_stage(MetricsMiddleware::new("composed"))
        .use_fn(uppercase)
        .build();

    assert_eq!(pipeline.name(), "composed");
    let response = pipeline.invoke("quiet".to_string()).await.unwrap();
    assert_eq!(response.as_deref(), Some("QUIET"));
}

#[tokio::test]
async fn void_pipeline_runs_without_response() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let pipeline = Pipeline::<String, Void>::builder(empty_services())
        .use_fn(move |ctx, next| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { next.run(ctx).await })
        })
        .build();

    let response = pipeline.invoke("event".to_string()).await.unwrap();
    assert!(response.is_none());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invocations_are_isolated() {
    let (services, constructions) = stateful_services();
    let ids = Arc::new(Mutex::new(HashSet::new()));
    let recorded = Arc::clone(&ids);

    let pipeline = Arc::new(
        Pipeline::<String, String>::builder(services)
            .use_fn(move |ctx: &mut Context<String, String>, next| {
                recorded.lock().insert(ctx.id());
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    let echoed = ctx.request().clone();
                    ctx.set_response(echoed);
                    next.run(ctx).await
                })
            })
            .use_middleware::<StateStamp>()
            .build(),
    );

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.invoke(format!("req-{i}")).await })
        })
        .collect();

    let mut serials = HashSet::new();
    for task in tasks {
        let body = task.await.unwrap().unwrap().unwrap();
        // StateStamp overwrites the echo with the scoped serial.
        assert!(serials.insert(body));
    }

    assert_eq!(serials.len(), 32);
    assert_eq!(ids.lock().len(), 32);
    assert_eq!(constructions.count.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Property tests
// ============================================================================

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn expected_trace(n: usize) -> Vec<String> {
        let pre = (0..n).map(|i| format!("m{i}:pre"));
        let post = (0..n).rev().map(|i| format!("m{i}:post"));
        pre.chain(post).collect()
    }

    proptest! {
        #[test]
        fn ordering_law_holds_for_any_length(n in 0usize..12) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let trace = Trace::default();
            let mut builder = Pipeline::<String, String>::builder(empty_services());
            for i in 0..n {
                builder = builder.use_stage(Recorder::new(format!("m{i}"), &trace));
            }
            let pipeline = builder.build();

            let response = runtime.block_on(pipeline.invoke("x".to_string())).unwrap();
            prop_assert!(response.is_none());
            prop_assert_eq!(trace.lock().clone(), expected_trace(n));
        }
    }
}
