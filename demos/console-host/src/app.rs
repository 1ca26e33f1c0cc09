//! Pipeline assembly and the line loop.

use conveyor::config::ConveyorConfig;
use conveyor::core::di::{Container, InjectionError, Lifetime, ResolverExt};
use conveyor::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::Dispatch;

/// Line transformation applied by the `Transform` middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Unchanged.
    #[default]
    Echo,
    /// Uppercased.
    Upper,
    /// Lowercased.
    Lower,
    /// Characters reversed.
    Reverse,
}

impl Mode {
    fn apply(self, line: &str) -> String {
        match self {
            Self::Echo => line.to_string(),
            Self::Upper => line.to_uppercase(),
            Self::Lower => line.to_lowercase(),
            Self::Reverse => line.chars().rev().collect(),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "upper" => Ok(Self::Upper),
            "lower" => Ok(Self::Lower),
            "reverse" => Ok(Self::Reverse),
            other => Err(format!(
                "unknown mode `{other}`, expected echo, upper, lower or reverse"
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Echo => "echo",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Reverse => "reverse",
        };
        f.write_str(name)
    }
}

/// Singleton: the mode chosen on the command line.
#[derive(Debug)]
pub struct TransformSettings {
    mode: Mode,
}

/// Singleton: counts lines handed to the pipeline.
#[derive(Debug, Default)]
pub struct LineCounter {
    next: AtomicU64,
}

impl LineCounter {
    fn take(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Scoped: the number of the line being processed.
#[derive(Debug)]
pub struct LineStamp {
    number: u64,
}

/// Builds the service container for the host.
pub fn services(mode: Mode) -> Container {
    let mut container = Container::new();
    container.register(Arc::new(TransformSettings { mode }));
    container.register(Arc::new(LineCounter::default()));
    container.register_factory(Lifetime::Scoped, |resolver| {
        let counter = resolver.resolve_required::<LineCounter>()?;
        Ok::<_, InjectionError>(LineStamp {
            number: counter.take(),
        })
    });
    container
}

struct Transform {
    next: Next<String, String>,
    mode: Mode,
}

impl BoundMiddleware<String, String> for Transform {
    type Args = Inject<TransformSettings>;
    type Deps = Inject<LineStamp>;

    fn new(next: Next<String, String>, settings: Inject<TransformSettings>) -> Self {
        Self {
            next,
            mode: settings.mode,
        }
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut Context<String, String>,
        stamp: Inject<LineStamp>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let body = format!("{}: {}", stamp.number, self.mode.apply(ctx.request()));
            ctx.set_response(body);
            self.next.run(ctx).await
        })
    }
}

struct Sleep;

impl Middleware<String, String> for Sleep {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context<String, String>,
        next: Next<String, String>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Some(arg) = ctx.request().trim().strip_prefix("sleep ") else {
                return next.run(ctx).await;
            };
            let millis: u64 = arg.trim().parse().map_err(|e| {
                PipelineError::middleware(anyhow::anyhow!("bad sleep duration: {e}"))
            })?;

            let finished = tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(millis)) => true,
                () = ctx.cancellation().cancelled() => false,
            };
            if !finished {
                return Err(PipelineError::Cancelled);
            }

            ctx.set_response(format!("slept {millis}ms"));
            Ok(())
        })
    }
}

fn reject_blank<'a>(
    ctx: &'a mut Context<String, String>,
    next: Next<String, String>,
) -> BoxFuture<'a, Outcome> {
    Box::pin(async move {
        if ctx.request().trim().is_empty() {
            return Err(PipelineError::middleware(anyhow::anyhow!("empty input")));
        }
        next.run(ctx).await
    })
}

/// Assembles the host pipeline.
///
/// # Errors
///
/// Returns a configuration error if the configured timeout is invalid or the
/// pipeline fails to compile.
pub fn build_pipeline(
    config: &ConveyorConfig,
    mode: Mode,
    dispatch: Dispatch,
) -> PipelineResult<Pipeline<String, String>> {
    let name = config.pipeline.name.clone();

    let pipeline = Pipeline::<String, String>::builder(Arc::new(services(mode)))
        .name(name.clone())
        .configure(config)?
        .use_stage(
            ErrorHandlingMiddleware::new(|error: &PipelineError| format!("error: {error}"))
                .handle_cancellation(true),
        )
        .use_stage(LoggingMiddleware::new(dispatch).pipeline(name.clone()))
        .use_stage(MetricsMiddleware::new(name))
        .use_fn(reject_blank)
        .use_stage(Sleep)
        .use_middleware::<Transform>()
        .build();

    pipeline.prepare()?;
    Ok(pipeline)
}

/// Feeds every line of `input` through `pipeline`, writing responses to
/// `output`.
///
/// Stops at end of input or once `cancellation` fires. Returns the number of
/// lines processed.
///
/// # Errors
///
/// Returns I/O errors and any pipeline error that escapes the error-handling
/// stage.
pub async fn run_lines<R, W>(
    pipeline: &Pipeline<String, String>,
    input: R,
    mut output: W,
    cancellation: CancellationSignal,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut processed = 0;

    while !cancellation.is_cancelled() {
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let response = pipeline
            .invoke_with_cancellation(line, cancellation.clone())
            .await?;
        processed += 1;

        if let Some(response) = response {
            output.write_all(response.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
    }

    tracing::debug!(processed, "input finished");
    Ok(processed)
}
