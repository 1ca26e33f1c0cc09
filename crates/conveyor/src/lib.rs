//! # Conveyor
//!
//! **Composable async middleware pipelines for host-free execution**
//!
//! Conveyor runs a single logical request/response exchange through a chain
//! of middleware, outside any web server: serverless functions, console
//! tools, queue consumers.
//!
//! - **Onion ordering** – Registration order on the way in, reverse on the way out
//! - **Lazy compilation** – The chain is built once and shared by every invocation
//! - **Scoped services** – Each invocation resolves dependencies from its own scope
//! - **Cooperative cancellation** – Timeouts and caller tokens end in `PipelineError::Cancelled`
//!
//! ## Quick Start
//!
//! ```
//! use conveyor::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let pipeline = Pipeline::<String, String>::builder(Arc::new(Container::new()))
//!     .use_fn(|ctx, next| {
//!         Box::pin(async move {
//!             let greeting = format!("hello, {}", ctx.request());
//!             ctx.set_response(greeting);
//!             next.run(ctx).await
//!         })
//!     })
//!     .build();
//!
//! let response = pipeline.invoke("world".to_string()).await.unwrap();
//! assert_eq!(response.as_deref(), Some("hello, world"));
//! # });
//! ```
//!
//! ## Architecture
//!
//! ```text
//! invoke(request) → [M1] → [M2] → ... → terminal
//!                                          ↓
//! Option<response> ← [M1] ← [M2] ← ... ←───┘
//! ```
//!
//! ## Crates
//!
//! | Module | Crate | Contents |
//! |--------|-------|----------|
//! | [`core`] | `conveyor-core` | Context, cancellation, DI contracts, errors |
//! | [`middleware`] | `conveyor-middleware` | Builder, pipeline, built-in stages |
//! | [`config`] | `conveyor-config` | Layered typed configuration |
//! | [`telemetry`] | `conveyor-telemetry` | Logging setup |

#![doc(html_root_url = "https://docs.rs/conveyor/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use conveyor_core as core;

// Re-export pipeline types
pub use conveyor_middleware as middleware;

// Re-export configuration types
pub use conveyor_config as config;

// Re-export logging setup
pub use conveyor_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use conveyor::prelude::*;
/// ```
pub mod prelude {
    pub use conveyor_core::{
        CancellationSignal, CancellationSource, Context, InvocationId, Outcome, PipelineError,
        PipelineResult, Void,
    };

    // Re-export DI types
    pub use conveyor_core::di::{
        Container, FromServices, Inject, Lifetime, Resolver, ResolverExt, ServiceProvider,
    };

    // Re-export configuration contract
    pub use conveyor_core::config::{ConfigSource, ConfigSourceExt, REQUEST_TIMEOUT_KEY};

    // Re-export pipeline types
    pub use conveyor_middleware::stages::{
        ErrorHandlingMiddleware, LoggingMiddleware, MetricsMiddleware,
    };
    pub use conveyor_middleware::{
        BoundMiddleware, BoxFuture, Middleware, Next, Pipeline, PipelineBuilder, PipelineOptions,
    };

    // Re-export host setup
    pub use conveyor_config::{ConfigLoader, ConveyorConfig};
    pub use conveyor_telemetry::{build_dispatch, init_logging, LogConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_prelude_builds_configured_pipeline() {
        let mut config = ConveyorConfig::default();
        config.pipeline.request_timeout_ms = Some(5_000);

        let pipeline = Pipeline::<u32, u32>::builder(Arc::new(Container::new()))
            .name(config.pipeline.name.clone())
            .configure(&config)
            .unwrap()
            .use_fn(|ctx, next| {
                Box::pin(async move {
                    let doubled = ctx.request() * 2;
                    ctx.set_response(doubled);
                    next.run(ctx).await
                })
            })
            .build();

        assert_eq!(pipeline.timeout(), Some(std::time::Duration::from_secs(5)));
        assert_eq!(pipeline.invoke(21).await.unwrap(), Some(42));
    }
}
