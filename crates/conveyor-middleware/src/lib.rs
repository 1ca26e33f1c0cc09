//! # Conveyor Middleware
//!
//! Middleware composition, compilation and invocation for Conveyor.
//!
//! A pipeline is assembled from middleware registered in order. The first
//! registration is the outermost: it runs first on the way in and last on
//! the way out.
//!
//! ```text
//! invoke(request)
//!   │
//!   ├─ new scope + new Context + timeout
//!   ▼
//! M1 ─→ M2 ─→ M3 ─→ terminal
//!                      │
//! M1 ←─ M2 ←─ M3 ←─────┘
//!   │
//!   ├─ dispose scope
//!   ▼
//! Ok(ctx.response)
//! ```
//!
//! ## Registration styles
//!
//! | Method | Registers |
//! |--------|-----------|
//! | `use_unit` | A raw `FnOnce(Next) -> Next` transform |
//! | `use_fn` | An inline `(ctx, next)` closure |
//! | `use_stage` | A [`Middleware`] instance |
//! | `use_middleware` | A [`BoundMiddleware`] type, constructor args injected |
//! | `use_middleware_with` | A [`BoundMiddleware`] type, explicit constructor args |
//!
//! ## Key Features
//!
//! - **Lazy compilation**: the chain is built once, on first invoke or on
//!   [`Pipeline::prepare`]
//! - **Scoped services**: each invocation gets its own service scope
//! - **Cooperative cancellation**: timeouts and caller tokens surface as
//!   `Err(PipelineError::Cancelled)`
//! - **Built-in stages**: error handling, logging and metrics in [`stages`]
//!
//! ## Example
//!
//! ```
//! use conveyor_core::di::Container;
//! use conveyor_middleware::Pipeline;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let pipeline = Pipeline::<String, String>::builder(Arc::new(Container::new()))
//!     .use_fn(|ctx, next| {
//!         Box::pin(async move {
//!             let upper = ctx.request().to_uppercase();
//!             ctx.set_response(upper);
//!             next.run(ctx).await
//!         })
//!     })
//!     .use_fn(|ctx, next| {
//!         Box::pin(async move {
//!             let lower = ctx.request().to_lowercase();
//!             ctx.set_response(lower);
//!             next.run(ctx).await
//!         })
//!     })
//!     .build();
//!
//! // Last writer wins.
//! let response = pipeline.invoke("Hello, World!".to_string()).await.unwrap();
//! assert_eq!(response.as_deref(), Some("hello, world!"));
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/conveyor-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod adapter;
mod builder;
pub mod middleware;
pub mod pipeline;
pub mod stages;

// Re-export main types at crate root
pub use adapter::BoundMiddleware;
pub use builder::PipelineBuilder;
pub use middleware::{BoxFuture, FnMiddleware, Middleware, Next};
pub use pipeline::{Pipeline, PipelineOptions, DEFAULT_PIPELINE_NAME};
