//! # Conveyor Core
//!
//! Core types for the Conveyor request/response pipeline.
//!
//! This crate provides the foundational types used throughout Conveyor:
//!
//! - [`Context`] - Per-invocation carrier of request, response, id, data and services
//! - [`InvocationId`] - UUID v7 invocation identifier
//! - [`CancellationSignal`] / [`CancellationSource`] - Cooperative cancellation and timeouts
//! - [`di`] - Service resolution contracts and the reference [`di::Container`]
//! - [`config`] - The configuration-source contract the pipeline reads its timeout from
//! - [`PipelineError`] - Standard error type
//! - [`Void`] - Response marker for pipelines that produce nothing

#![doc(html_root_url = "https://docs.rs/conveyor-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod cancellation;
pub mod config;
mod context;
pub mod di;
mod error;

pub use cancellation::{CancellationSignal, CancellationSource};
pub use context::{Context, InvocationId};
pub use error::{ErrorCategory, Outcome, PipelineError, PipelineResult};

/// Response type for pipelines that intentionally produce no value.
///
/// A `Pipeline<Event, Void>` still runs every middleware; its invocation
/// returns `Ok(None)` unless some middleware explicitly sets `Void`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Void;
