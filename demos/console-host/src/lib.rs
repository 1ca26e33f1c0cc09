//! Conveyor console host.
//!
//! Reads one request per line, runs it through a pipeline and writes the
//! response. The pipeline is assembled from the built-in stages plus a few
//! application middleware:
//!
//! ```text
//! ErrorHandling → Logging → Metrics → RejectBlank → Sleep → Transform → terminal
//! ```
//!
//! - `RejectBlank` fails blank lines, which the error-handling stage turns
//!   into an `error: ...` response.
//! - `Sleep` handles `sleep <ms>` lines and observes cancellation, so a
//!   configured timeout or Ctrl-C ends it early.
//! - `Transform` is constructor-injected with the configured mode and
//!   resolves a per-invocation line stamp from the invocation scope.

#![doc(html_root_url = "https://docs.rs/conveyor-console-host/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod cli;

pub use app::{build_pipeline, run_lines, services, Mode};
pub use cli::Args;

/// Host version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
