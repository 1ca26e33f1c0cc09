//! Cooperative cancellation.
//!
//! A [`CancellationSignal`] is the read side handed to every middleware
//! through the context. It becomes signaled when:
//!
//! - its [`CancellationSource`] calls [`cancel`](CancellationSource::cancel),
//! - its deadline (the per-invocation timeout) passes, or
//! - a linked parent signal (a caller-supplied token) becomes signaled.
//!
//! Signals are monotonic: once [`is_cancelled`](CancellationSignal::is_cancelled)
//! returns `true` it keeps returning `true`. Nothing is interrupted; middleware
//! polls the signal and returns [`PipelineError::Cancelled`] when it chooses to
//! honor it.
//!
//! # Example
//!
//! ```rust
//! use conveyor_core::CancellationSource;
//!
//! let source = CancellationSource::new();
//! let signal = source.signal();
//! assert!(!signal.is_cancelled());
//!
//! source.cancel();
//! assert!(signal.is_cancelled());
//! assert!(signal.check().is_err());
//! ```

use crate::error::PipelineError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Inner {
    /// Latched once cancellation has been observed from any source.
    triggered: AtomicBool,

    /// Wakes tasks parked in `cancelled()` when the source fires.
    notify: Notify,

    deadline: Option<Instant>,

    parent: Option<CancellationSignal>,
}

impl Inner {
    fn new(deadline: Option<Instant>, parent: Option<CancellationSignal>) -> Self {
        Self {
            triggered: AtomicBool::new(false),
            notify: Notify::new(),
            deadline,
            parent,
        }
    }
}

/// The observable side of a cancellation.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl CancellationSignal {
    /// A signal that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self {
            inner: Arc::new(Inner::new(None, None)),
        }
    }

    /// A signal that fires once `timeout` has elapsed from now.
    ///
    /// A zero timeout yields a signal that is already cancelled.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::linked(Some(timeout), None)
    }

    /// Combines an optional timeout with an optional parent signal.
    ///
    /// Whichever fires first cancels the returned signal. Without a timeout
    /// the parent is returned as-is; with neither, the result never fires.
    #[must_use]
    pub fn linked(timeout: Option<Duration>, parent: Option<CancellationSignal>) -> Self {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        match (deadline, parent) {
            (None, Some(parent)) => parent,
            (None, None) => Self::never(),
            (deadline, parent) => Self {
                inner: Arc::new(Inner::new(deadline, parent)),
            },
        }
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.triggered.load(Ordering::Acquire) {
            return true;
        }

        let expired = self.inner.deadline.is_some_and(|d| Instant::now() >= d);
        let parent_cancelled = self
            .inner
            .parent
            .as_ref()
            .is_some_and(CancellationSignal::is_cancelled);

        if expired || parent_cancelled {
            self.inner.triggered.store(true, Ordering::Release);
            return true;
        }

        false
    }

    /// Returns `Err(PipelineError::Cancelled)` if cancellation was requested.
    ///
    /// Lets middleware bail out with `?`.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time left before the deadline, if this signal has one.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns a future that completes once this signal is cancelled.
    ///
    /// Completes immediately if cancellation was already requested.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }

            let deadline = async {
                match self.inner.deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = notified => {}
                () = deadline => {}
                () = parent => {}
            }

            self.inner.triggered.store(true, Ordering::Release);
        })
    }

    /// Returns `true` if both handles observe the same underlying state.
    #[must_use]
    pub fn same_as(&self, other: &CancellationSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// The triggering side of a cancellation.
///
/// Hosts create a source, pass [`signal`](Self::signal) into the pipeline,
/// and call [`cancel`](Self::cancel) when the platform asks them to stop.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    signal: CancellationSignal,
}

impl CancellationSource {
    /// Creates a new, untriggered source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: CancellationSignal::never(),
        }
    }

    /// Returns the signal observed by consumers.
    #[must_use]
    pub fn signal(&self) -> CancellationSignal {
        self.signal.clone()
    }

    /// Requests cancellation.
    ///
    /// Calling this multiple times is safe and idempotent.
    pub fn cancel(&self) {
        let inner = &self.signal.inner;
        if inner
            .triggered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            inner.notify.notify_waiters();
        }
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_is_not_cancelled() {
        let signal = CancellationSignal::never();
        assert!(!signal.is_cancelled());
        assert!(signal.check().is_ok());
        assert!(signal.remaining().is_none());
    }

    #[test]
    fn test_source_cancel_is_idempotent() {
        let source = CancellationSource::new();
        let signal = source.signal();

        source.cancel();
        source.cancel();

        assert!(source.is_cancelled());
        assert!(signal.is_cancelled());
        assert!(matches!(signal.check(), Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_zero_timeout_is_already_cancelled() {
        let signal = CancellationSignal::with_timeout(Duration::ZERO);
        assert!(signal.is_cancelled());
        assert_eq!(signal.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_linked_without_timeout_reuses_parent() {
        let source = CancellationSource::new();
        let parent = source.signal();
        let linked = CancellationSignal::linked(None, Some(parent.clone()));
        assert!(linked.same_as(&parent));
    }

    #[test]
    fn test_linked_parent_cancels_child() {
        let source = CancellationSource::new();
        let linked =
            CancellationSignal::linked(Some(Duration::from_secs(3600)), Some(source.signal()));

        assert!(!linked.is_cancelled());
        source.cancel();
        assert!(linked.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_and_stays_fired() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(50));
        assert!(!signal.is_cancelled());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(signal.is_cancelled());
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_future_completes_at_deadline() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(10));
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes_on_source() {
        let source = CancellationSource::new();
        let signal = source.signal();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.is_cancelled()
        });

        tokio::task::yield_now().await;
        source.cancel();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_cancelled_future_is_pending_until_cancel() {
        let source = CancellationSource::new();
        let signal = source.signal();

        let mut fut = tokio_test::task::spawn(signal.cancelled());
        assert!(fut.poll().is_pending());

        source.cancel();
        assert!(fut.is_woken());
        assert!(fut.poll().is_ready());
    }
}
