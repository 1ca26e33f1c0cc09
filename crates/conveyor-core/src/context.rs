//! Invocation context types.
//!
//! A [`Context`] is created by the pipeline for exactly one invocation and
//! dropped when that invocation ends. It carries the request, the response
//! slot, correlation data, the cancellation signal, an ancillary data bag and
//! the invocation's scoped service resolver.

use crate::cancellation::CancellationSignal;
use crate::di::{Container, Resolver, ServiceProvider, ServiceScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each invocation, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for log correlation.
///
/// # Example
///
/// ```
/// use conveyor_core::InvocationId;
///
/// let first = InvocationId::new();
/// let second = InvocationId::new();
/// assert_ne!(first, second);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Creates a new unique invocation ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an `InvocationId` from an existing UUID.
    ///
    /// Useful when a host already assigned a correlation id to the event.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for InvocationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<InvocationId> for Uuid {
    fn from(id: InvocationId) -> Self {
        id.0
    }
}

type DataBag = HashMap<String, Box<dyn Any + Send + Sync>>;

/// Per-invocation context that flows through the middleware chain.
///
/// The request is fixed at construction. The response starts unset and may
/// be written any number of times while the chain runs; whatever is in the
/// slot when the chain returns is what the caller receives.
///
/// # Example
///
/// ```
/// use conveyor_core::Context;
///
/// let mut ctx: Context<String, String> = Context::for_request("Hello".to_string());
/// assert!(ctx.response().is_none());
///
/// ctx.set_response(ctx.request().to_uppercase());
/// assert_eq!(ctx.response().map(String::as_str), Some("HELLO"));
/// ```
pub struct Context<Req, Res> {
    /// Unique identifier for this invocation.
    id: InvocationId,

    request: Req,

    response: Option<Res>,

    /// Wall-clock capture time.
    timestamp: DateTime<Utc>,

    /// Monotonic capture time, used for `elapsed()`.
    started_at: Instant,

    cancellation: CancellationSignal,

    /// Allocated on first insert.
    data: Option<DataBag>,

    services: Arc<dyn ServiceScope>,
}

impl<Req, Res> Context<Req, Res> {
    /// Creates a context for one invocation.
    #[must_use]
    pub fn new(
        request: Req,
        services: Arc<dyn ServiceScope>,
        cancellation: CancellationSignal,
    ) -> Self {
        Self {
            id: InvocationId::new(),
            request,
            response: None,
            timestamp: Utc::now(),
            started_at: Instant::now(),
            cancellation,
            data: None,
            services,
        }
    }

    /// Creates a context backed by an empty service scope and a signal that
    /// never fires.
    ///
    /// Handy for unit-testing a single middleware outside a pipeline.
    #[must_use]
    pub fn for_request(request: Req) -> Self {
        let scope = Arc::new(Container::new()).create_scope();
        Self::new(request, scope, CancellationSignal::never())
    }

    /// Replaces the generated id with one supplied by the host.
    #[must_use]
    pub fn with_id(mut self, id: InvocationId) -> Self {
        self.id = id;
        self
    }

    /// Returns the invocation ID.
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Returns the request.
    #[must_use]
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// Returns the current response, if one has been set.
    #[must_use]
    pub fn response(&self) -> Option<&Res> {
        self.response.as_ref()
    }

    /// Returns a mutable reference to the current response, if set.
    pub fn response_mut(&mut self) -> Option<&mut Res> {
        self.response.as_mut()
    }

    /// Sets or overwrites the response.
    pub fn set_response(&mut self, response: Res) {
        self.response = Some(response);
    }

    /// Removes and returns the response, leaving the slot unset.
    pub fn take_response(&mut self) -> Option<Res> {
        self.response.take()
    }

    /// Returns `true` if a response has been set.
    #[must_use]
    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Returns when this context was created (wall clock).
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the elapsed time since this context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the cancellation signal for this invocation.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Shorthand for `self.cancellation().is_cancelled()`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the resolver scoped to this invocation.
    #[must_use]
    pub fn services(&self) -> &dyn Resolver {
        self.services.as_resolver()
    }

    /// Returns the scope handle itself.
    #[must_use]
    pub fn scope(&self) -> &Arc<dyn ServiceScope> {
        &self.services
    }

    /// Stores a value in the data bag under `key`, replacing any previous
    /// value regardless of its type.
    ///
    /// # Example
    ///
    /// ```
    /// use conveyor_core::Context;
    ///
    /// let mut ctx: Context<(), ()> = Context::for_request(());
    /// ctx.set_data("attempt", 3_u32);
    ///
    /// assert_eq!(ctx.data::<u32>("attempt"), Some(&3));
    /// assert_eq!(ctx.data::<String>("attempt"), None);
    /// ```
    pub fn set_data<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.data
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), Box::new(value));
    }

    /// Retrieves a value from the data bag.
    ///
    /// Returns `None` if the key is absent or holds a different type.
    #[must_use]
    pub fn data<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.data
            .as_ref()
            .and_then(|bag| bag.get(key))
            .and_then(|v| v.downcast_ref())
    }

    /// Retrieves a mutable value from the data bag.
    pub fn data_mut<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.data
            .as_mut()
            .and_then(|bag| bag.get_mut(key))
            .and_then(|v| v.downcast_mut())
    }

    /// Removes and returns a value from the data bag.
    ///
    /// If the stored value has a different type it is left in place and
    /// `None` is returned.
    pub fn remove_data<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<T> {
        let bag = self.data.as_mut()?;
        if !bag.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        bag.remove(key)
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if the data bag holds any value under `key`.
    #[must_use]
    pub fn contains_data(&self, key: &str) -> bool {
        self.data.as_ref().is_some_and(|bag| bag.contains_key(key))
    }

    /// Consumes the context and returns the request and the response slot.
    #[must_use]
    pub fn into_parts(self) -> (Req, Option<Res>) {
        (self.request, self.response)
    }
}

impl<Req: fmt::Debug, Res: fmt::Debug> fmt::Debug for Context<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("timestamp", &self.timestamp)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("data_keys", &self.data.as_ref().map_or(0, HashMap::len))
            .finish_non_exhaustive()
    }
}
