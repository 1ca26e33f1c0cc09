//! Dependency resolution.
//!
//! The pipeline never talks to a concrete container. It depends on three
//! capabilities, each expressed as an object-safe trait:
//!
//! - [`Resolver`]: resolve a service by type (required or optional)
//! - [`ServiceProvider`]: a root resolver that can open a per-invocation scope
//! - [`ServiceScope`]: a resolver whose lifetime is bounded by one invocation
//!
//! [`Container`] is the reference implementation. Services are registered at
//! startup with a [`Lifetime`], the container is frozen into an `Arc`, and the
//! pipeline opens one [`Scope`] per invocation.
//!
//! # Example
//!
//! ```rust
//! use conveyor_core::di::{Container, Lifetime, ResolverExt, ServiceProvider};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UnitOfWork {
//!     db: Arc<Database>,
//! }
//!
//! let mut container = Container::new();
//! container.register(Arc::new(Database { url: "postgres://localhost/db".into() }));
//! container.register_factory(Lifetime::Scoped, |r| {
//!     Ok(UnitOfWork { db: r.resolve_required::<Database>()? })
//! });
//!
//! let root = Arc::new(container);
//! let scope = Arc::clone(&root).create_scope();
//! let uow = scope.resolve_required::<UnitOfWork>().unwrap();
//! assert_eq!(uow.db.url, "postgres://localhost/db");
//! ```

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A type-erased, shareable service instance.
pub type AnyService = Arc<dyn Any + Send + Sync>;

/// A type-erased service factory.
pub type ServiceFactory =
    Arc<dyn Fn(&dyn Resolver) -> Result<AnyService, InjectionError> + Send + Sync>;

/// Error when a dependency cannot be resolved.
#[derive(Debug, Clone)]
pub struct InjectionError {
    /// The type name that could not be resolved.
    pub type_name: &'static str,
    /// The reason for the failure.
    pub reason: String,
}

impl fmt::Display for InjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to inject {}: {}", self.type_name, self.reason)
    }
}

impl std::error::Error for InjectionError {}

impl InjectionError {
    /// Creates a new injection error for a missing service.
    pub fn not_registered<T>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: "service not registered".to_string(),
        }
    }

    /// Creates a new injection error with a custom reason.
    pub fn custom<T>(reason: impl Into<String>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    fn named(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            type_name,
            reason: reason.into(),
        }
    }
}

/// How long a registered service lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance shared by every invocation for the life of the container.
    Singleton,
    /// One instance per invocation scope.
    Scoped,
}

/// Resolves services by type.
///
/// This is the object-safe core; use [`ResolverExt`] for the typed API.
pub trait Resolver: Send + Sync {
    /// Resolves a type-erased service.
    ///
    /// Returns `Ok(None)` if nothing is registered for `type_id`, and `Err`
    /// if a registration exists but could not produce an instance.
    fn resolve_any(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Option<AnyService>, InjectionError>;

    /// Returns `true` if a registration exists for `type_id`.
    ///
    /// This never instantiates anything, so it is safe to call while
    /// compiling a pipeline.
    fn is_registered(&self, type_id: TypeId) -> bool;
}

/// Typed helpers over any [`Resolver`].
pub trait ResolverExt: Resolver {
    /// Resolves an optional service.
    fn resolve<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, InjectionError> {
        match self.resolve_any(TypeId::of::<T>(), std::any::type_name::<T>())? {
            Some(service) => service
                .downcast::<T>()
                .map(Some)
                .map_err(|_| InjectionError::custom::<T>("registered instance has a different type")),
            None => Ok(None),
        }
    }

    /// Resolves a service or returns an error.
    fn resolve_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectionError> {
        self.resolve::<T>()?
            .ok_or_else(InjectionError::not_registered::<T>)
    }

    /// Checks if a service is registered.
    fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.is_registered(TypeId::of::<T>())
    }
}

impl<R: Resolver + ?Sized> ResolverExt for R {}

/// A root resolver able to open per-invocation scopes.
pub trait ServiceProvider: Resolver {
    /// Opens a new scope whose scoped services are independent from every
    /// other scope.
    fn create_scope(self: Arc<Self>) -> Arc<dyn ServiceScope>;

    /// Views this provider as a plain [`Resolver`].
    fn as_resolver(&self) -> &dyn Resolver;
}

/// A resolver bounded to a single invocation.
pub trait ServiceScope: Resolver {
    /// Releases every scoped instance held by this scope.
    ///
    /// Resolving from a disposed scope fails. Calling this twice is a no-op.
    fn dispose(&self);

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    fn is_disposed(&self) -> bool;

    /// Views this scope as a plain [`Resolver`].
    fn as_resolver(&self) -> &dyn Resolver;
}

enum Registration {
    Instance(AnyService),
    Singleton {
        factory: ServiceFactory,
        instance: Mutex<Option<AnyService>>,
    },
    Scoped(ServiceFactory),
}

/// A dependency injection container.
///
/// Services are registered once at startup, then the container is wrapped in
/// an `Arc` and handed to the pipeline as its [`ServiceProvider`].
///
/// # Thread Safety
///
/// The container is `Send + Sync`. Singleton factories run at most once per
/// successful build; if two threads race on the first resolution, the first
/// stored instance wins and the other is dropped.
#[derive(Default)]
pub struct Container {
    registrations: HashMap<TypeId, (&'static str, Registration)>,
}

impl Container {
    /// Creates a new empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Registers a ready-made singleton instance.
    ///
    /// # Example
    ///
    /// ```rust
    /// use conveyor_core::di::{Container, ResolverExt};
    /// use std::sync::Arc;
    ///
    /// struct MyService;
    ///
    /// let mut container = Container::new();
    /// container.register(Arc::new(MyService));
    /// assert!(container.contains::<MyService>());
    /// ```
    pub fn register<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.registrations.insert(
            TypeId::of::<T>(),
            (std::any::type_name::<T>(), Registration::Instance(service)),
        );
    }

    /// Registers a factory with the given lifetime.
    ///
    /// Singleton factories receive the container itself; scoped factories
    /// receive the scope they are being built for, so they may depend on
    /// both singleton and scoped services.
    pub fn register_factory<T, F>(&mut self, lifetime: Lifetime, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<T, InjectionError> + Send + Sync + 'static,
    {
        let factory: ServiceFactory =
            Arc::new(move |resolver: &dyn Resolver| {
                factory(resolver).map(|s| Arc::new(s) as AnyService)
            });

        let registration = match lifetime {
            Lifetime::Singleton => Registration::Singleton {
                factory,
                instance: Mutex::new(None),
            },
            Lifetime::Scoped => Registration::Scoped(factory),
        };

        self.registrations.insert(
            TypeId::of::<T>(),
            (std::any::type_name::<T>(), registration),
        );
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn lifetime_of(&self, type_id: TypeId) -> Option<Lifetime> {
        self.registrations.get(&type_id).map(|(_, r)| match r {
            Registration::Scoped(_) => Lifetime::Scoped,
            Registration::Instance(_) | Registration::Singleton { .. } => Lifetime::Singleton,
        })
    }
}

impl Resolver for Container {
    fn resolve_any(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Option<AnyService>, InjectionError> {
        let Some((_, registration)) = self.registrations.get(&type_id) else {
            return Ok(None);
        };

        match registration {
            Registration::Instance(service) => Ok(Some(Arc::clone(service))),
            Registration::Singleton { factory, instance } => {
                if let Some(existing) = instance.lock().as_ref() {
                    return Ok(Some(Arc::clone(existing)));
                }

                // Build outside the lock so a factory may resolve other singletons.
                let built = factory(self)?;
                let mut slot = instance.lock();
                Ok(Some(Arc::clone(slot.get_or_insert(built))))
            }
            Registration::Scoped(_) => Err(InjectionError::named(
                type_name,
                "scoped service cannot be resolved outside an invocation scope",
            )),
        }
    }

    fn is_registered(&self, type_id: TypeId) -> bool {
        self.registrations.contains_key(&type_id)
    }
}

impl ServiceProvider for Container {
    fn create_scope(self: Arc<Self>) -> Arc<dyn ServiceScope> {
        Arc::new(Scope::new(self))
    }

    fn as_resolver(&self) -> &dyn Resolver {
        self
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.registrations.len())
            .finish()
    }
}

/// A per-invocation scope over a [`Container`].
pub struct Scope {
    root: Arc<Container>,
    instances: Mutex<HashMap<TypeId, AnyService>>,
    disposed: AtomicBool,
}

impl Scope {
    fn new(root: Arc<Container>) -> Self {
        Self {
            root,
            instances: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }
}

impl Resolver for Scope {
    fn resolve_any(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Option<AnyService>, InjectionError> {
        if self.is_disposed() {
            return Err(InjectionError::named(type_name, "scope has been disposed"));
        }

        if self.root.lifetime_of(type_id) != Some(Lifetime::Scoped) {
            return self.root.resolve_any(type_id, type_name);
        }

        if let Some(existing) = self.instances.lock().get(&type_id) {
            return Ok(Some(Arc::clone(existing)));
        }

        let Some((_, Registration::Scoped(factory))) = self.root.registrations.get(&type_id) else {
            return Ok(None);
        };

        let built = factory(self)?;
        let mut instances = self.instances.lock();
        Ok(Some(Arc::clone(instances.entry(type_id).or_insert(built))))
    }

    fn is_registered(&self, type_id: TypeId) -> bool {
        self.root.is_registered(type_id)
    }
}

impl ServiceScope for Scope {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let released = std::mem::take(&mut *self.instances.lock());
        tracing::trace!(instances = released.len(), "service scope disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn as_resolver(&self) -> &dyn Resolver {
        self
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("instances", &self.instances.lock().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A wrapper for injected dependencies.
///
/// `Inject<T>` is the building block of [`FromServices`]: listing
/// `Inject<Clock>` among a middleware's dependencies makes the pipeline
/// resolve `Clock` before the middleware is constructed or called.
#[derive(Clone)]
pub struct Inject<T>(pub Arc<T>);

impl<T> Inject<T> {
    /// Creates a new `Inject` wrapper.
    pub fn new(inner: Arc<T>) -> Self {
        Self(inner)
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &T {
        &self.0
    }

    /// Converts into the inner `Arc`.
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T> std::ops::Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Inject").field(&self.0).finish()
    }
}

/// Values that can be assembled from a [`Resolver`].
///
/// Implemented for `()`, [`Inject<T>`], `Option<Inject<T>>` and tuples of up
/// to six implementors. Middleware declares its constructor and per-call
/// dependencies with this trait.
pub trait FromServices: Sized {
    /// Builds the value by resolving every dependency it names.
    fn from_services(resolver: &dyn Resolver) -> Result<Self, InjectionError>;

    /// Checks that every required dependency is registered, without
    /// instantiating anything.
    fn verify(resolver: &dyn Resolver) -> Result<(), InjectionError>;
}

impl FromServices for () {
    fn from_services(_resolver: &dyn Resolver) -> Result<Self, InjectionError> {
        Ok(())
    }

    fn verify(_resolver: &dyn Resolver) -> Result<(), InjectionError> {
        Ok(())
    }
}

impl<T: Send + Sync + 'static> FromServices for Inject<T> {
    fn from_services(resolver: &dyn Resolver) -> Result<Self, InjectionError> {
        resolver.resolve_required::<T>().map(Inject)
    }

    fn verify(resolver: &dyn Resolver) -> Result<(), InjectionError> {
        if resolver.contains::<T>() {
            Ok(())
        } else {
            Err(InjectionError::not_registered::<T>())
        }
    }
}

impl<T: Send + Sync + 'static> FromServices for Option<Inject<T>> {
    fn from_services(resolver: &dyn Resolver) -> Result<Self, InjectionError> {
        Ok(resolver.resolve::<T>()?.map(Inject))
    }

    fn verify(_resolver: &dyn Resolver) -> Result<(), InjectionError> {
        Ok(())
    }
}

macro_rules! impl_from_services_tuple {
    ($($ty:ident),+) => {
        impl<$($ty: FromServices),+> FromServices for ($($ty,)+) {
            fn from_services(resolver: &dyn Resolver) -> Result<Self, InjectionError> {
                Ok(($($ty::from_services(resolver)?,)+))
            }

            fn verify(resolver: &dyn Resolver) -> Result<(), InjectionError> {
                $($ty::verify(resolver)?;)+
                Ok(())
            }
        }
    };
}

impl_from_services_tuple!(A);
impl_from_services_tuple!(A, B);
impl_from_services_tuple!(A, B, C);
impl_from_services_tuple!(A, B, C, D);
impl_from_services_tuple!(A, B, C, D, E);
impl_from_services_tuple!(A, B, C, D, E, F);
