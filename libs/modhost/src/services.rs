//! Type-keyed service registry used for dependency injection.
//!
//! Modules publish their interfaces during the configuration phases and consume other
//! modules' interfaces when they are instantiated or started.
//!
//! Two kinds of registrations exist:
//! - **Singletons**: an `Arc<T>` shared by the whole host (`register`).
//! - **Scoped factories**: produce a fresh `Arc<T>` once per [`ResolutionScope`]
//!   (`register_scoped`). The factory sees the scope it is resolved in and can pull
//!   further services from it.
//!
//! Implementation details:
//! - Key = `type_name::<T>()`, which works for `T = dyn Trait`.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! - Re-registering overwrites the previous value; `Arc`s held by consumers remain valid.
//! - A scope caches what it created and drops it when the scope is dropped, so scoped
//!   services used only while constructing a module never outlive that construction.

use parking_lot::{Mutex, RwLock};
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Stable type key for trait objects, based on the fully-qualified `type_name::<T>()`.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceHubError {
    #[error("service not registered: {type_key}")]
    NotFound { type_key: TypeKey },

    #[error("type mismatch in hub for {type_key}")]
    TypeMismatch { type_key: TypeKey },

    #[error("cyclic scoped resolution: {}", format_path(path))]
    Cycle { path: Vec<TypeKey> },

    #[error("failed to construct scoped service {type_key}: {source}")]
    Construction {
        type_key: TypeKey,
        #[source]
        source: anyhow::Error,
    },
}

fn format_path(path: &[TypeKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

type Boxed = Box<dyn Any + Send + Sync>;

type ScopedFactory = Arc<dyn Fn(&ResolutionScope<'_>) -> anyhow::Result<Boxed> + Send + Sync>;

/// Type-safe registry of services keyed by interface type.
pub struct ServiceHub {
    singletons: RwLock<HashMap<TypeKey, Boxed>>,
    factories: RwLock<HashMap<TypeKey, ScopedFactory>>,
}

impl ServiceHub {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            singletons: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for ServiceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHub {
    /// Register a singleton under the interface type `T`.
    /// `T` can be a trait object like `dyn my_module::contract::MyApi`.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.singletons
            .write()
            .insert(TypeKey::of::<T>(), Box::new(service));
    }

    /// Register a factory that builds a new `T` once per resolution scope.
    pub fn register_scoped<T, F>(&self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolutionScope<'_>) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let erased: ScopedFactory =
            Arc::new(move |scope| factory(scope).map(|service| Box::new(service) as Boxed));
        self.factories.write().insert(TypeKey::of::<T>(), erased);
    }

    /// Fetch a singleton by interface type `T`.
    ///
    /// # Errors
    /// Returns `ServiceHubError::NotFound` if no singleton is registered for `T`.
    pub fn get<T>(&self) -> Result<Arc<T>, ServiceHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let r = self.singletons.read();
        let boxed = r
            .get(&type_key)
            .ok_or(ServiceHubError::NotFound { type_key })?;
        downcast::<T>(boxed, type_key)
    }

    /// Whether a singleton or a scoped factory exists for `T`.
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        self.singletons.read().contains_key(&type_key)
            || self.factories.read().contains_key(&type_key)
    }

    /// Remove a singleton; returns it if it was present.
    pub fn remove<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let boxed = self.singletons.write().remove(&TypeKey::of::<T>())?;
        boxed.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    /// Open a resolution scope on behalf of `owner` (usually a module name).
    pub fn scope(&self, owner: impl Into<String>) -> ResolutionScope<'_> {
        ResolutionScope {
            hub: self,
            owner: owner.into(),
            cache: Mutex::new(HashMap::new()),
            resolving: Mutex::new(Vec::new()),
        }
    }

    /// Clear singletons and factories.
    pub fn clear(&self) {
        self.singletons.write().clear();
        self.factories.write().clear();
    }

    /// Introspection: singletons plus scoped factories.
    pub fn len(&self) -> usize {
        self.singletons.read().len() + self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn factory(&self, type_key: TypeKey) -> Option<ScopedFactory> {
        self.factories.read().get(&type_key).cloned()
    }
}

fn downcast<T>(boxed: &Boxed, type_key: TypeKey) -> Result<Arc<T>, ServiceHubError>
where
    T: ?Sized + Send + Sync + 'static,
{
    // Stored value is exactly `Arc<T>`; downcast is cheap.
    boxed
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or(ServiceHubError::TypeMismatch { type_key })
}

/// One isolated resolution pass over a [`ServiceHub`].
///
/// Singletons come from the hub. Scoped services are built at most once per scope and
/// released together with it.
pub struct ResolutionScope<'hub> {
    hub: &'hub ServiceHub,
    owner: String,
    cache: Mutex<HashMap<TypeKey, Boxed>>,
    resolving: Mutex<Vec<TypeKey>>,
}

impl ResolutionScope<'_> {
    /// Name of whoever opened the scope.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn hub(&self) -> &ServiceHub {
        self.hub
    }

    /// Resolve `T`: singleton first, then a scoped factory.
    ///
    /// # Errors
    /// Returns `ServiceHubError` if nothing is registered for `T`, if the factory fails,
    /// or if scoped factories depend on each other in a cycle.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ServiceHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();

        if let Some(boxed) = self.hub.singletons.read().get(&type_key) {
            return downcast::<T>(boxed, type_key);
        }
        if let Some(boxed) = self.cache.lock().get(&type_key) {
            return downcast::<T>(boxed, type_key);
        }

        let factory = self
            .hub
            .factory(type_key)
            .ok_or(ServiceHubError::NotFound { type_key })?;

        {
            let mut resolving = self.resolving.lock();
            if let Some(pos) = resolving.iter().position(|k| *k == type_key) {
                let mut path = resolving[pos..].to_vec();
                path.push(type_key);
                return Err(ServiceHubError::Cycle { path });
            }
            resolving.push(type_key);
        }

        // No lock may be held here: the factory resolves through this same scope.
        let built = factory(self);
        self.resolving.lock().pop();

        let boxed = built.map_err(|source| ServiceHubError::Construction { type_key, source })?;
        let service = downcast::<T>(&boxed, type_key)?;
        tracing::trace!(owner = %self.owner, service = %type_key, "Built scoped service");
        self.cache.lock().insert(type_key, boxed);
        Ok(service)
    }

    /// Resolve `T` if anything is registered for it.
    ///
    /// # Errors
    /// Same as [`resolve`](Self::resolve), except that a missing registration is `Ok(None)`.
    pub fn try_resolve<T>(&self) -> Result<Option<Arc<T>>, ServiceHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.resolve::<T>() {
            Ok(service) => Ok(Some(service)),
            Err(ServiceHubError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of scoped services built so far in this scope.
    pub fn scoped_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl fmt::Debug for ResolutionScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionScope")
            .field("owner", &self.owner)
            .field("scoped", &self.scoped_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[async_trait::async_trait]
    trait TestApi: Send + Sync {
        async fn id(&self) -> usize;
    }

    struct ImplA(usize);
    #[async_trait::async_trait]
    impl TestApi for ImplA {
        async fn id(&self) -> usize {
            self.0
        }
    }

    trait UnitOfWork: Send + Sync {
        fn serial(&self) -> usize;
    }

    struct Uow(usize);
    impl UnitOfWork for Uow {
        fn serial(&self) -> usize {
            self.0
        }
    }

    #[tokio::test]
    async fn register_and_get_dyn_trait() {
        let hub = ServiceHub::new();
        let api: Arc<dyn TestApi> = Arc::new(ImplA(7));
        hub.register::<dyn TestApi>(api.clone());

        let got = hub.get::<dyn TestApi>().unwrap();
        assert_eq!(got.id().await, 7);
        assert_eq!(Arc::as_ptr(&api), Arc::as_ptr(&got));
    }

    #[tokio::test]
    async fn re_registering_overwrites_previous_service() {
        let hub = ServiceHub::new();
        hub.register::<dyn TestApi>(Arc::new(ImplA(10)));
        let first = hub.get::<dyn TestApi>().unwrap();
        hub.register::<dyn TestApi>(Arc::new(ImplA(20)));

        assert_eq!(hub.get::<dyn TestApi>().unwrap().id().await, 20);
        assert_eq!(first.id().await, 10, "Original Arc should retain its value");
    }

    #[test]
    fn get_returns_not_found_for_unregistered_service() {
        let hub = ServiceHub::new();
        match hub.get::<dyn TestApi>() {
            Err(ServiceHubError::NotFound { type_key }) => {
                assert!(type_key.to_string().contains("TestApi"));
            }
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn scoped_services_are_cached_per_scope() {
        let hub = ServiceHub::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        hub.register_scoped::<dyn UnitOfWork, _>(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Uow(n)) as Arc<dyn UnitOfWork>)
        });

        let first = hub.scope("a");
        let x = first.resolve::<dyn UnitOfWork>().unwrap();
        let y = first.resolve::<dyn UnitOfWork>().unwrap();
        assert_eq!(x.serial(), y.serial(), "one instance per scope");

        let second = hub.scope("b");
        let z = second.resolve::<dyn UnitOfWork>().unwrap();
        assert_ne!(x.serial(), z.serial(), "scopes do not share instances");
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn scoped_services_are_released_with_the_scope() {
        let hub = ServiceHub::new();
        hub.register_scoped::<dyn UnitOfWork, _>(|_| Ok(Arc::new(Uow(1)) as Arc<dyn UnitOfWork>));

        let weak = {
            let scope = hub.scope("a");
            let uow = scope.resolve::<dyn UnitOfWork>().unwrap();
            Arc::downgrade(&uow)
        };
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn singleton_takes_precedence_over_factory() {
        let hub = ServiceHub::new();
        hub.register_scoped::<dyn UnitOfWork, _>(|_| Ok(Arc::new(Uow(1)) as Arc<dyn UnitOfWork>));
        hub.register::<dyn UnitOfWork>(Arc::new(Uow(99)));

        let scope = hub.scope("a");
        assert_eq!(scope.resolve::<dyn UnitOfWork>().unwrap().serial(), 99);
        assert_eq!(scope.scoped_len(), 0);
    }

    #[test]
    fn factories_can_resolve_through_their_scope() {
        struct Repo {
            uow: Arc<dyn UnitOfWork>,
        }

        let hub = ServiceHub::new();
        hub.register_scoped::<dyn UnitOfWork, _>(|_| Ok(Arc::new(Uow(5)) as Arc<dyn UnitOfWork>));
        hub.register_scoped::<Repo, _>(|scope| {
            Ok(Arc::new(Repo {
                uow: scope.resolve::<dyn UnitOfWork>()?,
            }))
        });

        let scope = hub.scope("orders");
        let repo = scope.resolve::<Repo>().unwrap();
        let uow = scope.resolve::<dyn UnitOfWork>().unwrap();
        assert!(Arc::ptr_eq(&repo.uow, &uow));
        assert_eq!(scope.owner(), "orders");
    }

    #[test]
    fn cyclic_factories_are_reported() {
        struct Ping;
        struct Pong;

        let hub = ServiceHub::new();
        hub.register_scoped::<Ping, _>(|scope| {
            scope.resolve::<Pong>()?;
            Ok(Arc::new(Ping))
        });
        hub.register_scoped::<Pong, _>(|scope| {
            scope.resolve::<Ping>()?;
            Ok(Arc::new(Pong))
        });

        let scope = hub.scope("a");
        let err = scope.resolve::<Ping>().err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("Ping"), "{msg}");
        assert!(msg.contains("cyclic"), "{msg}");
    }

    #[test]
    fn factory_failure_is_wrapped() {
        let hub = ServiceHub::new();
        hub.register_scoped::<dyn UnitOfWork, _>(|_| anyhow::bail!("pool exhausted"));

        let scope = hub.scope("a");
        let Err(ServiceHubError::Construction { source, .. }) = scope.resolve::<dyn UnitOfWork>()
        else {
            panic!("expected a construction error");
        };
        assert_eq!(source.to_string(), "pool exhausted");
        assert!(scope.try_resolve::<dyn TestApi>().unwrap().is_none());
    }

    #[test]
    fn len_remove_and_clear() {
        let hub = ServiceHub::new();
        assert!(hub.is_empty());

        hub.register::<dyn TestApi>(Arc::new(ImplA(1)));
        hub.register_scoped::<dyn UnitOfWork, _>(|_| Ok(Arc::new(Uow(1)) as Arc<dyn UnitOfWork>));
        assert_eq!(hub.len(), 2);
        assert!(hub.contains::<dyn UnitOfWork>());

        assert!(hub.remove::<dyn TestApi>().is_some());
        assert!(hub.remove::<dyn TestApi>().is_none());
        assert_eq!(hub.len(), 1);

        hub.clear();
        assert!(hub.is_empty());
        assert!(!hub.contains::<dyn UnitOfWork>());
    }

    #[tokio::test]
    async fn hub_is_thread_safe_under_concurrent_access() {
        let hub = Arc::new(ServiceHub::new());
        hub.register::<dyn TestApi>(Arc::new(ImplA(0)));

        let mut handles = vec![];
        for i in 0..10 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                hub.register::<dyn TestApi>(Arc::new(ImplA(i)));
                hub.get::<dyn TestApi>().unwrap().id().await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap() < 10);
        }
    }
}
