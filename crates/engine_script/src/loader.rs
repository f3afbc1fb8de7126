//! The dynamic module loader contract and two in-process loaders.
//!
//! Resolving a specifier is asynchronous and owned by the host. The script
//! system only ever calls [`ModuleLoader::resolve`] and spawns the returned
//! future; it never blocks on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

use crate::attribute::AttributeSchema;
use crate::error::LoadError;
use crate::script::Script;

/// Outcome of one resolve.
pub type LoadResult = Result<Arc<ModuleImplementation>, LoadError>;

type Factory = dyn Fn() -> Box<dyn Script> + Send + Sync;

/// A resolved module: a way to construct instances plus the attribute
/// schema those instances are configured against.
pub struct ModuleImplementation {
    specifier: String,
    schema: Arc<AttributeSchema>,
    factory: Box<Factory>,
}

impl ModuleImplementation {
    /// Create an implementation with an empty attribute schema.
    pub fn new<S, F>(specifier: impl Into<String>, factory: F) -> Self
    where
        S: Script,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            specifier: specifier.into(),
            schema: Arc::new(AttributeSchema::new()),
            factory: Box::new(move || Box::new(factory()) as Box<dyn Script>),
        }
    }

    /// Declare the attributes instances are configured against.
    #[must_use]
    pub fn with_schema(mut self, schema: AttributeSchema) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    #[must_use]
    pub fn specifier(&self) -> &str {
        &self.specifier
    }

    /// Returns the attribute schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<AttributeSchema> {
        &self.schema
    }

    pub(crate) fn construct(&self) -> Box<dyn Script> {
        (self.factory)()
    }
}

impl std::fmt::Debug for ModuleImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleImplementation")
            .field("specifier", &self.specifier)
            .field("attributes", &self.schema.len())
            .finish_non_exhaustive()
    }
}

/// Resolves a specifier to a module implementation.
///
/// Implementations must tolerate repeated calls with the same specifier,
/// either by caching or by being safe to re-run.
pub trait ModuleLoader: Send + Sync {
    fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult>;
}

impl<L: ModuleLoader + ?Sized> ModuleLoader for Arc<L> {
    fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult> {
        (**self).resolve(specifier)
    }
}

/// A loader backed by a table of implementations registered in-process.
///
/// An optional latency is applied to every resolve, which is how the demo
/// binary simulates slow fetches.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<ModuleImplementation>>,
    latency: Duration,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every resolve by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Register an implementation under its own specifier. Returns the
    /// implementation it replaced, if any.
    pub fn register(&self, implementation: ModuleImplementation) -> Option<Arc<ModuleImplementation>> {
        let specifier = implementation.specifier().to_string();
        debug!(specifier, "registered module implementation");
        self.modules.insert(specifier, Arc::new(implementation))
    }

    #[must_use]
    pub fn contains(&self, specifier: &str) -> bool {
        self.modules.contains_key(specifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleLoader for ModuleRegistry {
    fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult> {
        let found = self.modules.get(specifier).map(|m| Arc::clone(m.value()));
        let specifier = specifier.to_string();
        let latency = self.latency;
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            found.ok_or(LoadError::NotFound(specifier))
        }
        .boxed()
    }
}

type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// A cached or in-flight load. `id` tells a failing load apart from a newer
/// one stored under the same specifier after an eviction.
struct CachedLoad {
    id: u64,
    load: SharedLoad,
}

/// Wraps a loader so each specifier is resolved at most once at a time.
///
/// Concurrent resolves of the same specifier share one in-flight future.
/// Successful results stay cached; failures are evicted when they complete
/// so a later resolve tries again.
pub struct CachedLoader<L> {
    inner: L,
    loads: Arc<DashMap<String, CachedLoad>>,
    next_id: AtomicU64,
}

impl<L: ModuleLoader> CachedLoader<L> {
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            loads: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns a reference to the wrapped loader.
    #[must_use]
    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Number of specifiers that are cached or in flight.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.loads.len()
    }

    /// Forget a specifier so the next resolve goes to the inner loader.
    pub fn evict(&self, specifier: &str) -> bool {
        self.loads.remove(specifier).is_some()
    }
}

impl<L> std::fmt::Debug for CachedLoader<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedLoader")
            .field("cached", &self.loads.len())
            .finish_non_exhaustive()
    }
}

impl<L: ModuleLoader> ModuleLoader for CachedLoader<L> {
    fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult> {
        let load = match self.loads.entry(specifier.to_string()) {
            Entry::Occupied(entry) => {
                debug!(specifier, "module load served from cache");
                entry.get().load.clone()
            }
            Entry::Vacant(entry) => {
                let pending = self.inner.resolve(specifier);
                let loads = Arc::clone(&self.loads);
                let key = specifier.to_string();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let load = async move {
                    let result = pending.await;
                    if result.is_err() {
                        loads.remove_if(&key, |_, cached| cached.id == id);
                    }
                    result
                }
                .boxed()
                .shared();
                entry.insert(CachedLoad {
                    id,
                    load: load.clone(),
                });
                load
            }
        };
        load.boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use super::*;

    struct Noop;
    impl Script for Noop {}

    /// Counts resolves and fails for any specifier starting with `bad`.
    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
    }

    impl ModuleLoader for CountingLoader {
        fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let specifier = specifier.to_string();
            async move {
                tokio::task::yield_now().await;
                if specifier.starts_with("bad") {
                    Err(LoadError::NotFound(specifier))
                } else {
                    Ok(Arc::new(ModuleImplementation::new(specifier, || Noop)))
                }
            }
            .boxed()
        }
    }

    /// Every resolve waits until the test completes it.
    #[derive(Default)]
    struct GatedLoader {
        calls: AtomicUsize,
        waiting: Mutex<Vec<oneshot::Sender<LoadResult>>>,
    }

    impl ModuleLoader for GatedLoader {
        fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            self.waiting.lock().unwrap().push(tx);
            let specifier = specifier.to_string();
            async move { rx.await.unwrap_or(Err(LoadError::Abandoned(specifier))) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_registry_resolves_registered_module() {
        let registry = ModuleRegistry::new();
        registry.register(ModuleImplementation::new("a.mjs", || Noop));
        let module = registry.resolve("a.mjs").await.unwrap();
        assert_eq!(module.specifier(), "a.mjs");
        assert!(registry.contains("a.mjs"));
    }

    #[tokio::test]
    async fn test_registry_reports_missing_module() {
        let registry = ModuleRegistry::new();
        let err = registry.resolve("missing.mjs").await.unwrap_err();
        assert_eq!(err, LoadError::NotFound("missing.mjs".into()));
        assert_eq!(err.specifier(), "missing.mjs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_latency() {
        let registry = ModuleRegistry::new().with_latency(Duration::from_millis(50));
        registry.register(ModuleImplementation::new("slow.mjs", || Noop));
        let start = tokio::time::Instant::now();
        registry.resolve("slow.mjs").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_cached_loader_shares_concurrent_resolves() {
        let loader = CachedLoader::new(CountingLoader::default());
        let (a, b) = tokio::join!(loader.resolve("x.mjs"), loader.resolve("x.mjs"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        loader.resolve("x.mjs").await.unwrap();
        assert_eq!(loader.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_cached_loader_retries_after_failure() {
        let loader = CachedLoader::new(CountingLoader::default());
        assert!(loader.resolve("bad.mjs").await.is_err());
        assert_eq!(loader.cached_len(), 0);
        assert!(loader.resolve("bad.mjs").await.is_err());
        assert_eq!(loader.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_loader_evict() {
        let loader = CachedLoader::new(CountingLoader::default());
        loader.resolve("x.mjs").await.unwrap();
        assert!(loader.evict("x.mjs"));
        loader.resolve("x.mjs").await.unwrap();
        assert_eq!(loader.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_late_failure_keeps_a_newer_in_flight_load() {
        let loader = CachedLoader::new(GatedLoader::default());
        let first = tokio::spawn(loader.resolve("x.mjs"));
        assert!(loader.evict("x.mjs"));
        let _second = loader.resolve("x.mjs");

        let stale = loader.inner().waiting.lock().unwrap().remove(0);
        assert!(stale.send(Err(LoadError::NotFound("x.mjs".to_string()))).is_ok());
        assert!(first.await.unwrap().is_err());

        assert_eq!(loader.cached_len(), 1);
        let _third = loader.resolve("x.mjs");
        assert_eq!(loader.inner().calls.load(Ordering::SeqCst), 2);
    }
}
