//! Caching decorator for storage providers
//!
//! [`CachingProvider`] wraps any [`StorageProvider`] with three independent
//! cache regions per (workspace, path):
//!
//! | Region | Holds |
//! |--------|-------|
//! | value | a property's record |
//! | property names | a node's property names |
//! | child paths | a node's immediate child paths |
//!
//! ## Coherence
//!
//! Every write goes to the backend first, then drops the entries it makes
//! stale:
//!
//! | Mutation | Entries dropped |
//! |----------|-----------------|
//! | add node P | child paths of parent(P) |
//! | remove P | every region at or beneath P, child paths and property names of parent(P) |
//! | write property P | value of P; property names of parent(P) if the cached list lacks P |
//! | move / copy | source as a remove, destination as an add |
//!
//! ## Single flight
//!
//! A miss installs a pending marker before asking the backend. Concurrent
//! misses on the same key wait on that marker instead of loading again.
//! A result is stored only if the marker is still in place when the load
//! finishes, so an invalidation that lands mid-load is never undone. Errors
//! are never stored; every waiter receives the same error. Waits are
//! bounded and time out as ProviderFailure.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use super::provider::StorageProvider;
use crate::error::{Result, StoreError};
use crate::item::PropertyRecord;
use crate::lru::Lru;
use crate::path::{Path, QualifiedName};

/// Default entries per cache region
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default bound on waiting for another caller's population
pub const DEFAULT_POPULATION_TIMEOUT: Duration = Duration::from_secs(5);

type Key = (String, Path);

/// One in-progress backend load shared by every caller that missed
struct Flight<V> {
    result: Mutex<Option<Result<V>>>,
    done: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<V>) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = Some(result);
        }
        self.done.notify_all();
    }

    fn wait(&self, key: &Key, timeout: Duration) -> Result<V> {
        let guard = self
            .result
            .lock()
            .map_err(|_| StoreError::poisoned("cache population"))?;
        let (guard, waited) = self
            .done
            .wait_timeout_while(guard, timeout, |result| result.is_none())
            .map_err(|_| StoreError::poisoned("cache population"))?;
        match guard.as_ref() {
            Some(result) => result.clone(),
            None => {
                debug_assert!(waited.timed_out());
                Err(StoreError::provider(
                    &key.0,
                    &key.1,
                    format!("timed out after {:?} waiting for cache population", timeout),
                ))
            }
        }
    }
}

enum Entry<V> {
    Ready(V),
    Pending(Arc<Flight<V>>),
}

/// One cache region: an LRU of ready values and pending loads
struct Region<V> {
    name: &'static str,
    entries: Mutex<Lru<Key, Entry<V>>>,
}

enum Role<V> {
    Lead(Arc<Flight<V>>),
    Wait(Arc<Flight<V>>),
}

impl<V: Clone> Region<V> {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            entries: Mutex::new(Lru::new(capacity)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Lru<Key, Entry<V>>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::poisoned(self.name))
    }

    fn get_or_load(
        &self,
        key: Key,
        timeout: Duration,
        load: impl FnOnce() -> Result<V>,
    ) -> Result<V> {
        let role = {
            let mut entries = self.lock()?;
            match entries.get(&key) {
                Some(Entry::Ready(value)) => {
                    trace!(region = self.name, path = %key.1, "cache hit");
                    return Ok(value.clone());
                }
                Some(Entry::Pending(flight)) => Role::Wait(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(Flight::new());
                    entries.insert(key.clone(), Entry::Pending(Arc::clone(&flight)));
                    Role::Lead(flight)
                }
            }
        };

        match role {
            Role::Wait(flight) => flight.wait(&key, timeout),
            Role::Lead(flight) => {
                trace!(region = self.name, path = %key.1, "cache miss");
                let result = load();
                {
                    let mut entries = self.lock()?;
                    let ours = matches!(
                        entries.peek(&key),
                        Some(Entry::Pending(p)) if Arc::ptr_eq(p, &flight)
                    );
                    if ours {
                        match &result {
                            Ok(value) => {
                                entries.insert(key, Entry::Ready(value.clone()));
                            }
                            Err(_) => {
                                entries.remove(&key);
                            }
                        }
                    }
                }
                flight.complete(result.clone());
                result
            }
        }
    }

    fn peek_ready(&self, key: &Key) -> Result<Option<V>> {
        Ok(match self.lock()?.peek(key) {
            Some(Entry::Ready(value)) => Some(value.clone()),
            _ => None,
        })
    }

    fn invalidate(&self, key: &Key) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    /// Drops every entry at or beneath `path`
    fn invalidate_subtree(&self, workspace: &str, path: &Path) -> Result<()> {
        self.lock()?
            .remove_where(|(ws, p)| ws == workspace && path.contains(p));
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

/// Cache sizing and wait bounds
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub population_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            population_timeout: DEFAULT_POPULATION_TIMEOUT,
        }
    }
}

/// Entry counts per region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub values: usize,
    pub property_names: usize,
    pub child_paths: usize,
}

pub struct CachingProvider {
    inner: Arc<dyn StorageProvider>,
    timeout: Duration,
    values: Region<PropertyRecord>,
    property_names: Region<Vec<QualifiedName>>,
    child_paths: Region<Vec<Path>>,
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn StorageProvider>) -> Self {
        Self::with_settings(inner, CacheSettings::default())
    }

    pub fn with_settings(inner: Arc<dyn StorageProvider>, settings: CacheSettings) -> Self {
        Self {
            inner,
            timeout: settings.population_timeout,
            values: Region::new("value cache", settings.max_entries),
            property_names: Region::new("property name cache", settings.max_entries),
            child_paths: Region::new("child path cache", settings.max_entries),
        }
    }

    pub fn inner(&self) -> &Arc<dyn StorageProvider> {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            values: self.values.len(),
            property_names: self.property_names.len(),
            child_paths: self.child_paths.len(),
        }
    }

    /// Drops every cached entry
    pub fn clear(&self) -> Result<()> {
        self.values.clear()?;
        self.property_names.clear()?;
        self.child_paths.clear()
    }

    fn key(workspace: &str, path: &Path) -> Key {
        (workspace.to_string(), path.clone())
    }

    fn invalidate_added(&self, workspace: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.child_paths.invalidate(&Self::key(workspace, &parent))?;
        }
        Ok(())
    }

    fn invalidate_removed(&self, workspace: &str, path: &Path) -> Result<()> {
        self.values.invalidate_subtree(workspace, path)?;
        self.property_names.invalidate_subtree(workspace, path)?;
        self.child_paths.invalidate_subtree(workspace, path)?;
        if let Some(parent) = path.parent() {
            let key = Self::key(workspace, &parent);
            self.child_paths.invalidate(&key)?;
            self.property_names.invalidate(&key)?;
        }
        Ok(())
    }

    fn invalidate_written(&self, workspace: &str, path: &Path) -> Result<()> {
        self.values.invalidate(&Self::key(workspace, path))?;
        if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
            let key = Self::key(workspace, &parent);
            let listed = self
                .property_names
                .peek_ready(&key)?
                .is_some_and(|names| names.contains(name));
            if !listed {
                self.property_names.invalidate(&key)?;
            }
        }
        Ok(())
    }
}

impl StorageProvider for CachingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn workspaces(&self) -> Result<Vec<String>> {
        self.inner.workspaces()
    }

    fn create_workspace(&self, workspace: &str) -> Result<()> {
        self.inner.create_workspace(workspace)
    }

    /// Answered from the parent's cached child list
    fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let Some(parent) = path.parent() else {
            return self.inner.node_exists(workspace, path);
        };
        match self.list_children(workspace, &parent) {
            Ok(children) => Ok(children.contains(path)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Answered from the node's cached property names
    fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(false);
        };
        match self.list_properties(workspace, &parent) {
            Ok(names) => Ok(names.contains(name)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>> {
        self.child_paths
            .get_or_load(Self::key(workspace, path), self.timeout, || {
                self.inner.list_children(workspace, path)
            })
    }

    fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>> {
        self.property_names
            .get_or_load(Self::key(workspace, path), self.timeout, || {
                self.inner.list_properties(workspace, path)
            })
    }

    fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord> {
        self.values
            .get_or_load(Self::key(workspace, path), self.timeout, || {
                self.inner.get_property(workspace, path)
            })
    }

    fn add_node(&self, workspace: &str, path: &Path) -> Result<()> {
        self.inner.add_node(workspace, path)?;
        self.invalidate_added(workspace, path)
    }

    fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()> {
        self.inner.put_property(workspace, path, record)?;
        self.invalidate_written(workspace, path)
    }

    fn remove(&self, workspace: &str, path: &Path) -> Result<()> {
        self.inner.remove(workspace, path)?;
        debug!(workspace, path = %path, "invalidating removed subtree");
        self.invalidate_removed(workspace, path)
    }

    fn copy(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(workspace, from, to)?;
        self.invalidate_removed(workspace, from)?;
        self.invalidate_added(workspace, to)
    }

    fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        self.inner.move_path(workspace, from, to)?;
        self.invalidate_removed(workspace, from)?;
        self.invalidate_added(workspace, to)
    }

    fn find_by_reference(&self, workspace: &str, key: &str) -> Result<Option<Path>> {
        self.inner.find_by_reference(workspace, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Value;
    use crate::storage::MemoryProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    const WS: &str = "default";

    fn p(s: &str) -> Path {
        Path::parse_expanded(s).unwrap()
    }

    /// Counts backend reads and can be told to fail or stall
    struct Instrumented {
        inner: MemoryProvider,
        child_lists: AtomicUsize,
        stall: Duration,
        fail: bool,
    }

    impl Instrumented {
        fn new() -> Self {
            let inner = MemoryProvider::new();
            inner.create_workspace(WS).unwrap();
            Self {
                inner,
                child_lists: AtomicUsize::new(0),
                stall: Duration::ZERO,
                fail: false,
            }
        }
    }

    impl StorageProvider for Instrumented {
        fn name(&self) -> &str {
            "instrumented"
        }
        fn workspaces(&self) -> Result<Vec<String>> {
            self.inner.workspaces()
        }
        fn create_workspace(&self, workspace: &str) -> Result<()> {
            self.inner.create_workspace(workspace)
        }
        fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
            self.inner.node_exists(workspace, path)
        }
        fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
            self.inner.property_exists(workspace, path)
        }
        fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>> {
            self.child_lists.fetch_add(1, Ordering::SeqCst);
            let listed = self.inner.list_children(workspace, path);
            thread::sleep(self.stall);
            if self.fail {
                return Err(StoreError::provider(workspace, path, "disk on fire"));
            }
            listed
        }
        fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>> {
            self.inner.list_properties(workspace, path)
        }
        fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord> {
            self.inner.get_property(workspace, path)
        }
        fn add_node(&self, workspace: &str, path: &Path) -> Result<()> {
            self.inner.add_node(workspace, path)
        }
        fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()> {
            self.inner.put_property(workspace, path, record)
        }
        fn remove(&self, workspace: &str, path: &Path) -> Result<()> {
            self.inner.remove(workspace, path)
        }
        fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
            self.inner.move_path(workspace, from, to)
        }
    }

    fn cached(backend: Instrumented) -> (Arc<Instrumented>, CachingProvider) {
        let backend = Arc::new(backend);
        let cache = CachingProvider::new(Arc::clone(&backend) as Arc<dyn StorageProvider>);
        (backend, cache)
    }

    #[test]
    fn add_invalidates_parent_child_list() {
        let (_, cache) = cached(Instrumented::new());
        cache.add_node(WS, &p("/n")).unwrap();
        assert!(cache.list_children(WS, &p("/n")).unwrap().is_empty());

        cache.add_node(WS, &p("/n/child")).unwrap();

        assert_eq!(cache.list_children(WS, &p("/n")).unwrap(), vec![p("/n/child")]);
    }

    #[test]
    fn repeated_reads_hit_the_cache() {
        let (backend, cache) = cached(Instrumented::new());
        cache.list_children(WS, &Path::root()).unwrap();
        cache.list_children(WS, &Path::root()).unwrap();

        assert_eq!(backend.child_lists.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_invalidates_subtree_and_parent() {
        let (_, cache) = cached(Instrumented::new());
        cache.add_node(WS, &p("/a")).unwrap();
        cache.add_node(WS, &p("/a/b")).unwrap();
        cache
            .put_property(WS, &p("/a/b/x"), &PropertyRecord::single(Value::Long(1)))
            .unwrap();
        cache.get_property(WS, &p("/a/b/x")).unwrap();
        cache.list_children(WS, &p("/a")).unwrap();

        cache.remove(WS, &p("/a")).unwrap();

        assert!(cache.get_property(WS, &p("/a/b/x")).unwrap_err().is_not_found());
        assert!(!cache.node_exists(WS, &p("/a")).unwrap());
        assert!(cache.list_children(WS, &Path::root()).unwrap().is_empty());
    }

    #[test]
    fn property_write_refreshes_value_and_names() {
        let (_, cache) = cached(Instrumented::new());
        cache.add_node(WS, &p("/a")).unwrap();
        assert!(cache.list_properties(WS, &p("/a")).unwrap().is_empty());

        cache
            .put_property(WS, &p("/a/x"), &PropertyRecord::single(Value::Long(1)))
            .unwrap();
        assert_eq!(cache.get_property(WS, &p("/a/x")).unwrap().value(), Some(&Value::Long(1)));
        assert!(cache.property_exists(WS, &p("/a/x")).unwrap());

        cache
            .put_property(WS, &p("/a/x"), &PropertyRecord::single(Value::Long(2)))
            .unwrap();
        assert_eq!(cache.get_property(WS, &p("/a/x")).unwrap().value(), Some(&Value::Long(2)));
    }

    #[test]
    fn move_invalidates_both_ends() {
        let (_, cache) = cached(Instrumented::new());
        for path in ["/src", "/src/x", "/dst"] {
            cache.add_node(WS, &p(path)).unwrap();
        }
        cache.list_children(WS, &p("/src")).unwrap();
        cache.list_children(WS, &p("/dst")).unwrap();

        cache.move_path(WS, &p("/src/x"), &p("/dst/x")).unwrap();

        assert!(cache.list_children(WS, &p("/src")).unwrap().is_empty());
        assert_eq!(cache.list_children(WS, &p("/dst")).unwrap(), vec![p("/dst/x")]);
    }

    #[test]
    fn errors_are_not_cached() {
        let (backend, cache) = cached(Instrumented::new());

        assert!(cache.list_children(WS, &p("/missing")).unwrap_err().is_not_found());
        assert!(cache.list_children(WS, &p("/missing")).unwrap_err().is_not_found());
        assert_eq!(backend.child_lists.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().child_paths, 0);
    }

    #[test]
    fn concurrent_misses_load_once() {
        let mut backend = Instrumented::new();
        backend.stall = Duration::from_millis(100);
        let (backend, cache) = cached(backend);
        let cache = Arc::new(cache);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.list_children(WS, &Path::root())
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        assert_eq!(backend.child_lists.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_reach_every_waiter_and_clear_the_key() {
        let mut backend = Instrumented::new();
        backend.stall = Duration::from_millis(100);
        backend.fail = true;
        let (_, cache) = cached(backend);
        let cache = Arc::new(cache);
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.list_children(WS, &Path::root())
                })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.join().unwrap(),
                Err(StoreError::ProviderFailure { .. })
            ));
        }
        assert_eq!(cache.stats().child_paths, 0);
    }

    #[test]
    fn waiters_time_out() {
        let mut backend = Instrumented::new();
        backend.stall = Duration::from_millis(300);
        let backend = Arc::new(backend);
        let cache = Arc::new(CachingProvider::with_settings(
            Arc::clone(&backend) as Arc<dyn StorageProvider>,
            CacheSettings {
                max_entries: 16,
                population_timeout: Duration::from_millis(20),
            },
        ));

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.list_children(WS, &Path::root()))
        };
        thread::sleep(Duration::from_millis(50));
        let waited = cache.list_children(WS, &Path::root());

        assert!(matches!(waited, Err(StoreError::ProviderFailure { .. })));
        assert!(leader.join().unwrap().is_ok());
    }

    #[test]
    fn invalidation_during_load_is_not_undone() {
        let mut backend = Instrumented::new();
        backend.stall = Duration::from_millis(150);
        let (_, cache) = cached(backend);
        let cache = Arc::new(cache);

        let reader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.list_children(WS, &Path::root()))
        };
        thread::sleep(Duration::from_millis(30));
        cache.add_node(WS, &p("/late")).unwrap();
        reader.join().unwrap().unwrap();

        assert!(cache.node_exists(WS, &p("/late")).unwrap());
    }
}
