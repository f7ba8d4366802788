use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A value that can live in a [`Collection`].
///
/// Equality is value-level: two instances that compare equal are treated as
/// the same observation and do not propagate downstream.
pub trait Resource: Clone + PartialEq + Send + Sync + 'static {
    /// The stable key of this value within its collection.
    fn resource_name(&self) -> String;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CollectionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl CollectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Notified with the keys that changed in a collection (or index).
pub(crate) type KeyWatcher = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Type-erased view of a collection, used for dependency bookkeeping.
pub(crate) trait AnyCollection: Send + Sync {
    fn id(&self) -> CollectionId;
    fn name(&self) -> &str;
    fn has_synced(&self) -> bool;
    fn subscribe_keys(&self, watcher: KeyWatcher);

    /// A counter advanced on every committed change, before subscribers are
    /// notified. Dependents compare it across a transform run to catch
    /// changes that landed before their subscription existed.
    fn version(&self) -> u64;
}

/// Typed store backing a [`Collection`] handle.
pub(crate) trait Store<T>: AnyCollection {
    fn get(&self, key: &str) -> Option<T>;
    fn list(&self) -> Vec<T>;
    fn erased(&self) -> Arc<dyn AnyCollection>;
}

/// A reactive, deduplicated, identity-keyed container of values.
pub struct Collection<T> {
    pub(crate) inner: Arc<dyn Store<T>>,
}

// === impl Collection ===

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name())
            .finish()
    }
}

impl<T: Resource> Collection<T> {
    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.get(key)
    }

    /// Returns all values, ordered by key.
    pub fn list(&self) -> Vec<T> {
        self.inner.list()
    }

    /// True once this collection's input and all transitively fetched
    /// dependencies have completed at least one full pass.
    pub fn has_synced(&self) -> bool {
        self.inner.has_synced()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub(crate) fn subscribe(&self, watcher: KeyWatcher) {
        self.inner.subscribe_keys(watcher)
    }
}

/// A subscriber list. The list is cloned before notification so that
/// callbacks never run while any lock is held.
pub(crate) struct Subscribers(parking_lot::Mutex<Vec<KeyWatcher>>);

// === impl Subscribers ===

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self(parking_lot::Mutex::new(Vec::new()))
    }

    pub(crate) fn push(&self, watcher: KeyWatcher) {
        self.0.lock().push(watcher);
    }

    pub(crate) fn notify(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let watchers = self.0.lock().clone();
        for watcher in watchers {
            watcher(keys);
        }
    }
}
