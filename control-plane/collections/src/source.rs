use crate::collection::{
    AnyCollection, Collection, CollectionId, KeyWatcher, Resource, Store, Subscribers,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Creates a root collection fed by an external writer.
///
/// The collection reports unsynced until the writer calls
/// [`Writer::reset`] or [`Writer::mark_synced`].
pub fn source<T: Resource>(name: impl Into<String>) -> (Writer<T>, Collection<T>) {
    let inner = Arc::new_cyclic(|weak| SourceInner {
        weak: weak.clone(),
        id: CollectionId::next(),
        name: name.into(),
        state: parking_lot::RwLock::new(BTreeMap::new()),
        subs: Subscribers::new(),
        synced: AtomicBool::new(false),
        version: AtomicU64::new(0),
    });
    let collection = Collection {
        inner: inner.clone() as Arc<dyn Store<T>>,
    };
    (Writer { inner }, collection)
}

/// The write handle of a source collection.
pub struct Writer<T> {
    inner: Arc<SourceInner<T>>,
}

struct SourceInner<T> {
    weak: Weak<SourceInner<T>>,
    id: CollectionId,
    name: String,
    state: parking_lot::RwLock<BTreeMap<String, T>>,
    subs: Subscribers,
    synced: AtomicBool,
    version: AtomicU64,
}

// === impl Writer ===

impl<T: Resource> Writer<T> {
    /// Inserts or updates a value. Unchanged values are absorbed.
    pub fn apply(&self, value: T) {
        let key = value.resource_name();
        {
            let mut state = self.inner.state.write();
            if state.get(&key) == Some(&value) {
                return;
            }
            state.insert(key.clone(), value);
            self.inner.version.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.subs.notify(&[key]);
    }

    /// Removes the value for `key`, if present.
    pub fn delete(&self, key: &str) {
        let removed = {
            let mut state = self.inner.state.write();
            let removed = state.remove(key).is_some();
            if removed {
                self.inner.version.fetch_add(1, Ordering::AcqRel);
            }
            removed
        };
        if removed {
            self.inner.subs.notify(&[key.to_string()]);
        }
    }

    /// Replaces the full contents of the collection and marks it synced.
    ///
    /// Only keys whose values actually changed (including removals) are
    /// propagated.
    pub fn reset(&self, values: Vec<T>) {
        let mut changed = Vec::new();
        {
            let mut state = self.inner.state.write();
            let mut next = BTreeMap::new();
            for value in values {
                next.insert(value.resource_name(), value);
            }
            for (key, value) in &next {
                if state.get(key) != Some(value) {
                    changed.push(key.clone());
                }
            }
            for key in state.keys() {
                if !next.contains_key(key) {
                    changed.push(key.clone());
                }
            }
            *state = next;
            if !changed.is_empty() {
                self.inner.version.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.inner.synced.store(true, Ordering::Release);
        self.inner.subs.notify(&changed);
    }

    /// Marks the collection as having completed its initial load.
    pub fn mark_synced(&self) {
        self.inner.synced.store(true, Ordering::Release);
    }
}

// === impl SourceInner ===

impl<T: Resource> AnyCollection for SourceInner<T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn subscribe_keys(&self, watcher: KeyWatcher) {
        self.subs.push(watcher);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T: Resource> Store<T> for SourceInner<T> {
    fn get(&self, key: &str) -> Option<T> {
        self.state.read().get(key).cloned()
    }

    fn list(&self) -> Vec<T> {
        self.state.read().values().cloned().collect()
    }

    fn erased(&self) -> Arc<dyn AnyCollection> {
        self.weak
            .upgrade()
            .expect("source collection must be alive")
    }
}
