use crate::collection::{
    AnyCollection, Collection, CollectionId, KeyWatcher, Resource, Subscribers,
};
use ahash::AHashMap;
use std::{
    collections::BTreeSet,
    fmt::Display,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// A key usable in an [`Index`]. The `Display` form must be injective: two
/// distinct keys must never render to the same string.
pub trait IndexKey: Clone + Eq + Hash + Display + Send + Sync + 'static {}

impl<K: Clone + Eq + Hash + Display + Send + Sync + 'static> IndexKey for K {}

/// A secondary index over a collection, mapping an extracted key to the set
/// of values that produced it.
pub struct Index<K, T> {
    inner: Arc<IndexInner<K, T>>,
}

// === impl Index ===

impl<K, T> Clone for Index<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: IndexKey, T: Resource> Index<K, T> {
    /// Builds an index over `backing`, extracting zero or more keys from
    /// each value with `project`.
    pub fn new<F>(name: impl Into<String>, backing: &Collection<T>, project: F) -> Self
    where
        F: Fn(&T) -> Vec<K> + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|weak: &Weak<IndexInner<K, T>>| IndexInner {
            weak: weak.clone(),
            id: CollectionId::next(),
            name: name.into(),
            backing: backing.clone(),
            project: Box::new(project),
            state: parking_lot::RwLock::new(IndexState::default()),
            pass: parking_lot::Mutex::new(()),
            subs: Subscribers::new(),
            version: AtomicU64::new(0),
        });

        // Subscribe before the initial scan so a backing change racing the
        // scan is re-applied rather than lost; updates are idempotent.
        {
            let weak = inner.weak.clone();
            backing.subscribe(Arc::new(move |keys: &[String]| {
                if let Some(inner) = weak.upgrade() {
                    inner.update(keys);
                }
            }));
        }

        let initial = backing
            .list()
            .iter()
            .map(|t| t.resource_name())
            .collect::<Vec<_>>();
        inner.update(&initial);

        Self { inner }
    }

    /// Returns all values indexed under `key`.
    pub fn lookup(&self, key: &K) -> Vec<T> {
        let backing_keys = {
            let state = self.inner.state.read();
            match state.forward.get(key) {
                Some(keys) => keys.iter().cloned().collect::<Vec<_>>(),
                None => return Vec::new(),
            }
        };
        backing_keys
            .iter()
            .filter_map(|k| self.inner.backing.get(k))
            .collect()
    }

    pub fn has_synced(&self) -> bool {
        self.inner.backing.has_synced()
    }

    pub(crate) fn erased(&self) -> Arc<dyn AnyCollection> {
        self.inner.clone()
    }
}

struct IndexInner<K, T> {
    weak: Weak<IndexInner<K, T>>,
    id: CollectionId,
    name: String,
    backing: Collection<T>,
    #[allow(clippy::type_complexity)]
    project: Box<dyn Fn(&T) -> Vec<K> + Send + Sync>,
    state: parking_lot::RwLock<IndexState<K>>,
    /// Serializes update passes so interleaved backing notifications cannot
    /// commit out of order.
    pass: parking_lot::Mutex<()>,
    subs: Subscribers,
    version: AtomicU64,
}

struct IndexState<K> {
    forward: AHashMap<K, BTreeSet<String>>,
    reverse: AHashMap<String, Vec<K>>,
}

impl<K> Default for IndexState<K> {
    fn default() -> Self {
        Self {
            forward: AHashMap::new(),
            reverse: AHashMap::new(),
        }
    }
}

// === impl IndexInner ===

impl<K: IndexKey, T: Resource> IndexInner<K, T> {
    fn update(&self, backing_keys: &[String]) {
        let mut changed = BTreeSet::new();
        {
            let _pass = self.pass.lock();
            let mut state = self.state.write();
            for backing_key in backing_keys {
                let new_ks = match self.backing.get(backing_key) {
                    Some(value) => (self.project)(&value),
                    None => Vec::new(),
                };

                let old_ks = state.reverse.remove(backing_key).unwrap_or_default();
                for k in &old_ks {
                    if let Some(set) = state.forward.get_mut(k) {
                        set.remove(backing_key);
                        if set.is_empty() {
                            state.forward.remove(k);
                        }
                    }
                }
                for k in &new_ks {
                    state
                        .forward
                        .entry(k.clone())
                        .or_default()
                        .insert(backing_key.clone());
                }

                // The backing value changed even if its projected keys did
                // not, so dependents of either key set must re-run.
                for k in old_ks.iter().chain(new_ks.iter()) {
                    changed.insert(k.to_string());
                }
                if !new_ks.is_empty() {
                    state.reverse.insert(backing_key.clone(), new_ks);
                }
            }
            if !changed.is_empty() {
                self.version.fetch_add(1, Ordering::AcqRel);
            }
        }
        let changed = changed.into_iter().collect::<Vec<_>>();
        self.subs.notify(&changed);
    }
}

impl<K: IndexKey, T: Resource> AnyCollection for IndexInner<K, T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_synced(&self) -> bool {
        self.backing.has_synced()
    }

    fn subscribe_keys(&self, watcher: KeyWatcher) {
        self.subs.push(watcher);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
