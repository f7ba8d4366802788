use crate::{
    collection::{
        AnyCollection, Collection, CollectionId, KeyWatcher, Resource, Store, Subscribers,
    },
    index::{Index, IndexKey},
    source,
};
use ahash::{AHashMap, AHashSet};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Tracks the dependencies touched while a transform runs.
///
/// Every `fetch` records an edge from the input key being transformed to the
/// fetched collection and key, so that later changes to that key re-run only
/// the affected transforms. The fetched collection's version counter is
/// captured alongside the edge so a change racing the transform is detected
/// after the fact.
pub struct HandlerContext {
    deps: Vec<(Arc<dyn AnyCollection>, String, u64)>,
}

// === impl HandlerContext ===

impl HandlerContext {
    pub fn new() -> Self {
        Self { deps: Vec::new() }
    }

    /// Fetches a single value from `collection`, recording the dependency.
    pub fn fetch<T: Resource>(&mut self, collection: &Collection<T>, key: &str) -> Option<T> {
        self.record(collection.inner.erased(), key.to_string());
        collection.get(key)
    }

    /// Fetches all values matching `key` in `index`, recording the dependency.
    pub fn fetch_index<K: IndexKey, T: Resource>(
        &mut self,
        index: &Index<K, T>,
        key: &K,
    ) -> Vec<T> {
        self.record(index.erased(), key.to_string());
        index.lookup(key)
    }

    // The version is captured before the caller reads the value, so a write
    // racing the read can only make the re-check conservative, never miss.
    pub(crate) fn record(&mut self, dep: Arc<dyn AnyCollection>, key: String) {
        let version = dep.version();
        self.deps.push((dep, key, version));
    }

    fn take_deps(self) -> Vec<(Arc<dyn AnyCollection>, String, u64)> {
        self.deps
    }
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives a one-to-at-most-one collection from `parent`.
pub fn derive<S, T, F>(name: impl Into<String>, parent: &Collection<S>, transform: F) -> Collection<T>
where
    S: Resource,
    T: Resource,
    F: Fn(&mut HandlerContext, &S) -> Option<T> + Send + Sync + 'static,
{
    derive_many(name, parent, move |ctx, src| {
        transform(ctx, src).into_iter().collect()
    })
}

/// Derives a one-to-many collection from `parent`.
///
/// The transform runs once per input key whenever that key (or any
/// dependency it fetched) changes. Output keys must be unique across inputs;
/// a duplicate is a contract violation and the later value wins.
pub fn derive_many<S, T, F>(
    name: impl Into<String>,
    parent: &Collection<S>,
    transform: F,
) -> Collection<T>
where
    S: Resource,
    T: Resource,
    F: Fn(&mut HandlerContext, &S) -> Vec<T> + Send + Sync + 'static,
{
    let inner = Arc::new_cyclic(|weak: &Weak<DerivedInner<S, T>>| DerivedInner {
        weak: weak.clone(),
        id: CollectionId::next(),
        name: name.into(),
        parent: parent.clone(),
        transform: Box::new(transform),
        state: parking_lot::RwLock::new(DerivedState::default()),
        pass: parking_lot::Mutex::new(()),
        subs: Subscribers::new(),
        version: AtomicU64::new(0),
    });

    // Subscribe before the initial scan so a parent change racing the scan
    // is recomputed rather than lost; recomputes are idempotent.
    {
        let weak = inner.weak.clone();
        parent.subscribe(Arc::new(move |keys: &[String]| {
            if let Some(inner) = weak.upgrade() {
                inner.recompute(keys);
            }
        }));
    }

    let initial = parent
        .list()
        .iter()
        .map(|s| s.resource_name())
        .collect::<Vec<_>>();
    inner.recompute(&initial);
    inner.state.write().initial_done = true;

    Collection {
        inner: inner as Arc<dyn Store<T>>,
    }
}

/// Creates a singleton-input collection whose transform runs from no source
/// value at all. Paired with a [`crate::RecomputeTrigger`], this turns
/// externally held state into a collection.
pub fn derive_from_nothing<T, F>(name: impl Into<String>, transform: F) -> Collection<T>
where
    T: Resource,
    F: Fn(&mut HandlerContext) -> Vec<T> + Send + Sync + 'static,
{
    let (writer, unit) = source::source::<Unit>("unit");
    writer.reset(vec![Unit]);
    let collection = derive_many(name, &unit, move |ctx, _unit| transform(ctx));
    // The writer is dropped, but the unit source stays alive through the
    // derived collection's parent handle.
    collection
}

#[derive(Clone, PartialEq)]
struct Unit;

impl Resource for Unit {
    fn resource_name(&self) -> String {
        "singleton".to_string()
    }
}

struct DerivedInner<S, T> {
    weak: Weak<DerivedInner<S, T>>,
    id: CollectionId,
    name: String,
    parent: Collection<S>,
    #[allow(clippy::type_complexity)]
    transform: Box<dyn Fn(&mut HandlerContext, &S) -> Vec<T> + Send + Sync>,
    state: parking_lot::RwLock<DerivedState<T>>,
    /// Serializes recompute passes so interleaved passes cannot commit out
    /// of order. Held only while computing and committing, never while
    /// notifying subscribers.
    pass: parking_lot::Mutex<()>,
    subs: Subscribers,
    version: AtomicU64,
}

struct DerivedState<T> {
    items: BTreeMap<String, T>,
    /// Output keys produced by each input key.
    by_src: AHashMap<String, Vec<String>>,
    /// Dependency collections this collection has fetched from, with the
    /// fetched keys mapped back to the input keys that fetched them.
    deps: AHashMap<CollectionId, DepEntry>,
    /// Reverse of `deps`: the (collection, key) pairs each input depends on.
    src_deps: AHashMap<String, Vec<(CollectionId, String)>>,
    initial_done: bool,
}

struct DepEntry {
    handle: Arc<dyn AnyCollection>,
    keys: AHashMap<String, AHashSet<String>>,
}

impl<T> Default for DerivedState<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            by_src: AHashMap::new(),
            deps: AHashMap::new(),
            src_deps: AHashMap::new(),
            initial_done: false,
        }
    }
}

// === impl DerivedInner ===

impl<S: Resource, T: Resource> DerivedInner<S, T> {
    /// Re-runs the transform for each of `src_keys` and propagates any
    /// output keys whose values changed.
    fn recompute(&self, src_keys: &[String]) {
        let changed = {
            let _pass = self.pass.lock();
            let mut changed = Vec::new();
            for src_key in src_keys {
                self.recompute_one(src_key, &mut changed);
            }
            changed
        };
        self.subs.notify(&changed);
    }

    fn recompute_one(&self, src_key: &str, changed: &mut Vec<String>) {
        loop {
            let src = self.parent.get(src_key);

            // Run the transform outside our own state lock so fetches into
            // other collections never deadlock against notifications.
            let (outs, deps) = match &src {
                Some(src) => {
                    let mut ctx = HandlerContext::new();
                    let outs = (self.transform)(&mut ctx, src);
                    (outs, ctx.take_deps())
                }
                None => (Vec::new(), Vec::new()),
            };

            let mut new_subs = Vec::new();
            {
                let mut state = self.state.write();

                // Clear this input's old dependency edges.
                if let Some(old) = state.src_deps.remove(src_key) {
                    for (dep_id, dep_key) in old {
                        if let Some(entry) = state.deps.get_mut(&dep_id) {
                            if let Some(srcs) = entry.keys.get_mut(&dep_key) {
                                srcs.remove(src_key);
                                if srcs.is_empty() {
                                    entry.keys.remove(&dep_key);
                                }
                            }
                        }
                    }
                }

                // Record the new edges, subscribing once per newly-seen
                // dependency collection.
                let mut src_edges = Vec::with_capacity(deps.len());
                for (handle, dep_key, _) in &deps {
                    let dep_id = handle.id();
                    let entry = state.deps.entry(dep_id).or_insert_with(|| {
                        new_subs.push((dep_id, handle.clone()));
                        DepEntry {
                            handle: handle.clone(),
                            keys: AHashMap::new(),
                        }
                    });
                    entry
                        .keys
                        .entry(dep_key.clone())
                        .or_default()
                        .insert(src_key.to_string());
                    src_edges.push((dep_id, dep_key.clone()));
                }
                if !src_edges.is_empty() {
                    state.src_deps.insert(src_key.to_string(), src_edges);
                }

                // Diff the new outputs against the previous ones.
                let old_outs = state.by_src.remove(src_key).unwrap_or_default();
                let mut new_out_keys = Vec::with_capacity(outs.len());
                let mut committed = false;
                for out in outs {
                    let out_key = out.resource_name();
                    if new_out_keys.contains(&out_key) {
                        debug_assert!(false, "duplicate output key {out_key}");
                        tracing::warn!(
                            collection = %self.name,
                            key = %out_key,
                            "Transform produced a duplicate output key"
                        );
                    } else {
                        new_out_keys.push(out_key.clone());
                    }
                    if state.items.get(&out_key) != Some(&out) {
                        state.items.insert(out_key.clone(), out);
                        changed.push(out_key);
                        committed = true;
                    }
                }
                for old_key in old_outs {
                    if !new_out_keys.contains(&old_key) {
                        state.items.remove(&old_key);
                        changed.push(old_key);
                        committed = true;
                    }
                }
                if !new_out_keys.is_empty() {
                    state.by_src.insert(src_key.to_string(), new_out_keys);
                }
                if committed {
                    self.version.fetch_add(1, Ordering::AcqRel);
                }
            }

            for (dep_id, handle) in new_subs {
                let weak = self.weak.clone();
                handle.subscribe_keys(Arc::new(move |dep_keys: &[String]| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_dependency_changed(dep_id, dep_keys);
                    }
                }));
            }

            // A dependency that changed after it was read but before its
            // subscription existed raised no notification; versions are
            // bumped before notify, so comparing them here closes the
            // window. Re-run until the captured versions hold.
            if deps
                .iter()
                .all(|(handle, _, version)| handle.version() == *version)
            {
                return;
            }
        }
    }

    fn on_dependency_changed(&self, dep_id: CollectionId, dep_keys: &[String]) {
        let affected = {
            let state = self.state.read();
            let Some(entry) = state.deps.get(&dep_id) else {
                return;
            };
            let mut affected = AHashSet::new();
            for dep_key in dep_keys {
                if let Some(srcs) = entry.keys.get(dep_key) {
                    affected.extend(srcs.iter().cloned());
                }
            }
            affected.into_iter().collect::<Vec<_>>()
        };
        if !affected.is_empty() {
            self.recompute(&affected);
        }
    }
}

impl<S: Resource, T: Resource> AnyCollection for DerivedInner<S, T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_synced(&self) -> bool {
        if !self.parent.has_synced() {
            return false;
        }
        let state = self.state.read();
        state.initial_done && state.deps.values().all(|d| d.handle.has_synced())
    }

    fn subscribe_keys(&self, watcher: KeyWatcher) {
        self.subs.push(watcher);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<S: Resource, T: Resource> Store<T> for DerivedInner<S, T> {
    fn get(&self, key: &str) -> Option<T> {
        self.state.read().items.get(key).cloned()
    }

    fn list(&self) -> Vec<T> {
        self.state.read().items.values().cloned().collect()
    }

    fn erased(&self) -> Arc<dyn AnyCollection> {
        self.weak
            .upgrade()
            .expect("derived collection must be alive")
    }
}
