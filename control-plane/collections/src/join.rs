use crate::collection::{
    AnyCollection, Collection, CollectionId, KeyWatcher, Resource, Store, Subscribers,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Merges several collections of the same type into one.
///
/// Keys are expected to be disjoint across members. On a collision the most
/// recently changed member wins and a warning is logged.
pub fn join<T: Resource>(name: impl Into<String>, members: Vec<Collection<T>>) -> Collection<T> {
    let inner = Arc::new_cyclic(|weak: &Weak<JoinInner<T>>| JoinInner {
        weak: weak.clone(),
        id: CollectionId::next(),
        name: name.into(),
        members,
        state: parking_lot::RwLock::new(BTreeMap::new()),
        pass: parking_lot::Mutex::new(()),
        subs: Subscribers::new(),
        version: AtomicU64::new(0),
    });

    // Subscribe each member before scanning it so a change racing the scan
    // is re-applied rather than lost; updates are idempotent.
    for (idx, member) in inner.members.iter().enumerate() {
        let weak = inner.weak.clone();
        member.subscribe(Arc::new(move |keys: &[String]| {
            if let Some(inner) = weak.upgrade() {
                inner.update(idx, keys);
            }
        }));

        let initial = member
            .list()
            .iter()
            .map(|t| t.resource_name())
            .collect::<Vec<_>>();
        inner.update(idx, &initial);
    }

    Collection {
        inner: inner as Arc<dyn Store<T>>,
    }
}

struct JoinInner<T> {
    weak: Weak<JoinInner<T>>,
    id: CollectionId,
    name: String,
    members: Vec<Collection<T>>,
    state: parking_lot::RwLock<BTreeMap<String, T>>,
    /// Serializes update passes so interleaved member notifications cannot
    /// commit out of order.
    pass: parking_lot::Mutex<()>,
    subs: Subscribers,
    version: AtomicU64,
}

// === impl JoinInner ===

impl<T: Resource> JoinInner<T> {
    fn update(&self, member_idx: usize, keys: &[String]) {
        let mut changed = Vec::new();
        let _pass = self.pass.lock();
        for key in keys {
            // The changed member's value wins; otherwise fall back to any
            // other member still holding the key.
            let value = self.members[member_idx].get(key).or_else(|| {
                self.members
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != member_idx)
                    .find_map(|(_, m)| m.get(key))
            });

            let holders = self.members.iter().filter(|m| m.get(key).is_some()).count();
            if holders > 1 {
                tracing::warn!(
                    collection = %self.name,
                    key = %key,
                    "Key present in multiple joined collections"
                );
            }

            let mut state = self.state.write();
            match value {
                Some(value) => {
                    if state.get(key) != Some(&value) {
                        state.insert(key.clone(), value);
                        changed.push(key.clone());
                    }
                }
                None => {
                    if state.remove(key).is_some() {
                        changed.push(key.clone());
                    }
                }
            }
        }
        if !changed.is_empty() {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        drop(_pass);
        self.subs.notify(&changed);
    }
}

impl<T: Resource> AnyCollection for JoinInner<T> {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_synced(&self) -> bool {
        self.members.iter().all(|m| m.has_synced())
    }

    fn subscribe_keys(&self, watcher: KeyWatcher) {
        self.subs.push(watcher);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T: Resource> Store<T> for JoinInner<T> {
    fn get(&self, key: &str) -> Option<T> {
        self.state.read().get(key).cloned()
    }

    fn list(&self) -> Vec<T> {
        self.state.read().values().cloned().collect()
    }

    fn erased(&self) -> Arc<dyn AnyCollection> {
        self.weak.upgrade().expect("joined collection must be alive")
    }
}
