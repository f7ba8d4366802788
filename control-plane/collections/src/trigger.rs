use crate::{
    collection::{AnyCollection, CollectionId, KeyWatcher, Subscribers},
    derived::HandlerContext,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// An externally fired invalidation source.
///
/// A transform that reads state the collection system cannot see calls
/// [`RecomputeTrigger::mark_dependent`] while it runs; the state's owner
/// calls [`RecomputeTrigger::trigger`] after mutating it, re-running every
/// dependent transform.
#[derive(Clone)]
pub struct RecomputeTrigger {
    inner: Arc<TriggerInner>,
}

struct TriggerInner {
    id: CollectionId,
    name: String,
    subs: Subscribers,
    version: AtomicU64,
}

// === impl RecomputeTrigger ===

impl RecomputeTrigger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                id: CollectionId::next(),
                name: name.into(),
                subs: Subscribers::new(),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Records the running transform as a dependent of this trigger.
    pub fn mark_dependent(&self, ctx: &mut HandlerContext) {
        ctx.record(self.inner.clone(), "trigger".to_string());
    }

    /// Re-runs every transform that has marked itself dependent.
    pub fn trigger(&self) {
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.subs.notify(&["trigger".to_string()]);
    }
}

impl Default for RecomputeTrigger {
    fn default() -> Self {
        Self::new("trigger")
    }
}

// === impl TriggerInner ===

impl AnyCollection for TriggerInner {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_synced(&self) -> bool {
        true
    }

    fn subscribe_keys(&self, watcher: KeyWatcher) {
        self.subs.push(watcher);
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
