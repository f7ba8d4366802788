//! The seam between resource watches and raw collections.

use crate::Obj;
use gatewright_collections::{source, Collection, Resource, Writer};
use parking_lot::RwLock;
use std::sync::Arc;

/// Feeds a watched resource kind into a raw collection. One ingest exists
/// per watched kind; the watch machinery drives it through
/// [`kubert::index::IndexNamespacedResource`].
pub struct Ingest<R> {
    writer: Writer<Obj<R>>,
}

/// Creates the ingest for a resource kind and its backing collection.
///
/// The collection reports unsynced until the first `reset`.
pub fn watch<R>(name: impl Into<String>) -> (Arc<RwLock<Ingest<R>>>, Collection<Obj<R>>)
where
    Obj<R>: Resource,
{
    let (writer, collection) = source(name);
    (Arc::new(RwLock::new(Ingest { writer })), collection)
}

// === impl Ingest ===

impl<R> Ingest<R>
where
    Obj<R>: Resource,
{
    pub fn apply(&mut self, resource: R) {
        self.writer.apply(Obj::new(resource));
    }

    /// Removes by collection key: `"{ns}/{name}"`, or bare `"{name}"` for
    /// cluster-scoped kinds.
    pub fn delete(&mut self, key: &str) {
        self.writer.delete(key);
    }

    /// Replays the full live set, dropping stale keys and marking the
    /// collection synced.
    pub fn reset(&mut self, resources: Vec<R>) {
        self.writer
            .reset(resources.into_iter().map(Obj::new).collect());
    }
}

impl<R> kubert::index::IndexNamespacedResource<R> for Ingest<R>
where
    R: kube::Resource<DynamicType = ()> + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: R) {
        Ingest::apply(self, resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        Ingest::delete(self, &format!("{namespace}/{name}"));
    }

    fn reset(&mut self, resources: Vec<R>, _removed: kubert::index::NamespacedRemoved) {
        Ingest::reset(self, resources);
    }
}

impl<R> kubert::index::IndexClusterResource<R> for Ingest<R>
where
    R: kube::Resource<DynamicType = ()> + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: R) {
        Ingest::apply(self, resource);
    }

    fn delete(&mut self, name: String) {
        Ingest::delete(self, &name);
    }

    fn reset(&mut self, resources: Vec<R>, _removed: kubert::index::ClusterRemoved) {
        Ingest::reset(self, resources);
    }
}
