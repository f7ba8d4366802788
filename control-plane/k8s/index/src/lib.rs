//! Derived indices over watched Kubernetes resources: locality-augmented
//! pods, the locality-aware endpoint aggregator, the upstream registry, the
//! policy-attachment index, and the reference-grant authorization index.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoints;
pub mod ingest;
pub mod locality;
pub mod policy;
pub mod upstreams;

#[cfg(test)]
mod tests;

use gatewright_collections::Resource;
use kube::ResourceExt;
use std::{ops::Deref, sync::Arc};

/// A watched Kubernetes object held behind an `Arc` so collections can clone
/// it cheaply.
#[derive(Debug)]
pub struct Obj<R>(pub Arc<R>);

// === impl Obj ===

impl<R> Obj<R> {
    pub fn new(resource: R) -> Self {
        Self(Arc::new(resource))
    }
}

impl<R> Clone for Obj<R> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<R: PartialEq> PartialEq for Obj<R> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl<R> Deref for Obj<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.0
    }
}

impl<R> Resource for Obj<R>
where
    R: kube::Resource<DynamicType = ()> + PartialEq + Send + Sync + 'static,
{
    fn resource_name(&self) -> String {
        match self.0.namespace() {
            Some(ns) => format!("{ns}/{}", self.0.name_unchecked()),
            None => self.0.name_unchecked(),
        }
    }
}

/// Cluster-wide configuration threaded into index construction.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    pub cluster_domain: String,
}

// === impl ClusterInfo ===

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            cluster_domain: "cluster.local".to_string(),
        }
    }
}

impl ClusterInfo {
    pub fn service_hostname(&self, namespace: &str, name: &str) -> String {
        format!("{name}.{namespace}.svc.{}", self.cluster_domain)
    }
}
