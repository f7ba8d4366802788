//! Core types shared across the control plane: object identity, backend
//! references, endpoint localities, and policy attachment.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backend;
mod hash;
mod policy;

pub use self::{
    backend::{Backend, BackendRef, Upstream, BLACKHOLE_CLUSTER},
    hash::{combine, hash_labels, stable_hash},
    policy::{
        AttachedPolicies, AttachmentPoint, AttachmentPoints, PolicyAtt, PolicyIr, PolicyTargetRef,
        PolicyWrapper,
    },
};
use gatewright_collections::Resource;
use std::collections::BTreeMap;

/// Identifies a Kubernetes object by group, kind, namespace, and name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectSource {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

// === impl ObjectSource ===

impl ObjectSource {
    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: "".to_string(),
            kind: "Service".to_string(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind {
            group: self.group.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn resource_name(&self) -> String {
        format!(
            "{}/{}:{}/{}",
            self.group, self.kind, self.namespace, self.name
        )
    }
}

impl std::fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.resource_name())
    }
}

/// An API group and kind pair. The core group is the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

// === impl GroupKind ===

impl GroupKind {
    /// Normalizes the legacy "core" group spelling to the empty string.
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        let group = group.into();
        let group = if group == "core" { String::new() } else { group };
        Self {
            group,
            kind: kind.into(),
        }
    }

    pub fn service() -> Self {
        Self {
            group: String::new(),
            kind: "Service".to_string(),
        }
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.kind)
    }
}

/// The topology position of a pod, from coarsest to finest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodLocality {
    pub region: String,
    pub zone: String,
    pub subzone: String,
}

impl std::fmt::Display for PodLocality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.zone, self.subzone)
    }
}

/// A pod augmented with its node's topology labels.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalityPod {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub locality: PodLocality,
    pub ip: Option<String>,
}

// === impl LocalityPod ===

impl Resource for LocalityPod {
    fn resource_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Why a backend reference could not be resolved.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("backend {0} not found")]
    NotFound(ObjectSource),

    #[error("backend {0} not accessible: missing ReferenceGrant")]
    MissingReferenceGrant(ObjectSource),

    #[error("no known backend kind {0}")]
    UnknownBackendKind(GroupKind),
}
