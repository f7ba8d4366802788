use crate::{policy::AttachedPolicies, GroupKind, ObjectSource, ResolveError};
use gatewright_collections::Resource;

/// The cluster traffic is sent to when a backend reference cannot be
/// resolved. The data plane configures it to return 500s.
pub const BLACKHOLE_CLUSTER: &str = "blackhole-cluster";

/// A reference to a backend as written on a route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    /// Absent means the referencing object's own namespace.
    pub namespace: Option<String>,
    pub port: Option<u16>,
    pub weight: Option<u32>,
}

// === impl BackendRef ===

impl BackendRef {
    /// Resolves the reference to a concrete object identity, defaulting the
    /// namespace to `local_ns` and the kind to Service.
    pub fn object_source(&self, local_ns: &str) -> ObjectSource {
        let gk = if self.kind.is_empty() {
            GroupKind::service()
        } else {
            GroupKind::new(self.group.clone(), self.kind.clone())
        };
        ObjectSource {
            group: gk.group,
            kind: gk.kind,
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| local_ns.to_string()),
            name: self.name.clone(),
        }
    }
}

/// A routable backend: one (object, port) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Upstream {
    pub source: ObjectSource,
    pub port: u16,
    pub hostname: String,
    /// True when the owning service exposes exactly one port, in which case
    /// every endpoint-slice port serves it regardless of name.
    pub single_port: bool,
    pub attached_policies: AttachedPolicies,
}

// === impl Upstream ===

impl Upstream {
    pub fn resource_name_for(source: &ObjectSource, port: u16) -> String {
        format!("{}:{port}", source.resource_name())
    }

    pub fn cluster_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.source.kind.to_ascii_lowercase(),
            self.source.namespace,
            self.source.name,
            self.port
        )
    }
}

impl Resource for Upstream {
    fn resource_name(&self) -> String {
        Self::resource_name_for(&self.source, self.port)
    }
}

/// The outcome of resolving a [`BackendRef`]: either a live upstream or the
/// black-hole cluster with the failure attached.
#[derive(Clone, Debug, PartialEq)]
pub struct Backend {
    pub upstream: Option<Upstream>,
    pub cluster_name: String,
    pub weight: u32,
    pub error: Option<ResolveError>,
}

// === impl Backend ===

impl Backend {
    pub fn resolved(upstream: Upstream, weight: u32) -> Self {
        Self {
            cluster_name: upstream.cluster_name(),
            upstream: Some(upstream),
            weight,
            error: None,
        }
    }

    pub fn blackhole(error: ResolveError, weight: u32) -> Self {
        Self {
            upstream: None,
            cluster_name: BLACKHOLE_CLUSTER.to_string(),
            weight,
            error: Some(error),
        }
    }
}
