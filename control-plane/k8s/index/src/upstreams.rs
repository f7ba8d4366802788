//! The registry of routable backends, keyed by kind.

use crate::{
    policy::{PolicyIndex, RefGrantIndex},
    ClusterInfo, Obj,
};
use gatewright_collections::{derive, derive_many, Collection, HandlerContext};
use gatewright_core::{
    AttachmentPoint, Backend, BackendRef, GroupKind, ObjectSource, ResolveError, Upstream,
};
use gatewright_k8s_api::{ResourceExt, Service};
use std::sync::Arc;

/// Maps each backend kind to the collection contributing its upstreams.
/// Resolution failures never abort a pass; they come back as black-hole
/// backends carrying the typed error.
pub struct UpstreamIndex {
    available: Vec<(GroupKind, Collection<Upstream>)>,
    policies: Arc<PolicyIndex>,
}

// === impl UpstreamIndex ===

impl UpstreamIndex {
    pub fn new(policies: Arc<PolicyIndex>) -> Self {
        Self {
            available: Vec::new(),
            policies,
        }
    }

    /// Registers a kind's upstreams. Each upstream is re-derived with the
    /// policies attached to it at upstream level.
    pub fn add_upstreams(&mut self, gk: GroupKind, upstreams: Collection<Upstream>) {
        let policies = self.policies.clone();
        let wrapped = derive(
            format!("{}-upstreams-with-policies", gk.kind.to_ascii_lowercase()),
            &upstreams,
            move |ctx, upstream: &Upstream| {
                let mut upstream = upstream.clone();
                upstream.attached_policies =
                    policies.attached(ctx, AttachmentPoint::Upstream, &upstream.source);
                Some(upstream)
            },
        );
        self.available.push((gk, wrapped));
    }

    /// Resolves a backend reference written on an object in `from_namespace`.
    /// Cross-namespace references are authorized against the grant index
    /// before the backend is even looked up.
    pub fn resolve(
        &self,
        ctx: &mut HandlerContext,
        from_gk: &GroupKind,
        from_namespace: &str,
        grants: &RefGrantIndex,
        backend_ref: &BackendRef,
    ) -> Backend {
        let weight = backend_ref.weight.unwrap_or(1);
        let source = backend_ref.object_source(from_namespace);
        if source.namespace != from_namespace
            && !grants.reference_allowed(ctx, from_gk, from_namespace, &source)
        {
            return Backend::blackhole(ResolveError::MissingReferenceGrant(source), weight);
        }
        match self.get(ctx, &source, backend_ref.port) {
            Ok(upstream) => Backend::resolved(upstream, weight),
            Err(error) => Backend::blackhole(error, weight),
        }
    }

    fn get(
        &self,
        ctx: &mut HandlerContext,
        source: &ObjectSource,
        port: Option<u16>,
    ) -> Result<Upstream, ResolveError> {
        let gk = source.group_kind();
        let upstreams = self
            .available
            .iter()
            .find(|(g, _)| g == &gk)
            .map(|(_, c)| c)
            .ok_or(ResolveError::UnknownBackendKind(gk))?;
        let port = port.ok_or_else(|| ResolveError::NotFound(source.clone()))?;
        ctx.fetch(upstreams, &Upstream::resource_name_for(source, port))
            .ok_or_else(|| ResolveError::NotFound(source.clone()))
    }

    pub fn has_synced(&self) -> bool {
        self.available.iter().all(|(_, c)| c.has_synced()) && self.policies.has_synced()
    }
}

/// Derives one [`Upstream`] per (service, port).
pub fn service_upstreams(
    cluster: &ClusterInfo,
    services: &Collection<Obj<Service>>,
) -> Collection<Upstream> {
    let cluster = cluster.clone();
    derive_many("service-upstreams", services, move |_ctx, svc: &Obj<Service>| {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_unchecked();
        let Some(ports) = svc.spec.as_ref().and_then(|spec| spec.ports.as_ref()) else {
            return Vec::new();
        };
        let single_port = ports.len() == 1;
        let source = ObjectSource::service(&namespace, &name);
        let hostname = cluster.service_hostname(&namespace, &name);
        ports
            .iter()
            .filter_map(|p| u16::try_from(p.port).ok())
            .map(|port| Upstream {
                source: source.clone(),
                port,
                hostname: hostname.clone(),
                single_port,
                attached_policies: Default::default(),
            })
            .collect()
    })
}
