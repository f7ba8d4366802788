//! Locality-aware endpoint aggregation: one record per upstream, bucketing
//! every ready endpoint address under the serving pod's locality.

use crate::Obj;
use ahash::AHashSet;
use gatewright_collections::{derive, Collection, HandlerContext, Index, Resource};
use gatewright_core::{
    combine, stable_hash, GroupKind, LocalityPod, ObjectSource, PodLocality, Upstream,
};
use gatewright_k8s_api::{EndpointSlice, ResourceExt, Service, ServicePort};
use std::collections::BTreeMap;

/// The well-known label tying an endpoint slice to its service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Indexes endpoint slices by the service they serve.
pub fn slices_by_service(
    slices: &Collection<Obj<EndpointSlice>>,
) -> Index<ServiceKey, Obj<EndpointSlice>> {
    Index::new("slices-by-service", slices, |slice: &Obj<EndpointSlice>| {
        let service = slice
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(SERVICE_NAME_LABEL));
        match service {
            Some(name) => vec![ServiceKey {
                namespace: slice.namespace().unwrap_or_default(),
                name: name.clone(),
            }],
            None => Vec::new(),
        }
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// An endpoint annotated with the serving pod's augmented labels.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointWithMd {
    pub endpoint: Endpoint,
    pub labels: BTreeMap<String, String>,
}

/// All ready endpoints of one upstream, bucketed by locality.
///
/// Equality goes through an order-independent fingerprint rather than the
/// buckets themselves, so permuted slice deliveries compare equal.
#[derive(Clone, Debug)]
pub struct EndpointsForUpstream {
    pub lb_eps: BTreeMap<PodLocality, Vec<EndpointWithMd>>,
    pub upstream: ObjectSource,
    pub port: u16,
    pub hostname: String,
    upstream_hash: u64,
    eps_hash: u64,
}

// === impl EndpointsForUpstream ===

impl EndpointsForUpstream {
    pub fn new(upstream: &Upstream) -> Self {
        Self {
            lb_eps: BTreeMap::new(),
            upstream: upstream.source.clone(),
            port: upstream.port,
            hostname: upstream.hostname.clone(),
            upstream_hash: stable_hash(&(&upstream.source, upstream.port)),
            eps_hash: 0,
        }
    }

    /// Adds an endpoint under its locality, folding it into the fingerprint.
    /// XOR keeps the fingerprint independent of insertion order.
    pub fn add(&mut self, locality: PodLocality, ep: EndpointWithMd) {
        self.eps_hash ^= stable_hash(&(&locality, &ep.labels, &ep.endpoint));
        self.lb_eps.entry(locality).or_default().push(ep);
    }

    /// The endpoint-set identity, bound to the upstream so identical sets
    /// under different upstreams stay distinct.
    pub fn fingerprint(&self) -> u64 {
        combine(self.upstream_hash, self.eps_hash)
    }
}

impl PartialEq for EndpointsForUpstream {
    fn eq(&self, other: &Self) -> bool {
        self.upstream == other.upstream
            && self.port == other.port
            && self.hostname == other.hostname
            && self.fingerprint() == other.fingerprint()
    }
}

impl Resource for EndpointsForUpstream {
    fn resource_name(&self) -> String {
        Upstream::resource_name_for(&self.upstream, self.port)
    }
}

/// The collections the aggregator reads.
pub struct EndpointsInputs {
    pub upstreams: Collection<Upstream>,
    pub services: Collection<Obj<Service>>,
    pub slices_by_service: Index<ServiceKey, Obj<EndpointSlice>>,
    pub pods: Collection<LocalityPod>,
}

/// Derives one [`EndpointsForUpstream`] per service-backed upstream.
///
/// An upstream whose service or port cannot be resolved yields no record; a
/// resolvable upstream with zero ready addresses yields an empty record, so
/// consumers can tell "no backend" from "backend with nothing ready".
pub fn endpoints(inputs: EndpointsInputs) -> Collection<EndpointsForUpstream> {
    let EndpointsInputs {
        upstreams,
        services,
        slices_by_service,
        pods,
    } = inputs;

    derive("endpoints", &upstreams, move |ctx, upstream: &Upstream| {
        if upstream.source.group_kind() != GroupKind::service() {
            return None;
        }
        let svc_key = format!("{}/{}", upstream.source.namespace, upstream.source.name);
        let svc = ctx.fetch(&services, &svc_key)?;
        let svc_port = find_port_for_service(&svc, upstream.port)?;

        let slices = ctx.fetch_index(
            &slices_by_service,
            &ServiceKey {
                namespace: upstream.source.namespace.clone(),
                name: upstream.source.name.clone(),
            },
        );

        let mut result = EndpointsForUpstream::new(upstream);
        let mut seen = AHashSet::new();
        for slice in slices {
            let Some(port) = find_port_in_slice(&slice, &svc_port, upstream.single_port) else {
                tracing::debug!(
                    slice = %slice.resource_name(),
                    service = %svc_key,
                    "Slice has no port matching the service port"
                );
                continue;
            };
            for ep in &slice.endpoints {
                let ready = ep.conditions.as_ref().and_then(|c| c.ready);
                if ready == Some(false) {
                    continue;
                }

                let (locality, labels) = resolve_pod(ctx, &pods, &slice, ep)
                    .map(|pod| (pod.locality, pod.labels))
                    .unwrap_or_default();

                for address in &ep.addresses {
                    if !seen.insert((address.clone(), port)) {
                        continue;
                    }
                    result.add(
                        locality.clone(),
                        EndpointWithMd {
                            endpoint: Endpoint {
                                address: address.clone(),
                                port,
                            },
                            labels: labels.clone(),
                        },
                    );
                }
            }
        }
        Some(result)
    })
}

fn resolve_pod(
    ctx: &mut HandlerContext,
    pods: &Collection<LocalityPod>,
    slice: &Obj<EndpointSlice>,
    ep: &gatewright_k8s_api::Endpoint,
) -> Option<LocalityPod> {
    let target = ep.target_ref.as_ref()?;
    if target.kind.as_deref() != Some("Pod") {
        return None;
    }
    let name = target.name.as_deref()?;
    let namespace = target
        .namespace
        .clone()
        .or_else(|| slice.namespace())
        .unwrap_or_default();
    ctx.fetch(pods, &format!("{namespace}/{name}"))
}

/// Finds the service port matching the upstream's port.
fn find_port_for_service(svc: &Obj<Service>, port: u16) -> Option<ServicePort> {
    svc.spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.port == i32::from(port))
        .cloned()
}

/// Finds the target port in a slice. On a single-port service every slice
/// port serves that port, whatever it is named; otherwise ports are matched
/// by name.
fn find_port_in_slice(
    slice: &Obj<EndpointSlice>,
    svc_port: &ServicePort,
    single_port_svc: bool,
) -> Option<u16> {
    for port in slice.ports.as_ref()? {
        let matched = single_port_svc
            || match port.name.as_deref() {
                None | Some("") => false,
                Some(name) => Some(name) == svc_port.name.as_deref(),
            };
        if matched {
            return port.port.and_then(|p| u16::try_from(p).ok());
        }
    }
    None
}
