use crate::{
    endpoints::{endpoints, slices_by_service, EndpointsInputs},
    ingest::watch,
    locality::{locality_pods, REGION_LABEL, ZONE_LABEL},
    policy::{traffic_policies, PolicyIndex, PolicyPlugin, RefGrantIndex, TrafficPolicyIr},
    upstreams::{service_upstreams, UpstreamIndex},
    ClusterInfo, Obj,
};
use chrono::{TimeZone, Utc};
use gatewright_collections::{Collection, HandlerContext};
use gatewright_core::{
    AttachmentPoint, BackendRef, GroupKind, ObjectSource, PodLocality, ResolveError, Upstream,
    BLACKHOLE_CLUSTER,
};
use gatewright_k8s_api::{
    policy::LocalPolicyTargetRef,
    reference_grant::{ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo},
    EndpointConditions, EndpointSlice, Node, Pod, ReferenceGrant, Service, ServicePort, Time,
    TrafficPolicy, TrafficPolicySpec,
};
use k8s_openapi::api::{
    core::v1::{ObjectReference, PodSpec, PodStatus, ServiceSpec},
    discovery::v1::{Endpoint as SliceEndpoint, EndpointPort},
};
use maplit::btreemap;
use parking_lot::RwLock;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn mk_service(ns: &str, name: &str, ports: &[(Option<&str>, i32)]) -> Service {
    Service {
        metadata: gatewright_k8s_api::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: name.map(|n| n.to_string()),
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

struct SliceEp {
    address: &'static str,
    ready: Option<bool>,
    pod: Option<&'static str>,
}

fn ep(address: &'static str, pod: Option<&'static str>) -> SliceEp {
    SliceEp {
        address,
        ready: Some(true),
        pod,
    }
}

fn mk_slice(
    ns: &str,
    name: &str,
    svc: &str,
    port: (Option<&str>, i32),
    eps: Vec<SliceEp>,
) -> EndpointSlice {
    EndpointSlice {
        metadata: gatewright_k8s_api::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                crate::endpoints::SERVICE_NAME_LABEL.to_string() => svc.to_string(),
            }),
            ..Default::default()
        },
        address_type: "IPv4".to_string(),
        ports: Some(vec![EndpointPort {
            name: port.0.map(|n| n.to_string()),
            port: Some(port.1),
            ..Default::default()
        }]),
        endpoints: eps
            .into_iter()
            .map(|ep| SliceEndpoint {
                addresses: vec![ep.address.to_string()],
                conditions: Some(EndpointConditions {
                    ready: ep.ready,
                    ..Default::default()
                }),
                target_ref: ep.pod.map(|pod| ObjectReference {
                    kind: Some("Pod".to_string()),
                    name: Some(pod.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
    }
}

fn mk_pod(ns: &str, name: &str, node: Option<&str>, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: gatewright_k8s_api::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: node.map(|n| n.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            pod_ip: Some("10.0.0.1".to_string()),
            ..Default::default()
        }),
    }
}

fn mk_node(name: &str, region: &str, zone: &str) -> Node {
    Node {
        metadata: gatewright_k8s_api::ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                REGION_LABEL.to_string() => region.to_string(),
                ZONE_LABEL.to_string() => zone.to_string(),
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn mk_policy(
    ns: &str,
    name: &str,
    created_secs: i64,
    target: &str,
    section: Option<&str>,
) -> TrafficPolicy {
    let mut policy = TrafficPolicy::new(
        name,
        TrafficPolicySpec {
            target_refs: vec![LocalPolicyTargetRef {
                group: None,
                kind: "Service".to_string(),
                name: target.to_string(),
                section_name: section.map(|s| s.to_string()),
            }],
            timeout_seconds: Some(5),
            retries: None,
        },
    );
    policy.metadata.namespace = Some(ns.to_string());
    policy.metadata.uid = Some(format!("uid-{name}"));
    policy.metadata.generation = Some(1);
    policy.metadata.resource_version = Some("1".to_string());
    policy.metadata.creation_timestamp = Some(Time(
        Utc.timestamp_opt(created_secs, 0).single().expect("valid timestamp"),
    ));
    policy
}

fn mk_ref_grant(ns: &str, name: &str, from_ns: &str, to_name: Option<&str>) -> ReferenceGrant {
    let mut grant = ReferenceGrant::new(
        name,
        ReferenceGrantSpec {
            from: vec![ReferenceGrantFrom {
                group: "gateway.networking.k8s.io".to_string(),
                kind: "HTTPRoute".to_string(),
                namespace: from_ns.to_string(),
            }],
            to: vec![ReferenceGrantTo {
                group: "core".to_string(),
                kind: "Service".to_string(),
                name: to_name.map(|n| n.to_string()),
            }],
        },
    );
    grant.metadata.namespace = Some(ns.to_string());
    grant
}

struct World {
    services: Arc<RwLock<crate::ingest::Ingest<Service>>>,
    slices: Arc<RwLock<crate::ingest::Ingest<EndpointSlice>>>,
    pods: Arc<RwLock<crate::ingest::Ingest<Pod>>>,
    nodes: Arc<RwLock<crate::ingest::Ingest<Node>>>,
    endpoints: Collection<crate::endpoints::EndpointsForUpstream>,
    upstreams: Collection<Upstream>,
}

fn mk_world() -> World {
    init_tracing();
    let (services, service_objs) = watch::<Service>("services");
    let (slices, slice_objs) = watch::<EndpointSlice>("endpointslices");
    let (pods, pod_objs) = watch::<Pod>("pods");
    let (nodes, node_objs) = watch::<Node>("nodes");

    let upstreams = service_upstreams(&ClusterInfo::default(), &service_objs);
    let eps = endpoints(EndpointsInputs {
        upstreams: upstreams.clone(),
        services: service_objs,
        slices_by_service: slices_by_service(&slice_objs),
        pods: locality_pods(&pod_objs, &node_objs),
    });

    World {
        services,
        slices,
        pods,
        nodes,
        endpoints: eps,
        upstreams,
    }
}

fn route_gk() -> GroupKind {
    GroupKind::new("gateway.networking.k8s.io", "HTTPRoute")
}

#[test]
fn service_to_locality_bucketed_endpoints() {
    let world = mk_world();
    world.nodes.write().reset(vec![mk_node("node-1", "us-east", "us-east-1a")]);
    world
        .pods
        .write()
        .reset(vec![mk_pod("ns", "web-0", Some("node-1"), &[("app", "web")])]);
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    world.slices.write().reset(vec![mk_slice(
        "ns",
        "web-abc",
        "web",
        (None, 8080),
        vec![ep("1.2.3.4", Some("web-0"))],
    )]);

    assert!(world.endpoints.has_synced());
    let record = world
        .endpoints
        .get("/Service:ns/web:8080")
        .expect("endpoints for the service upstream");
    assert_eq!(record.hostname, "web.ns.svc.cluster.local");

    let locality = PodLocality {
        region: "us-east".to_string(),
        zone: "us-east-1a".to_string(),
        subzone: String::new(),
    };
    let bucket = record.lb_eps.get(&locality).expect("one locality bucket");
    assert_eq!(bucket.len(), 1);
    assert_eq!(bucket[0].endpoint.address, "1.2.3.4");
    assert_eq!(bucket[0].endpoint.port, 8080);
    // Pod labels are augmented with the node's topology labels.
    assert_eq!(bucket[0].labels.get("app").map(String::as_str), Some("web"));
    assert_eq!(
        bucket[0].labels.get(REGION_LABEL).map(String::as_str),
        Some("us-east")
    );
}

#[test]
fn endpoint_records_are_order_independent() {
    let slice_a = mk_slice("ns", "web-a", "web", (None, 8080), vec![ep("1.1.1.1", None)]);
    let slice_b = mk_slice("ns", "web-b", "web", (None, 8080), vec![ep("2.2.2.2", None)]);

    let forward = mk_world();
    forward
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    forward.slices.write().apply(slice_a.clone());
    forward.slices.write().apply(slice_b.clone());

    let reverse = mk_world();
    reverse
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    reverse.slices.write().apply(slice_b);
    reverse.slices.write().apply(slice_a);

    let a = forward.endpoints.get("/Service:ns/web:8080").expect("record");
    let b = reverse.endpoints.get("/Service:ns/web:8080").expect("record");
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(a, b);
}

#[test]
fn duplicate_addresses_across_slices_are_deduped() {
    let world = mk_world();
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    world.slices.write().reset(vec![
        mk_slice("ns", "web-a", "web", (None, 8080), vec![ep("1.1.1.1", None)]),
        mk_slice("ns", "web-b", "web", (None, 8080), vec![ep("1.1.1.1", None)]),
    ]);

    let record = world.endpoints.get("/Service:ns/web:8080").expect("record");
    let total: usize = record.lb_eps.values().map(Vec::len).sum();
    assert_eq!(total, 1);
}

#[test]
fn unready_endpoints_yield_an_empty_record() {
    let world = mk_world();
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    world.slices.write().reset(vec![mk_slice(
        "ns",
        "web-a",
        "web",
        (None, 8080),
        vec![SliceEp {
            address: "1.1.1.1",
            ready: Some(false),
            pod: None,
        }],
    )]);

    // The record exists but is empty: "nothing ready" is distinguishable
    // from "no such backend".
    let record = world.endpoints.get("/Service:ns/web:8080").expect("record");
    assert!(record.lb_eps.is_empty());
    assert!(world.endpoints.get("/Service:ns/other:8080").is_none());
}

#[test]
fn named_ports_must_match_unless_single_port() {
    let world = mk_world();
    world.services.write().reset(vec![mk_service(
        "ns",
        "web",
        &[(Some("http"), 8080), (Some("admin"), 9090)],
    )]);
    world.slices.write().reset(vec![
        mk_slice("ns", "web-a", "web", (Some("http"), 3000), vec![ep("1.1.1.1", None)]),
        // Unnamed slice port on a multi-port service never matches.
        mk_slice("ns", "web-b", "web", (None, 3001), vec![ep("2.2.2.2", None)]),
    ]);

    let record = world.endpoints.get("/Service:ns/web:8080").expect("record");
    let eps: Vec<_> = record.lb_eps.values().flatten().collect();
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].endpoint.address, "1.1.1.1");
    // The endpoint carries the slice's target port, not the service port.
    assert_eq!(eps[0].endpoint.port, 3000);
}

#[test]
fn single_port_services_match_any_slice_port_name() {
    let world = mk_world();
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(Some("http"), 8080)])]);
    // The slice names its port differently; on a single-port service it
    // still serves the service port.
    world.slices.write().reset(vec![mk_slice(
        "ns",
        "web-a",
        "web",
        (Some("metrics"), 3000),
        vec![ep("1.1.1.1", None)],
    )]);

    let record = world.endpoints.get("/Service:ns/web:8080").expect("record");
    let eps: Vec<_> = record.lb_eps.values().flatten().collect();
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].endpoint.port, 3000);
}

#[test]
fn node_arriving_after_pod_updates_locality() {
    let world = mk_world();
    world.nodes.write().reset(vec![]);
    world
        .pods
        .write()
        .reset(vec![mk_pod("ns", "web-0", Some("node-1"), &[])]);
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    world.slices.write().reset(vec![mk_slice(
        "ns",
        "web-abc",
        "web",
        (None, 8080),
        vec![ep("1.2.3.4", Some("web-0"))],
    )]);

    let record = world.endpoints.get("/Service:ns/web:8080").expect("record");
    assert!(record.lb_eps.contains_key(&PodLocality::default()));

    world.nodes.write().apply(mk_node("node-1", "us-west", "us-west-1b"));
    let record = world.endpoints.get("/Service:ns/web:8080").expect("record");
    let locality = PodLocality {
        region: "us-west".to_string(),
        zone: "us-west-1b".to_string(),
        subzone: String::new(),
    };
    assert!(record.lb_eps.contains_key(&locality));
    assert!(!record.lb_eps.contains_key(&PodLocality::default()));
}

#[test]
fn ingest_reset_drops_stale_keys() {
    let (services, objs) = watch::<Service>("services");
    assert!(!objs.has_synced());

    services.write().apply(mk_service("ns", "a", &[(None, 80)]));
    services.write().apply(mk_service("ns", "b", &[(None, 80)]));
    assert!(objs.get("ns/a").is_some());

    services.write().reset(vec![mk_service("ns", "b", &[(None, 80)])]);
    assert!(objs.has_synced());
    assert!(objs.get("ns/a").is_none());
    assert!(objs.get("ns/b").is_some());
}

#[test]
fn cluster_scoped_ingest_keys_by_bare_name() {
    use kubert::index::IndexClusterResource;

    let (nodes, objs) = watch::<Node>("nodes");
    IndexClusterResource::apply(&mut *nodes.write(), mk_node("node-1", "us-east", "us-east-1a"));
    assert!(objs.get("node-1").is_some());

    IndexClusterResource::delete(&mut *nodes.write(), "node-1".to_string());
    assert!(objs.get("node-1").is_none());

    IndexClusterResource::reset(
        &mut *nodes.write(),
        vec![mk_node("node-2", "us-west", "us-west-1b")],
        Default::default(),
    );
    assert!(objs.has_synced());
    assert!(objs.get("node-2").is_some());
}

fn mk_policy_index(policies: Collection<Obj<TrafficPolicy>>) -> PolicyIndex {
    PolicyIndex::new(vec![PolicyPlugin {
        group_kind: GroupKind::new("policy.gatewright.dev", "TrafficPolicy"),
        policies: Some(traffic_policies(&policies)),
        global: None,
    }])
}

#[test]
fn policies_apply_oldest_first() {
    init_tracing();
    let (ingest, objs) = watch::<TrafficPolicy>("trafficpolicies");
    ingest.write().reset(vec![
        mk_policy("ns", "newer", 2_000, "web", None),
        mk_policy("ns", "older", 1_000, "web", None),
    ]);
    let index = mk_policy_index(objs);

    let target = ObjectSource::service("ns", "web");
    let atts = index.targeting_policies(
        &mut HandlerContext::new(),
        AttachmentPoint::Upstream,
        &target,
        None,
    );
    let names: Vec<_> = atts
        .iter()
        .map(|a| a.source.as_ref().expect("targeted policy").name.clone())
        .collect();
    assert_eq!(names, vec!["older".to_string(), "newer".to_string()]);
}

#[test]
fn section_policies_follow_object_policies() {
    init_tracing();
    let (ingest, objs) = watch::<TrafficPolicy>("trafficpolicies");
    ingest.write().reset(vec![
        mk_policy("ns", "section-a", 1_000, "web", Some("a")),
        mk_policy("ns", "object-level", 2_000, "web", None),
        mk_policy("ns", "section-b", 500, "web", Some("b")),
    ]);
    let index = mk_policy_index(objs);

    let target = ObjectSource::service("ns", "web");
    let atts = index.targeting_policies(
        &mut HandlerContext::new(),
        AttachmentPoint::Upstream,
        &target,
        Some("a"),
    );
    let names: Vec<_> = atts
        .iter()
        .map(|a| a.source.as_ref().expect("targeted policy").name.clone())
        .collect();
    // Object-level first even though the section policy is older; policies
    // for section "b" never appear.
    assert_eq!(
        names,
        vec!["object-level".to_string(), "section-a".to_string()]
    );
}

#[test]
fn policies_do_not_cross_namespaces() {
    init_tracing();
    let (ingest, objs) = watch::<TrafficPolicy>("trafficpolicies");
    ingest
        .write()
        .reset(vec![mk_policy("other-ns", "p", 1_000, "web", None)]);
    let index = mk_policy_index(objs);

    let atts = index.targeting_policies(
        &mut HandlerContext::new(),
        AttachmentPoint::Upstream,
        &ObjectSource::service("ns", "web"),
        None,
    );
    assert!(atts.is_empty());
}

#[test]
fn invalid_policies_carry_their_errors() {
    init_tracing();
    let (ingest, objs) = watch::<TrafficPolicy>("trafficpolicies");
    let mut policy = mk_policy("ns", "bad", 1_000, "web", None);
    policy.spec.timeout_seconds = Some(0);
    ingest.write().reset(vec![policy]);
    let index = mk_policy_index(objs);

    let atts = index.targeting_policies(
        &mut HandlerContext::new(),
        AttachmentPoint::Upstream,
        &ObjectSource::service("ns", "web"),
        None,
    );
    assert_eq!(atts.len(), 1);
    assert_eq!(atts[0].errors, vec!["timeoutSeconds must be positive".to_string()]);
}

#[test]
fn attachments_expose_the_policy_payload() {
    init_tracing();
    let (ingest, objs) = watch::<TrafficPolicy>("trafficpolicies");
    ingest.write().reset(vec![mk_policy("ns", "p", 1_000, "web", None)]);
    let index = mk_policy_index(objs);

    let atts = index.targeting_policies(
        &mut HandlerContext::new(),
        AttachmentPoint::Upstream,
        &ObjectSource::service("ns", "web"),
        None,
    );
    assert_eq!(atts.len(), 1);
    let ir = atts[0]
        .ir
        .as_any()
        .downcast_ref::<TrafficPolicyIr>()
        .expect("traffic policy payload");
    assert_eq!(ir.timeout_seconds, Some(5));
    assert_eq!(ir.retries, None);
}

#[test]
fn same_namespace_references_need_no_grant() {
    init_tracing();
    let (_ingest, objs) = watch::<ReferenceGrant>("referencegrants");
    let grants = RefGrantIndex::new(&objs);

    assert!(grants.reference_allowed(
        &mut HandlerContext::new(),
        &route_gk(),
        "ns",
        &ObjectSource::service("ns", "web"),
    ));
}

#[test]
fn cross_namespace_references_require_a_grant() {
    init_tracing();
    let (ingest, objs) = watch::<ReferenceGrant>("referencegrants");
    ingest.write().reset(vec![]);
    let grants = RefGrantIndex::new(&objs);
    let target = ObjectSource::service("backend-ns", "web");

    let mut ctx = HandlerContext::new();
    assert!(!grants.reference_allowed(&mut ctx, &route_gk(), "route-ns", &target));

    // A broad grant (no target name) in the target namespace allows it.
    ingest
        .write()
        .apply(mk_ref_grant("backend-ns", "allow-routes", "route-ns", None));
    assert!(grants.reference_allowed(&mut ctx, &route_gk(), "route-ns", &target));

    ingest.write().delete("backend-ns/allow-routes");
    assert!(!grants.reference_allowed(&mut ctx, &route_gk(), "route-ns", &target));
}

#[test]
fn named_grants_only_cover_the_named_object() {
    init_tracing();
    let (ingest, objs) = watch::<ReferenceGrant>("referencegrants");
    ingest.write().reset(vec![mk_ref_grant(
        "backend-ns",
        "allow-web",
        "route-ns",
        Some("web"),
    )]);
    let grants = RefGrantIndex::new(&objs);

    let mut ctx = HandlerContext::new();
    assert!(grants.reference_allowed(
        &mut ctx,
        &route_gk(),
        "route-ns",
        &ObjectSource::service("backend-ns", "web"),
    ));
    assert!(!grants.reference_allowed(
        &mut ctx,
        &route_gk(),
        "route-ns",
        &ObjectSource::service("backend-ns", "other"),
    ));
}

#[test]
fn core_group_spelling_matches_grants() {
    init_tracing();
    let (ingest, objs) = watch::<ReferenceGrant>("referencegrants");
    let mut grant = ReferenceGrant::new(
        "allow-services",
        ReferenceGrantSpec {
            from: vec![ReferenceGrantFrom {
                group: "core".to_string(),
                kind: "Service".to_string(),
                namespace: "route-ns".to_string(),
            }],
            to: vec![ReferenceGrantTo {
                group: "core".to_string(),
                kind: "Service".to_string(),
                name: None,
            }],
        },
    );
    grant.metadata.namespace = Some("backend-ns".to_string());
    ingest.write().reset(vec![grant]);
    let grants = RefGrantIndex::new(&objs);

    // Both the caller and the target spell the core group "core"; the grant
    // still applies.
    let from_gk = GroupKind {
        group: "core".to_string(),
        kind: "Service".to_string(),
    };
    let target = ObjectSource {
        group: "core".to_string(),
        kind: "Service".to_string(),
        namespace: "backend-ns".to_string(),
        name: "web".to_string(),
    };
    assert!(grants.reference_allowed(&mut HandlerContext::new(), &from_gk, "route-ns", &target));
}

fn mk_upstream_index(world: &World) -> (UpstreamIndex, RefGrantIndex) {
    let (policy_ingest, policy_objs) = watch::<TrafficPolicy>("trafficpolicies");
    policy_ingest.write().reset(vec![]);
    let mut index = UpstreamIndex::new(Arc::new(mk_policy_index(policy_objs)));
    index.add_upstreams(GroupKind::service(), world.upstreams.clone());

    let (grant_ingest, grant_objs) = watch::<ReferenceGrant>("referencegrants");
    grant_ingest.write().reset(vec![]);
    (index, RefGrantIndex::new(&grant_objs))
}

#[test]
fn resolve_returns_live_upstreams() {
    let world = mk_world();
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    let (index, grants) = mk_upstream_index(&world);

    let backend = index.resolve(
        &mut HandlerContext::new(),
        &route_gk(),
        "ns",
        &grants,
        &BackendRef {
            kind: "Service".to_string(),
            name: "web".to_string(),
            port: Some(8080),
            ..Default::default()
        },
    );
    assert_eq!(backend.error, None);
    assert_eq!(backend.cluster_name, "service_ns_web_8080");
    assert_eq!(backend.weight, 1);
}

#[test]
fn resolution_failures_become_blackhole_backends() {
    let world = mk_world();
    world
        .services
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    let (index, grants) = mk_upstream_index(&world);
    let mut ctx = HandlerContext::new();

    // Unknown kind.
    let backend = index.resolve(
        &mut ctx,
        &route_gk(),
        "ns",
        &grants,
        &BackendRef {
            group: "example.dev".to_string(),
            kind: "Custom".to_string(),
            name: "x".to_string(),
            ..Default::default()
        },
    );
    assert_eq!(backend.cluster_name, BLACKHOLE_CLUSTER);
    assert_eq!(
        backend.error,
        Some(ResolveError::UnknownBackendKind(GroupKind::new(
            "example.dev",
            "Custom"
        )))
    );

    // Known kind, no such object.
    let backend = index.resolve(
        &mut ctx,
        &route_gk(),
        "ns",
        &grants,
        &BackendRef {
            kind: "Service".to_string(),
            name: "missing".to_string(),
            port: Some(80),
            weight: Some(7),
            ..Default::default()
        },
    );
    assert_eq!(backend.cluster_name, BLACKHOLE_CLUSTER);
    assert_eq!(backend.weight, 7);
    assert!(matches!(backend.error, Some(ResolveError::NotFound(_))));

    // Cross-namespace without a grant; checked before existence.
    let backend = index.resolve(
        &mut ctx,
        &route_gk(),
        "route-ns",
        &grants,
        &BackendRef {
            kind: "Service".to_string(),
            name: "web".to_string(),
            namespace: Some("ns".to_string()),
            port: Some(8080),
            ..Default::default()
        },
    );
    assert_eq!(backend.cluster_name, BLACKHOLE_CLUSTER);
    assert!(matches!(
        backend.error,
        Some(ResolveError::MissingReferenceGrant(_))
    ));
}

#[test]
fn upstreams_carry_attached_policies() {
    init_tracing();
    let (svc_ingest, service_objs) = watch::<Service>("services");
    svc_ingest
        .write()
        .reset(vec![mk_service("ns", "web", &[(None, 8080)])]);
    let upstreams = service_upstreams(&ClusterInfo::default(), &service_objs);

    let (policy_ingest, policy_objs) = watch::<TrafficPolicy>("trafficpolicies");
    policy_ingest
        .write()
        .reset(vec![mk_policy("ns", "p", 1_000, "web", None)]);
    let mut index = UpstreamIndex::new(Arc::new(mk_policy_index(policy_objs)));
    index.add_upstreams(GroupKind::service(), upstreams);

    let (grant_ingest, grant_objs) = watch::<ReferenceGrant>("referencegrants");
    grant_ingest.write().reset(vec![]);
    let grants = RefGrantIndex::new(&grant_objs);

    assert!(index.has_synced());
    let backend = index.resolve(
        &mut HandlerContext::new(),
        &route_gk(),
        "ns",
        &grants,
        &BackendRef {
            kind: "Service".to_string(),
            name: "web".to_string(),
            port: Some(8080),
            ..Default::default()
        },
    );
    let upstream = backend.upstream.expect("resolved upstream");
    let gk = GroupKind::new("policy.gatewright.dev", "TrafficPolicy");
    assert_eq!(upstream.attached_policies.get(&gk).len(), 1);
}
