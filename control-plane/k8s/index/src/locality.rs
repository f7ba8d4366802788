//! Pods augmented with their node's topology position.

use crate::Obj;
use gatewright_collections::{derive, Collection};
use gatewright_core::{LocalityPod, PodLocality};
use gatewright_k8s_api::{Node, Pod, ResourceExt};
use std::collections::BTreeMap;

pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const SUBZONE_LABEL: &str = "topology.gatewright.dev/subzone";

/// Derives a [`LocalityPod`] per pod, merging the scheduled node's topology
/// labels into the pod's own. An unscheduled pod (or a node not yet watched)
/// yields an empty locality rather than an error.
pub fn locality_pods(
    pods: &Collection<Obj<Pod>>,
    nodes: &Collection<Obj<Node>>,
) -> Collection<LocalityPod> {
    let nodes = nodes.clone();
    derive("locality-pods", pods, move |ctx, pod: &Obj<Pod>| {
        let mut labels: BTreeMap<String, String> =
            pod.metadata.labels.clone().unwrap_or_default();
        let mut locality = PodLocality::default();

        let node = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.as_deref())
            .and_then(|node_name| ctx.fetch(&nodes, node_name));
        if let Some(node) = node {
            if let Some(node_labels) = &node.metadata.labels {
                for (key, slot) in [
                    (REGION_LABEL, &mut locality.region),
                    (ZONE_LABEL, &mut locality.zone),
                    (SUBZONE_LABEL, &mut locality.subzone),
                ] {
                    if let Some(value) = node_labels.get(key) {
                        *slot = value.clone();
                        labels.insert(key.to_string(), value.clone());
                    }
                }
            }
        }

        Some(LocalityPod {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_unchecked(),
            labels,
            locality,
            ip: pod
                .status
                .as_ref()
                .and_then(|status| status.pod_ip.clone()),
        })
    })
}
