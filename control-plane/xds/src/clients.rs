use crate::{Callbacks, DiscoveryRequest, IdentityError, GATEWAY_ROLE_PREFIX, KEY_DELIMITER};
use ahash::AHashMap;
use gatewright_collections::{derive_from_nothing, Collection, RecomputeTrigger, Resource};
use gatewright_core::{hash_labels, LocalityPod, PodLocality};
use std::{collections::BTreeMap, sync::Arc};

/// One deduplicated client identity. Streams from interchangeable proxies
/// (same role, labels, and locality) collapse into a single record, whose
/// `resource_name` is the config snapshot cache key.
#[derive(Clone, Debug, PartialEq)]
pub struct UniqlyConnectedClient {
    pub role: String,
    pub labels: BTreeMap<String, String>,
    pub locality: PodLocality,
    pub namespace: String,
    pub resource_name: String,
}

// === impl UniqlyConnectedClient ===

impl UniqlyConnectedClient {
    fn new(
        role: &str,
        labels: BTreeMap<String, String>,
        locality: PodLocality,
        namespace: String,
    ) -> Self {
        let resource_name = format!(
            "{role}{KEY_DELIMITER}{}{KEY_DELIMITER}{namespace}",
            hash_labels(&labels)
        );
        Self {
            role: role.to_string(),
            labels,
            locality,
            namespace,
            resource_name,
        }
    }

    /// The identity used when no pod collection is available: the bare role,
    /// with no labels or locality.
    fn bare(role: &str) -> Self {
        Self {
            role: role.to_string(),
            labels: BTreeMap::new(),
            locality: PodLocality::default(),
            namespace: String::new(),
            resource_name: role.to_string(),
        }
    }
}

impl Resource for UniqlyConnectedClient {
    fn resource_name(&self) -> String {
        self.resource_name.clone()
    }
}

struct State {
    /// Identified streams, by stream id.
    clients: AHashMap<i64, String>,
    /// Live streams per identity.
    counts: AHashMap<String, usize>,
    uniq: AHashMap<String, UniqlyConnectedClient>,
}

/// The callback side of the registry. Pair it with the collection returned
/// by [`ConnectedClients::new`].
pub struct ConnectedClients {
    pods: Option<Collection<LocalityPod>>,
    state: parking_lot::Mutex<State>,
    trigger: RecomputeTrigger,
}

// === impl ConnectedClients ===

impl ConnectedClients {
    /// When `pods` is supplied, every identifying request must resolve to a
    /// watched pod; without it, identities fall back to the bare role.
    pub fn new(
        pods: Option<Collection<LocalityPod>>,
    ) -> (Arc<Self>, Collection<UniqlyConnectedClient>) {
        let trigger = RecomputeTrigger::new("connected-clients");
        let registry = Arc::new(Self {
            pods,
            state: parking_lot::Mutex::new(State {
                clients: AHashMap::new(),
                counts: AHashMap::new(),
                uniq: AHashMap::new(),
            }),
            trigger: trigger.clone(),
        });
        let snapshot = registry.clone();
        let collection = derive_from_nothing("unique-clients", move |ctx| {
            trigger.mark_dependent(ctx);
            snapshot.state.lock().uniq.values().cloned().collect()
        });
        (registry, collection)
    }

    fn identify(&self, request: &DiscoveryRequest, role: &str) -> Result<UniqlyConnectedClient, IdentityError> {
        let Some(pods) = &self.pods else {
            return Ok(UniqlyConnectedClient::bare(role));
        };
        let (name, namespace) = request
            .pod_ref()
            .ok_or_else(|| IdentityError::InvalidNodeId(request.node.id.clone()))?;
        let pod = pods
            .get(&format!("{namespace}/{name}"))
            .ok_or_else(|| IdentityError::PodNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        Ok(UniqlyConnectedClient::new(
            role,
            pod.labels,
            pod.locality,
            namespace.to_string(),
        ))
    }
}

impl Callbacks for ConnectedClients {
    fn on_stream_open(&self, stream_id: i64) {
        tracing::debug!(%stream_id, "Stream opened");
    }

    fn on_stream_request(
        &self,
        stream_id: i64,
        request: &mut DiscoveryRequest,
    ) -> Result<(), IdentityError> {
        let Some(role) = request.role().map(str::to_string) else {
            return Ok(());
        };
        if !role.starts_with(GATEWAY_ROLE_PREFIX) {
            return Ok(());
        }

        // Later requests on an identified stream only need the role rewrite.
        if let Some(resource_name) = self.state.lock().clients.get(&stream_id).cloned() {
            request.set_role(resource_name);
            return Ok(());
        }

        let client = self.identify(request, &role)?;
        let resource_name = client.resource_name.clone();

        let is_new = {
            let mut state = self.state.lock();
            state.clients.insert(stream_id, resource_name.clone());
            *state.counts.entry(resource_name.clone()).or_insert(0) += 1;
            state
                .uniq
                .insert(resource_name.clone(), client)
                .is_none()
        };
        request.set_role(resource_name.clone());

        if is_new {
            tracing::debug!(%stream_id, %resource_name, "New unique client");
            self.trigger.trigger();
        }
        Ok(())
    }

    fn on_stream_closed(&self, stream_id: i64) {
        let removed = {
            let mut state = self.state.lock();
            let Some(resource_name) = state.clients.remove(&stream_id) else {
                return;
            };
            let remaining = match state.counts.get_mut(&resource_name) {
                Some(count) => {
                    *count -= 1;
                    *count
                }
                None => {
                    debug_assert!(false, "refcount missing for {resource_name}");
                    tracing::warn!(%resource_name, "Refcount missing for identified stream");
                    0
                }
            };
            if remaining == 0 {
                state.counts.remove(&resource_name);
                state.uniq.remove(&resource_name);
                Some(resource_name)
            } else {
                None
            }
        };
        if let Some(resource_name) = removed {
            tracing::debug!(%stream_id, %resource_name, "Last stream of client closed");
            self.trigger.trigger();
        }
    }
}
