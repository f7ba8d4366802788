//! The registry of uniquely connected discovery clients: stream lifecycle
//! callbacks on one side, a collection of deduplicated client identities on
//! the other.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod clients;

pub use clients::{ConnectedClients, UniqlyConnectedClient};

use std::collections::BTreeMap;

/// The node-metadata key carrying the proxy's role.
pub const ROLE_KEY: &str = "role";

/// Separates the segments of a derived client resource name.
pub const KEY_DELIMITER: &str = "~";

/// Roles without this prefix belong to other consumers of the server and
/// are ignored by the registry.
pub const GATEWAY_ROLE_PREFIX: &str = "gatewright-gateway";

/// The subset of a discovery request the registry inspects and rewrites.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiscoveryRequest {
    pub node: NodeInfo,
}

/// The node identity a proxy presents: an id of the form
/// `"{pod}.{namespace}"` plus free-form metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInfo {
    pub id: String,
    pub metadata: BTreeMap<String, String>,
}

// === impl DiscoveryRequest ===

impl DiscoveryRequest {
    pub fn role(&self) -> Option<&str> {
        self.node.metadata.get(ROLE_KEY).map(String::as_str)
    }

    pub fn set_role(&mut self, role: impl Into<String>) {
        self.node.metadata.insert(ROLE_KEY.to_string(), role.into());
    }

    /// Splits the node id into `(pod, namespace)`.
    pub fn pod_ref(&self) -> Option<(&str, &str)> {
        self.node.id.split_once('.')
    }
}

/// Stream lifecycle notifications from the discovery server.
pub trait Callbacks: Send + Sync {
    fn on_stream_open(&self, stream_id: i64);

    /// Inspects (and possibly rewrites) a request. An error fails the single
    /// request, not the registry.
    fn on_stream_request(
        &self,
        stream_id: i64,
        request: &mut DiscoveryRequest,
    ) -> Result<(), IdentityError>;

    fn on_stream_closed(&self, stream_id: i64);
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("node id {0:?} is not of the form {{pod}}.{{namespace}}")]
    InvalidNodeId(String),

    #[error("pod {namespace}/{name} not found")]
    PodNotFound { namespace: String, name: String },
}
