/// A namespaced policy attaching timeout and retry behavior to gateways,
/// routes, or backends by target reference.
#[derive(
    Clone,
    Debug,
    PartialEq,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "policy.gatewright.dev",
    version = "v1alpha1",
    kind = "TrafficPolicy",
    namespaced
)]
#[kube(derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicySpec {
    /// The objects this policy attaches to, all in the policy's own
    /// namespace.
    pub target_refs: Vec<LocalPolicyTargetRef>,

    /// Per-request timeout, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,

    /// Maximum number of retries per request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalPolicyTargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    pub kind: String,

    pub name: String,

    /// Restricts the attachment to one section (e.g. a listener or a rule)
    /// of the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}
