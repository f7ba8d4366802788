//! Kubernetes API types watched by the control plane: re-exports of the
//! upstream resource types plus this project's CRDs.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod policy;
pub mod reference_grant;

pub use k8s_openapi::{
    api::{
        core::v1::{Node, Pod, Service, ServicePort},
        discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice},
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time},
};
pub use kube::{Resource, ResourceExt};
pub use policy::{LocalPolicyTargetRef, TrafficPolicy, TrafficPolicySpec};
pub use reference_grant::{
    ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo,
};
