use crate::{GroupKind, ObjectSource};
use chrono::{DateTime, Utc};
use gatewright_collections::Resource;
use std::{collections::BTreeMap, sync::Arc};

/// The translated, plugin-owned form of a policy.
pub trait PolicyIr: std::fmt::Debug + Send + Sync {
    /// The policy object's creation timestamp, used to order attachments.
    fn creation_time(&self) -> DateTime<Utc>;

    /// Downcast support, so consumers of an attachment can recover the
    /// plugin's concrete payload.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Where a policy may attach.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachmentPoint {
    Gateway,
    Route,
    Upstream,
}

impl AttachmentPoint {
    fn bit(self) -> u8 {
        match self {
            Self::Gateway => 1 << 0,
            Self::Route => 1 << 1,
            Self::Upstream => 1 << 2,
        }
    }
}

/// The set of attachment points a policy kind supports.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentPoints(u8);

// === impl AttachmentPoints ===

impl AttachmentPoints {
    pub fn of(points: &[AttachmentPoint]) -> Self {
        Self(points.iter().fold(0, |acc, p| acc | p.bit()))
    }

    pub fn contains(&self, point: AttachmentPoint) -> bool {
        self.0 & point.bit() != 0
    }
}

/// A policy's declared target, local to the policy's own namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PolicyTargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    pub section_name: Option<String>,
}

/// A policy object lifted into the index: identity, version, declared
/// targets, and the plugin-translated IR.
///
/// Equality is identity and version only. Two wrappers are equal when they
/// name the same uid at the same generation (or, when either generation is
/// unknown, the same resourceVersion). The IR is never compared.
#[derive(Clone, Debug)]
pub struct PolicyWrapper {
    pub source: ObjectSource,
    pub uid: String,
    pub generation: Option<i64>,
    pub resource_version: String,
    pub target_refs: Vec<PolicyTargetRef>,
    pub points: AttachmentPoints,
    pub ir: Arc<dyn PolicyIr>,
    /// Validation problems found while translating; the policy is still
    /// indexed so the failure can be reported on whatever it targets.
    pub errors: Vec<String>,
}

// === impl PolicyWrapper ===

impl PartialEq for PolicyWrapper {
    fn eq(&self, other: &Self) -> bool {
        if self.source != other.source || self.uid != other.uid {
            return false;
        }
        match (self.generation, other.generation) {
            (Some(a), Some(b)) if a != 0 && b != 0 => a == b,
            _ => self.resource_version == other.resource_version,
        }
    }
}

impl Resource for PolicyWrapper {
    fn resource_name(&self) -> String {
        self.source.resource_name()
    }
}

/// One policy attached to one object.
#[derive(Clone, Debug)]
pub struct PolicyAtt {
    pub group_kind: GroupKind,
    pub source: Option<ObjectSource>,
    pub ir: Arc<dyn PolicyIr>,
    pub errors: Vec<String>,
}

// === impl PolicyAtt ===

impl PartialEq for PolicyAtt {
    fn eq(&self, other: &Self) -> bool {
        self.group_kind == other.group_kind
            && self.source == other.source
            && Arc::ptr_eq(&self.ir, &other.ir)
            && self.errors == other.errors
    }
}

/// All policies attached to an object, grouped by policy kind in attachment
/// order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttachedPolicies(pub BTreeMap<GroupKind, Vec<PolicyAtt>>);

// === impl AttachedPolicies ===

impl AttachedPolicies {
    pub fn append(&mut self, att: PolicyAtt) {
        self.0.entry(att.group_kind.clone()).or_default().push(att);
    }

    pub fn get(&self, gk: &GroupKind) -> &[PolicyAtt] {
        self.0.get(gk).map(Vec::as_slice).unwrap_or(&[])
    }
}
