//! The policy-attachment index and the reference-grant authorization index.

use crate::Obj;
use chrono::{DateTime, Utc};
use gatewright_collections::{derive, join, Collection, HandlerContext, Index};
use gatewright_core::{
    AttachedPolicies, AttachmentPoint, AttachmentPoints, GroupKind, ObjectSource, PolicyAtt,
    PolicyIr, PolicyTargetRef, PolicyWrapper,
};
use gatewright_k8s_api::{ReferenceGrant, ResourceExt, TrafficPolicy};
use std::sync::Arc;

/// Produces a policy with no declared target, attached to everything at the
/// given point.
pub type GlobalPolicyFn =
    Arc<dyn Fn(&mut HandlerContext, AttachmentPoint) -> Option<Arc<dyn PolicyIr>> + Send + Sync>;

/// One policy kind's contribution to the index. The wrappers themselves
/// carry the attachment points their kind supports.
pub struct PolicyPlugin {
    pub group_kind: GroupKind,
    pub policies: Option<Collection<PolicyWrapper>>,
    pub global: Option<GlobalPolicyFn>,
}

/// Where a policy's declared target points, qualified by the policy's own
/// namespace. Cross-namespace targeting is unrepresentable: the namespace in
/// the key is always the policy's.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetRefKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Empty for object-level attachment.
    pub section_name: String,
}

impl std::fmt::Display for TargetRefKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.group, self.kind, self.namespace, self.name, self.section_name
        )
    }
}

/// All registered policies, queryable by what they target.
pub struct PolicyIndex {
    by_target_ref: Index<TargetRefKey, PolicyWrapper>,
    global: Vec<(GroupKind, GlobalPolicyFn)>,
    policies: Collection<PolicyWrapper>,
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub fn new(plugins: Vec<PolicyPlugin>) -> Self {
        let mut members = Vec::new();
        let mut global = Vec::new();
        for plugin in plugins {
            if let Some(policies) = plugin.policies {
                members.push(policies);
            }
            if let Some(f) = plugin.global {
                global.push((plugin.group_kind, f));
            }
        }
        let policies = join("policies", members);
        let by_target_ref = Index::new("policies-by-target", &policies, |wrapper: &PolicyWrapper| {
            wrapper
                .target_refs
                .iter()
                .map(|target| TargetRefKey {
                    group: target.group.clone(),
                    kind: target.kind.clone(),
                    namespace: wrapper.source.namespace.clone(),
                    name: target.name.clone(),
                    section_name: target.section_name.clone().unwrap_or_default(),
                })
                .collect()
        });
        Self {
            by_target_ref,
            global,
            policies,
        }
    }

    /// Returns every policy attached to `target`, in application order:
    /// globals first (registration order), then object-level matches, then
    /// matches scoped to `section_name`. The object- and section-level sets
    /// are each ordered oldest-first by creation time.
    pub fn targeting_policies(
        &self,
        ctx: &mut HandlerContext,
        point: AttachmentPoint,
        target: &ObjectSource,
        section_name: Option<&str>,
    ) -> Vec<PolicyAtt> {
        let mut out = Vec::new();
        for (gk, f) in &self.global {
            if let Some(ir) = f(ctx, point) {
                out.push(PolicyAtt {
                    group_kind: gk.clone(),
                    source: None,
                    ir,
                    errors: Vec::new(),
                });
            }
        }
        out.extend(self.fetch_level(ctx, point, target, ""));
        if let Some(section) = section_name {
            out.extend(self.fetch_level(ctx, point, target, section));
        }
        out
    }

    /// Convenience form grouping the attachments by policy kind.
    pub fn attached(
        &self,
        ctx: &mut HandlerContext,
        point: AttachmentPoint,
        target: &ObjectSource,
    ) -> AttachedPolicies {
        let mut out = AttachedPolicies::default();
        for att in self.targeting_policies(ctx, point, target, None) {
            out.append(att);
        }
        out
    }

    pub fn has_synced(&self) -> bool {
        self.policies.has_synced()
    }

    fn fetch_level(
        &self,
        ctx: &mut HandlerContext,
        point: AttachmentPoint,
        target: &ObjectSource,
        section_name: &str,
    ) -> Vec<PolicyAtt> {
        let key = TargetRefKey {
            group: target.group.clone(),
            kind: target.kind.clone(),
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            section_name: section_name.to_string(),
        };
        let mut matched = ctx
            .fetch_index(&self.by_target_ref, &key)
            .into_iter()
            .filter(|wrapper| wrapper.points.contains(point))
            .collect::<Vec<_>>();
        matched.sort_by_key(|wrapper| wrapper.ir.creation_time());
        matched
            .into_iter()
            .map(|wrapper| PolicyAtt {
                group_kind: wrapper.source.group_kind(),
                source: Some(wrapper.source),
                ir: wrapper.ir,
                errors: wrapper.errors,
            })
            .collect()
    }
}

/// The indexed payload of a `TrafficPolicy`, recoverable from an attachment
/// via [`PolicyIr::as_any`].
#[derive(Debug)]
pub struct TrafficPolicyIr {
    created_at: DateTime<Utc>,
    pub timeout_seconds: Option<u32>,
    pub retries: Option<u32>,
}

impl PolicyIr for TrafficPolicyIr {
    fn creation_time(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Lifts watched `TrafficPolicy` objects into indexable wrappers. Invalid
/// policies are kept, carrying their errors, so the failure surfaces on
/// whatever they target.
pub fn traffic_policies(
    policies: &Collection<Obj<TrafficPolicy>>,
) -> Collection<PolicyWrapper> {
    derive("traffic-policies", policies, |_ctx, pol: &Obj<TrafficPolicy>| {
        let mut errors = Vec::new();
        if pol.spec.target_refs.is_empty() {
            errors.push("policy targets nothing".to_string());
        }
        if pol.spec.timeout_seconds == Some(0) {
            errors.push("timeoutSeconds must be positive".to_string());
        }

        let target_refs = pol
            .spec
            .target_refs
            .iter()
            .map(|t| PolicyTargetRef {
                group: t.group.clone().unwrap_or_default(),
                kind: t.kind.clone(),
                name: t.name.clone(),
                section_name: t.section_name.clone(),
            })
            .collect();

        let created_at = pol
            .creation_timestamp()
            .map(|t| t.0)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Some(PolicyWrapper {
            source: ObjectSource {
                group: "policy.gatewright.dev".to_string(),
                kind: "TrafficPolicy".to_string(),
                namespace: pol.namespace().unwrap_or_default(),
                name: pol.name_unchecked(),
            },
            uid: pol.uid().unwrap_or_default(),
            generation: pol.metadata.generation,
            resource_version: pol.resource_version().unwrap_or_default(),
            target_refs,
            points: AttachmentPoints::of(&[
                AttachmentPoint::Gateway,
                AttachmentPoint::Route,
                AttachmentPoint::Upstream,
            ]),
            ir: Arc::new(TrafficPolicyIr {
                created_at,
                timeout_seconds: pol.spec.timeout_seconds,
                retries: pol.spec.retries,
            }),
            errors,
        })
    })
}

/// One `(from, to)` pair of a reference grant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefGrantKey {
    pub grant_namespace: String,
    pub to_gk: GroupKind,
    /// Empty when the grant covers every object of the kind.
    pub to_name: String,
    pub from_gk: GroupKind,
    pub from_namespace: String,
}

impl std::fmt::Display for RefGrantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.grant_namespace, self.to_gk, self.to_name, self.from_gk, self.from_namespace
        )
    }
}

/// Answers whether a cross-namespace reference is permitted.
pub struct RefGrantIndex {
    index: Index<RefGrantKey, Obj<ReferenceGrant>>,
}

// === impl RefGrantIndex ===

impl RefGrantIndex {
    pub fn new(grants: &Collection<Obj<ReferenceGrant>>) -> Self {
        let index = Index::new("ref-grants", grants, |grant: &Obj<ReferenceGrant>| {
            let grant_namespace = grant.namespace().unwrap_or_default();
            let mut keys = Vec::new();
            for from in &grant.spec.from {
                for to in &grant.spec.to {
                    keys.push(RefGrantKey {
                        grant_namespace: grant_namespace.clone(),
                        to_gk: GroupKind::new(to.group.clone(), to.kind.clone()),
                        to_name: to.name.clone().unwrap_or_default(),
                        from_gk: GroupKind::new(from.group.clone(), from.kind.clone()),
                        from_namespace: from.namespace.clone(),
                    });
                }
            }
            keys
        });
        Self { index }
    }

    /// Same-namespace references need no grant. Cross-namespace references
    /// are probed twice: first for a grant covering the whole kind, then for
    /// one naming the target.
    pub fn reference_allowed(
        &self,
        ctx: &mut HandlerContext,
        from_gk: &GroupKind,
        from_namespace: &str,
        to: &ObjectSource,
    ) -> bool {
        if to.namespace == from_namespace {
            return true;
        }
        // Probe keys use the same normalized group form the grant keys do,
        // so a "core" group on either side still matches.
        let broad = RefGrantKey {
            grant_namespace: to.namespace.clone(),
            to_gk: GroupKind::new(to.group.clone(), to.kind.clone()),
            to_name: String::new(),
            from_gk: GroupKind::new(from_gk.group.clone(), from_gk.kind.clone()),
            from_namespace: from_namespace.to_string(),
        };
        if !ctx.fetch_index(&self.index, &broad).is_empty() {
            return true;
        }
        let named = RefGrantKey {
            to_name: to.name.clone(),
            ..broad
        };
        !ctx.fetch_index(&self.index, &named).is_empty()
    }

    pub fn has_synced(&self) -> bool {
        self.index.has_synced()
    }
}
