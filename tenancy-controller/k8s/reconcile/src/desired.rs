//! The state the reconciler maintains in each tenant namespace.
//!
//! Derived objects are named `capsule-<tenant>-<index>` after the position of
//! their template in the tenant spec, and labeled with the tenant and that
//! index. Objects carrying the tenant label and a kind's index label that are
//! not desired are pruned.

use crate::Error;
use ahash::AHashMap as HashMap;
use k8s_openapi::{
    api::rbac::v1::{RoleRef, Subject},
    NamespaceResourceScope,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::BTreeMap, fmt};
use tenancy_controller_core::{quantity::tenant_scoped_hard, Quantity};
use tenancy_controller_k8s_api::{
    self as k8s,
    tenant::{OwnerKind, OwnerSpec, ResourceQuotaScope},
    ObjectMeta, OwnerReference, Resource, ResourceExt, CORDONED_LABEL, LIMIT_RANGE_LABEL,
    NETWORK_POLICY_LABEL, NODE_SELECTOR_ANNOTATION, RESOURCE_QUOTA_LABEL, ROLE_BINDING_LABEL,
    TENANT_LABEL,
};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// A kind of object derived from tenant templates.
pub trait Derived:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// The label holding the template index.
    const INDEX_LABEL: &'static str;
}

impl Derived for k8s::NetworkPolicy {
    const INDEX_LABEL: &'static str = NETWORK_POLICY_LABEL;
}

impl Derived for k8s::LimitRange {
    const INDEX_LABEL: &'static str = LIMIT_RANGE_LABEL;
}

impl Derived for k8s::ResourceQuota {
    const INDEX_LABEL: &'static str = RESOURCE_QUOTA_LABEL;
}

impl Derived for k8s::RoleBinding {
    const INDEX_LABEL: &'static str = ROLE_BINDING_LABEL;
}

/// The derived objects of one tenant namespace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Objects {
    pub network_policies: Vec<k8s::NetworkPolicy>,
    pub limit_ranges: Vec<k8s::LimitRange>,
    pub resource_quotas: Vec<k8s::ResourceQuota>,
    pub role_bindings: Vec<k8s::RoleBinding>,
}

/// Usage of a tenant's quota templates: per template index, per namespace,
/// per resource.
#[derive(Clone, Debug, Default)]
pub struct QuotaUsage {
    items: HashMap<usize, BTreeMap<String, BTreeMap<String, Quantity>>>,
}

// === impl QuotaUsage ===

impl QuotaUsage {
    /// Collects usage from the tenant's live ResourceQuotas in the given
    /// namespaces.
    pub fn collect(tenant: &str, namespaces: &[String], quotas: &[k8s::ResourceQuota]) -> Self {
        let mut items = HashMap::<usize, BTreeMap<_, BTreeMap<_, _>>>::default();
        for quota in quotas {
            let labels = quota.labels();
            if labels.get(TENANT_LABEL).map(String::as_str) != Some(tenant) {
                continue;
            }
            let Some(index) = labels
                .get(RESOURCE_QUOTA_LABEL)
                .and_then(|i| i.parse::<usize>().ok())
            else {
                continue;
            };
            let Some(namespace) = quota.namespace().filter(|ns| namespaces.contains(ns)) else {
                continue;
            };

            let used = quota
                .status
                .as_ref()
                .and_then(|s| s.used.as_ref())
                .into_iter()
                .flatten()
                .filter_map(|(resource, q)| match q.0.parse::<Quantity>() {
                    Ok(q) => Some((resource.clone(), q)),
                    Err(error) => {
                        tracing::warn!(%namespace, %resource, %error, "Ignoring unparseable quota usage");
                        None
                    }
                })
                .collect::<BTreeMap<_, _>>();
            items.entry(index).or_default().insert(namespace, used);
        }
        Self { items }
    }

    fn tenant_used(&self, index: usize, resource: &str) -> Quantity {
        self.items
            .get(&index)
            .into_iter()
            .flat_map(|namespaces| namespaces.values())
            .filter_map(|used| used.get(resource).copied())
            .sum()
    }

    fn namespace_used(&self, index: usize, namespace: &str, resource: &str) -> Quantity {
        self.items
            .get(&index)
            .and_then(|namespaces| namespaces.get(namespace))
            .and_then(|used| used.get(resource).copied())
            .unwrap_or(Quantity::ZERO)
    }
}

/// Computes the derived objects of a tenant namespace.
pub fn objects(tenant: &k8s::Tenant, namespace: &str, usage: &QuotaUsage) -> Result<Objects, Error> {
    let name = tenant.name_unchecked();
    let owner = tenant
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid(name.clone()))?;
    let meta = |index: usize, suffix: Option<&str>, label: &str| {
        let object = match suffix {
            Some(suffix) => format!("capsule-{name}-{index}-{suffix}"),
            None => format!("capsule-{name}-{index}"),
        };
        ObjectMeta {
            name: Some(object),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [
                    (TENANT_LABEL.to_string(), name.clone()),
                    (label.to_string(), index.to_string()),
                ]
                .into_iter()
                .collect(),
            ),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        }
    };

    let spec = &tenant.spec;
    let network_policies = spec
        .network_policies
        .iter()
        .flat_map(|np| np.items.iter())
        .enumerate()
        .map(|(i, item)| k8s::NetworkPolicy {
            metadata: meta(i, None, NETWORK_POLICY_LABEL),
            spec: Some(item.clone()),
            ..Default::default()
        })
        .collect();

    let limit_ranges = spec
        .limit_ranges
        .iter()
        .flat_map(|lr| lr.items.iter())
        .enumerate()
        .map(|(i, item)| k8s::LimitRange {
            metadata: meta(i, None, LIMIT_RANGE_LABEL),
            spec: Some(item.clone()),
        })
        .collect();

    let tenant_scoped = spec
        .resource_quotas
        .as_ref()
        .is_some_and(|rq| rq.scope == ResourceQuotaScope::Tenant);
    let resource_quotas = spec
        .resource_quotas
        .iter()
        .flat_map(|rq| rq.items.iter())
        .enumerate()
        .map(|(i, item)| {
            let mut item = item.clone();
            if tenant_scoped {
                for (resource, hard) in item.hard.iter_mut().flatten() {
                    match hard.0.parse::<Quantity>() {
                        Ok(limit) => {
                            let scoped = tenant_scoped_hard(
                                limit,
                                usage.tenant_used(i, resource),
                                usage.namespace_used(i, namespace, resource),
                            );
                            *hard = k8s::Quantity(scoped.to_string());
                        }
                        Err(error) => {
                            tracing::warn!(tenant = %name, %resource, %error, "Keeping unparseable hard limit");
                        }
                    }
                }
            }
            k8s::ResourceQuota {
                metadata: meta(i, None, RESOURCE_QUOTA_LABEL),
                spec: Some(item),
                ..Default::default()
            }
        })
        .collect();

    let role_bindings = spec
        .owners
        .iter()
        .flat_map(|owner| {
            owner
                .cluster_roles
                .iter()
                .map(move |role| (role.clone(), vec![owner_subject(owner)]))
        })
        .chain(
            spec.additional_role_bindings
                .iter()
                .map(|b| (b.cluster_role_name.clone(), b.subjects.clone())),
        )
        .enumerate()
        .map(|(i, (role, subjects))| k8s::RoleBinding {
            metadata: meta(i, Some(&role), ROLE_BINDING_LABEL),
            role_ref: RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: role,
            },
            subjects: Some(subjects),
        })
        .collect();

    Ok(Objects {
        network_policies,
        limit_ranges,
        resource_quotas,
        role_bindings,
    })
}

fn owner_subject(owner: &OwnerSpec) -> Subject {
    if owner.kind == OwnerKind::ServiceAccount {
        let mut parts = owner.name.rsplit(':');
        let name = parts.next().unwrap_or_default().to_string();
        let namespace = parts.next().map(ToString::to_string);
        return Subject {
            kind: owner.kind.to_string(),
            name,
            namespace,
            api_group: None,
        };
    }
    Subject {
        api_group: Some(RBAC_API_GROUP.to_string()),
        kind: owner.kind.to_string(),
        name: owner.name.clone(),
        namespace: None,
    }
}

/// Builds a merge patch restoring a tenant namespace's metadata, or `None`
/// when it is already in place.
///
/// The patch carries the namespace's resource version so that it fails
/// rather than overwrites a concurrent change.
pub fn namespace_patch(
    tenant: &k8s::Tenant,
    ns: &k8s::Namespace,
) -> Result<Option<serde_json::Value>, Error> {
    let name = tenant.name_unchecked();
    let owner = tenant
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid(name.clone()))?;
    let spec = &tenant.spec;
    let additional = spec
        .namespace_options
        .as_ref()
        .and_then(|o| o.additional_metadata.as_ref());

    let mut labels = BTreeMap::new();
    labels.insert(TENANT_LABEL.to_string(), Some(name.clone()));
    if let Some(additional) = additional {
        for (k, v) in &additional.labels {
            labels.insert(k.clone(), Some(v.clone()));
        }
    }
    if spec.cordoned {
        labels.insert(CORDONED_LABEL.to_string(), Some("true".to_string()));
    } else {
        labels.insert(CORDONED_LABEL.to_string(), None);
    }

    let mut annotations = BTreeMap::new();
    if let Some(additional) = additional {
        for (k, v) in &additional.annotations {
            annotations.insert(k.clone(), Some(v.clone()));
        }
    }
    if let Some(selector) = spec.node_selector.as_ref().filter(|s| !s.is_empty()) {
        let selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        annotations.insert(NODE_SELECTOR_ANNOTATION.to_string(), Some(selector));
    }

    let mut metadata = serde_json::Map::new();
    if let Some(changed) = changed(ns.labels(), labels) {
        metadata.insert("labels".to_string(), changed);
    }
    if let Some(changed) = changed(ns.annotations(), annotations) {
        metadata.insert("annotations".to_string(), changed);
    }
    if let Some(refs) = owner_references(ns.owner_references(), owner) {
        metadata.insert("ownerReferences".to_string(), serde_json::json!(refs));
    }
    if metadata.is_empty() {
        return Ok(None);
    }

    if let Some(version) = ns.resource_version() {
        metadata.insert("resourceVersion".to_string(), version.into());
    }
    Ok(Some(serde_json::json!({ "metadata": metadata })))
}

/// The entries of a merge patch that bring `current` to `desired`. `None`
/// values remove keys.
fn changed(
    current: &BTreeMap<String, String>,
    desired: BTreeMap<String, Option<String>>,
) -> Option<serde_json::Value> {
    let patch = desired
        .into_iter()
        .filter(|(k, v)| current.get(k) != v.as_ref())
        .map(|(k, v)| (k, v.map_or(serde_json::Value::Null, Into::into)))
        .collect::<serde_json::Map<_, _>>();
    if patch.is_empty() {
        return None;
    }
    Some(patch.into())
}

/// The owner references a namespace must carry, or `None` when it already
/// carries the tenant's.
fn owner_references(
    current: &[OwnerReference],
    owner: OwnerReference,
) -> Option<Vec<OwnerReference>> {
    if current.contains(&owner) {
        return None;
    }
    let mut refs = current
        .iter()
        .filter(|r| r.kind != owner.kind || r.api_version != owner.api_version)
        .cloned()
        .collect::<Vec<_>>();
    refs.push(owner);
    Some(refs)
}

/// True when every field set in `desired` has the same value in `current`.
///
/// Fields the API server defaults are ignored so that objects are only
/// applied when they drift.
pub fn is_applied<K: Serialize>(desired: &K, current: &K) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(current)) {
        (Ok(desired), Ok(current)) => is_subset(&desired, &current),
        _ => false,
    }
}

fn is_subset(desired: &serde_json::Value, current: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (desired, current) {
        (Value::Object(d), Value::Object(c)) => d
            .iter()
            .all(|(k, v)| c.get(k).is_some_and(|cv| is_subset(v, cv)) || v.is_null()),
        (Value::Array(d), Value::Array(c)) => {
            d.len() == c.len() && d.iter().zip(c).all(|(dv, cv)| is_subset(dv, cv))
        }
        (d, c) => d == c,
    }
}
