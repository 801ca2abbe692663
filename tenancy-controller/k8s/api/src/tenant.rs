use crate::labels::{self, Map};
use k8s_openapi::api::{
    core::v1::{LimitRangeSpec, ResourceQuotaSpec},
    networking::v1::NetworkPolicySpec,
    rbac::v1::Subject,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A policy document that owns a set of namespaces.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "capsule.clastix.io",
    version = "v1beta2",
    kind = "Tenant",
    shortname = "tnt",
    status = "TenantStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Namespace count","type":"integer","jsonPath":".status.size"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[serde(default)]
    pub owners: Vec<OwnerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_options: Option<NamespaceOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_options: Option<ServiceOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_options: Option<IngressOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_registries: Option<AllowedListSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<Map>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policies: Option<NetworkPoliciesSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_ranges: Option<LimitRangesSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_quotas: Option<ResourceQuotasSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_role_bindings: Vec<AdditionalRoleBindingsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policies: Option<Vec<ImagePullPolicy>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_classes: Option<DefaultAllowedListSpec>,

    /// StorageClasses PersistentVolumeClaims may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_classes: Option<DefaultAllowedListSpec>,

    /// RuntimeClasses Pods may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_classes: Option<DefaultAllowedListSpec>,

    /// Freezes every write in the tenant's namespaces.
    #[serde(default)]
    pub cordoned: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSpec {
    pub kind: OwnerKind,
    pub name: String,

    /// Cluster roles bound to the owner in every tenant namespace.
    #[serde(default = "default_owner_cluster_roles")]
    pub cluster_roles: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum OwnerKind {
    User,
    Group,
    ServiceAccount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOptions {
    /// The maximum number of namespaces the tenant may own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<AdditionalMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalMetadata {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub labels: Map,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<AdditionalMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_services: Option<AllowedServices>,

    #[serde(
        default,
        rename = "externalIPs",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_ips: Option<ExternalIpsSpec>,
}

/// Service type toggles. Unset toggles allow the type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedServices {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ExternalIpsSpec {
    #[serde(default)]
    pub allowed: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_classes: Option<DefaultAllowedListSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hostnames: Option<AllowedListSpec>,

    #[serde(default)]
    pub hostname_collision_scope: HostnameCollisionScope,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum HostnameCollisionScope {
    Cluster,
    Tenant,
    Namespace,
    #[default]
    Disabled,
}

/// Exact names plus a single regular expression.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowedListSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_regex: Option<String>,
}

/// An allow-list over a cluster-scoped catalog, with a label selector and an
/// optional tenant default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultAllowedListSpec {
    #[serde(flatten)]
    pub list: AllowedListSpec,
    #[serde(flatten)]
    pub selector: labels::Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct NetworkPoliciesSpec {
    #[serde(default)]
    pub items: Vec<NetworkPolicySpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LimitRangesSpec {
    #[serde(default)]
    pub items: Vec<LimitRangeSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ResourceQuotasSpec {
    #[serde(default)]
    pub scope: ResourceQuotaScope,
    #[serde(default)]
    pub items: Vec<ResourceQuotaSpec>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ResourceQuotaScope {
    #[default]
    Tenant,
    Namespace,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalRoleBindingsSpec {
    pub cluster_role_name: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// The number of namespaces owned by the tenant.
    #[serde(default)]
    pub size: u32,

    /// Owned namespace names, sorted.
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub state: TenantState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-namespace reconciliation state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spaces: Vec<NamespaceStatus>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum TenantState {
    #[default]
    Active,
    Cordoned,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStatus {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

fn default_owner_cluster_roles() -> Vec<String> {
    vec!["admin".to_string(), "capsule-namespace-deleter".to_string()]
}

// === impl Tenant ===

impl Tenant {
    pub fn is_cordoned(&self) -> bool {
        self.spec.cordoned
    }

    pub fn ingress_collision_scope(&self) -> HostnameCollisionScope {
        self.spec
            .ingress_options
            .as_ref()
            .map(|o| o.hostname_collision_scope)
            .unwrap_or_default()
    }
}

// === impl OwnerKind ===

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => "User".fmt(f),
            Self::Group => "Group".fmt(f),
            Self::ServiceAccount => "ServiceAccount".fmt(f),
        }
    }
}

// === impl ImagePullPolicy ===

impl fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => "Always".fmt(f),
            Self::IfNotPresent => "IfNotPresent".fmt(f),
            Self::Never => "Never".fmt(f),
        }
    }
}

impl std::str::FromStr for ImagePullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(Self::Always),
            "IfNotPresent" => Ok(Self::IfNotPresent),
            "Never" => Ok(Self::Never),
            s => Err(format!("unknown image pull policy: {s}")),
        }
    }
}

// === impl HostnameCollisionScope ===

impl fmt::Display for HostnameCollisionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => "Cluster".fmt(f),
            Self::Tenant => "Tenant".fmt(f),
            Self::Namespace => "Namespace".fmt(f),
            Self::Disabled => "Disabled".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_tenant_spec() {
        let spec: TenantSpec = serde_json::from_value(serde_json::json!({
            "owners": [{"kind": "User", "name": "alice"}],
            "ingressOptions": {
                "allowedClasses": {
                    "allowed": ["nginx"],
                    "allowedRegex": "^internal-.*$",
                    "matchLabels": {"env": "customers"},
                    "default": "tenant-default"
                },
                "hostnameCollisionScope": "Tenant"
            },
            "serviceOptions": {
                "allowedServices": {"loadBalancer": false},
                "externalIPs": {"allowed": ["10.20.0.0/16"]}
            },
            "imagePullPolicies": ["Always"],
            "storageClasses": {"allowed": ["ceph-rbd"], "default": "ceph-rbd"},
            "runtimeClasses": {"matchLabels": {"sandbox": "gvisor"}},
            "cordoned": true
        }))
        .expect("tenant spec must parse");

        assert_eq!(
            spec.owners,
            vec![OwnerSpec {
                kind: OwnerKind::User,
                name: "alice".to_string(),
                cluster_roles: default_owner_cluster_roles(),
            }]
        );
        let classes = spec
            .ingress_options
            .as_ref()
            .and_then(|o| o.allowed_classes.as_ref())
            .expect("allowed classes must be set");
        assert_eq!(classes.list.allowed, vec!["nginx".to_string()]);
        assert_eq!(classes.default.as_deref(), Some("tenant-default"));
        assert!(!classes.selector.is_empty());
        assert_eq!(
            spec.service_options
                .as_ref()
                .and_then(|o| o.allowed_services.as_ref())
                .and_then(|s| s.load_balancer),
            Some(false)
        );
        assert_eq!(spec.image_pull_policies, Some(vec![ImagePullPolicy::Always]));
        let storage = spec.storage_classes.as_ref().expect("storage classes must be set");
        assert_eq!(storage.default.as_deref(), Some("ceph-rbd"));
        let runtime = spec.runtime_classes.as_ref().expect("runtime classes must be set");
        assert!(runtime.list.allowed.is_empty());
        assert!(!runtime.selector.is_empty());
        assert!(spec.cordoned);
    }

    #[test]
    fn collision_scope_defaults_to_disabled() {
        let tenant = Tenant::new("solar", TenantSpec::default());
        assert_eq!(tenant.ingress_collision_scope(), HostnameCollisionScope::Disabled);
    }
}
