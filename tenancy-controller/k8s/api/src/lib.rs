#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod custom_quota;
pub mod ingress;
pub mod labels;
pub mod tenant;

pub use self::{
    custom_quota::{ClusterCustomQuota, ClusterCustomQuotaSpec, CustomQuotaStatus},
    labels::Labels,
    tenant::{Tenant, TenantSpec, TenantStatus},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            ConfigMap, Endpoints, LimitRange, Namespace, Node, PersistentVolumeClaim, Pod,
            PodSpec, ResourceQuota, Service,
        },
        discovery::v1::EndpointSlice,
        networking::v1::{Ingress, IngressClass, NetworkPolicy},
        node::v1::RuntimeClass,
        rbac::v1::RoleBinding,
        scheduling::v1::PriorityClass,
        storage::v1::StorageClass,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::OwnerReference},
};
pub use kube::{
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams,
    },
    core::GroupVersionKind,
    runtime::watcher,
    Client, Error, Resource, ResourceExt,
};

/// The API group of the tenancy resources.
pub const API_GROUP: &str = "capsule.clastix.io";

/// Identifies the tenant that owns a namespace or derived object.
pub const TENANT_LABEL: &str = "capsule.clastix.io/tenant";

/// Set on namespaces of a cordoned tenant.
pub const CORDONED_LABEL: &str = "projectcapsule.dev/cordoned";

/// Index labels of reconciler-owned derived objects.
pub const NETWORK_POLICY_LABEL: &str = "capsule.clastix.io/network-policy";
pub const LIMIT_RANGE_LABEL: &str = "capsule.clastix.io/limit-range";
pub const RESOURCE_QUOTA_LABEL: &str = "capsule.clastix.io/resource-quota";
pub const ROLE_BINDING_LABEL: &str = "capsule.clastix.io/role-binding";

/// Marks the cluster-wide default IngressClass.
pub const DEFAULT_INGRESS_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";

/// Marks the cluster-wide default StorageClass.
pub const DEFAULT_STORAGE_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

pub const NODE_SELECTOR_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/node-selector";
