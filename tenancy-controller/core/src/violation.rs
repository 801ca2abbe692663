/// Why an admission request was denied.
///
/// Each variant names the policy dimension and the offending value.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Violation {
    #[error("tenant {tenant} is freezed: please, reach out to the system administrator")]
    Cordoned { tenant: String },

    #[error("container image {image} registry {registry} is forbidden for the current Tenant: {allowed}")]
    ContainerRegistryForbidden {
        image: String,
        registry: String,
        allowed: String,
    },

    #[error("image pull policy {policy} for container {container} is forbidden for the current Tenant, use one of the following ({allowed})")]
    ImagePullPolicyForbidden {
        policy: String,
        container: String,
        allowed: String,
    },

    #[error("priority class {class} is forbidden for the current Tenant: {allowed}")]
    PriorityClassForbidden { class: String, allowed: String },

    #[error("storage class {class} is forbidden for the current Tenant: {allowed}")]
    StorageClassForbidden { class: String, allowed: String },

    #[error("a valid Storage Class must be used: {allowed}")]
    StorageClassMissing { allowed: String },

    #[error("pod runtime class {class} is forbidden for the current Tenant: {allowed}")]
    RuntimeClassForbidden { class: String, allowed: String },

    #[error("ingress class {class} is forbidden for the current Tenant: {allowed}")]
    IngressClassForbidden { class: String, allowed: String },

    #[error("a valid Ingress Class must be used: {allowed}")]
    IngressClassMissing { allowed: String },

    #[error("hostname {hostname} is forbidden for the current Tenant: {allowed}")]
    IngressHostnameForbidden { hostname: String, allowed: String },

    #[error("hostname {hostname} with path {path} is already used by {existing} ({scope} collision scope)")]
    IngressHostnameCollision {
        hostname: String,
        path: String,
        scope: String,
        existing: String,
    },

    #[error("{kind} service type is forbidden for the current Tenant")]
    ServiceTypeForbidden { kind: String },

    #[error("external IP {ip} is forbidden for the current Tenant, allowed ranges: ({allowed})")]
    ExternalIpForbidden { ip: String, allowed: String },

    #[error("updating resource exceeds limit for ClusterCustomQuota {quota}: used {used}, limit {limit}")]
    CustomQuotaExceeded {
        quota: String,
        used: String,
        limit: String,
    },

    #[error("cannot compute usage for ClusterCustomQuota {quota}: {reason}")]
    CustomQuotaUnavailable { quota: String, reason: String },

    #[error("{kind} {name} is managed by tenant {tenant} and cannot be changed by its owners")]
    ReconcilerOwned {
        kind: String,
        name: String,
        tenant: String,
    },

    #[error("namespace {namespace} is owned by tenant {tenant}: only its owners may change it")]
    NotTenantOwner { namespace: String, tenant: String },

    #[error("tenant {tenant} does not exist")]
    TenantNotFound { tenant: String },

    #[error("the requester does not own tenant {tenant}")]
    TenantNotOwned { tenant: String },

    #[error("the requester owns several tenants ({tenants}): please, provide the tenant label")]
    TenantLabelRequired { tenants: String },

    #[error("cannot exceed Namespace quota of tenant {tenant}: please, reach out to the system administrators")]
    NamespaceQuotaExceeded { tenant: String },

    #[error("tenant {tenant} has an invalid specification: {reason}")]
    InvalidTenant { tenant: String, reason: String },

    #[error("node {kind} {key} cannot be changed")]
    ForbiddenNodeMetadata { kind: String, key: String },
}

impl Violation {
    /// A short machine-readable name of the violated dimension.
    pub fn dimension(&self) -> &'static str {
        match self {
            Self::Cordoned { .. } => "cordon",
            Self::ContainerRegistryForbidden { .. } => "container_registry",
            Self::ImagePullPolicyForbidden { .. } => "image_pull_policy",
            Self::PriorityClassForbidden { .. } => "priority_class",
            Self::StorageClassForbidden { .. } | Self::StorageClassMissing { .. } => {
                "storage_class"
            }
            Self::RuntimeClassForbidden { .. } => "runtime_class",
            Self::IngressClassForbidden { .. } | Self::IngressClassMissing { .. } => {
                "ingress_class"
            }
            Self::IngressHostnameForbidden { .. } => "ingress_hostname",
            Self::IngressHostnameCollision { .. } => "ingress_collision",
            Self::ServiceTypeForbidden { .. } => "service_type",
            Self::ExternalIpForbidden { .. } => "external_ip",
            Self::CustomQuotaExceeded { .. } | Self::CustomQuotaUnavailable { .. } => {
                "custom_quota"
            }
            Self::ReconcilerOwned { .. } => "managed_object",
            Self::NotTenantOwner { .. }
            | Self::TenantNotFound { .. }
            | Self::TenantNotOwned { .. }
            | Self::TenantLabelRequired { .. } => "tenant_resolution",
            Self::NamespaceQuotaExceeded { .. } => "namespace_quota",
            Self::InvalidTenant { .. } => "configuration",
            Self::ForbiddenNodeMetadata { .. } => "node_metadata",
        }
    }
}
