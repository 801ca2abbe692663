use crate::{
    allowed_list::{AllowList, CatalogEntry, ClassList},
    cidr::{CidrList, CidrParseError},
    owner::{self, InvalidServiceAccount},
    registry::Reference,
    Violation,
};
use std::collections::BTreeSet;
use tenancy_controller_k8s_api::tenant::{
    AdditionalMetadata, HostnameCollisionScope, ImagePullPolicy, OwnerKind, OwnerSpec, TenantSpec,
};

/// A tenant's specification, compiled for admission.
#[derive(Clone, Debug)]
pub struct TenantPolicy {
    pub name: String,
    pub cordoned: bool,
    pub owners: Vec<OwnerSpec>,
    pub collision_scope: HostnameCollisionScope,
    pub namespace_quota: Option<u32>,
    pub namespace_metadata: Option<AdditionalMetadata>,
    pub service_metadata: Option<AdditionalMetadata>,
    registries: AllowList,
    pull_policies: Option<BTreeSet<ImagePullPolicy>>,
    priority_classes: Option<ClassList>,
    ingress_classes: Option<ClassList>,
    storage_classes: Option<ClassList>,
    runtime_classes: Option<ClassList>,
    hostnames: AllowList,
    services: ServiceKinds,
    external_ips: Option<CidrList>,
}

/// A malformed tenant specification.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: invalid regular expression: {source}")]
    Regex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("serviceOptions.externalIPs: {0}")]
    Cidr(#[from] CidrParseError),

    #[error("owners: {0}")]
    Owner(#[from] InvalidServiceAccount),
}

/// Which service types a tenant may create.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct ServiceKinds {
    node_port: bool,
    external_name: bool,
    load_balancer: bool,
}

// === impl TenantPolicy ===

impl TenantPolicy {
    pub fn compile(name: &str, spec: &TenantSpec) -> Result<Self, ConfigError> {
        for o in spec
            .owners
            .iter()
            .filter(|o| o.kind == OwnerKind::ServiceAccount)
        {
            owner::validate_service_account(&o.name)?;
        }

        let regex = |field| move |source| ConfigError::Regex { field, source };

        let registries = spec
            .container_registries
            .as_ref()
            .map(AllowList::compile)
            .transpose()
            .map_err(regex("containerRegistries"))?
            .unwrap_or_default();

        let ingress = spec.ingress_options.as_ref();
        let ingress_classes = ingress
            .and_then(|i| i.allowed_classes.as_ref())
            .map(ClassList::compile)
            .transpose()
            .map_err(regex("ingressOptions.allowedClasses"))?;
        let hostnames = ingress
            .and_then(|i| i.allowed_hostnames.as_ref())
            .map(AllowList::compile)
            .transpose()
            .map_err(regex("ingressOptions.allowedHostnames"))?
            .unwrap_or_default();

        let priority_classes = spec
            .priority_classes
            .as_ref()
            .map(ClassList::compile)
            .transpose()
            .map_err(regex("priorityClasses"))?;
        let storage_classes = spec
            .storage_classes
            .as_ref()
            .map(ClassList::compile)
            .transpose()
            .map_err(regex("storageClasses"))?;
        let runtime_classes = spec
            .runtime_classes
            .as_ref()
            .map(ClassList::compile)
            .transpose()
            .map_err(regex("runtimeClasses"))?;

        let service = spec.service_options.as_ref();
        let allowed = service.and_then(|s| s.allowed_services.as_ref());
        let services = ServiceKinds {
            node_port: allowed.and_then(|a| a.node_port).unwrap_or(true),
            external_name: allowed.and_then(|a| a.external_name).unwrap_or(true),
            load_balancer: allowed.and_then(|a| a.load_balancer).unwrap_or(true),
        };
        let external_ips = service
            .and_then(|s| s.external_ips.as_ref())
            .map(|ips| CidrList::parse(&ips.allowed))
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            cordoned: spec.cordoned,
            owners: spec.owners.clone(),
            collision_scope: ingress
                .map(|i| i.hostname_collision_scope)
                .unwrap_or_default(),
            namespace_quota: spec.namespace_options.as_ref().and_then(|n| n.quota),
            namespace_metadata: spec
                .namespace_options
                .as_ref()
                .and_then(|n| n.additional_metadata.clone()),
            service_metadata: service.and_then(|s| s.additional_metadata.clone()),
            registries,
            pull_policies: spec
                .image_pull_policies
                .as_ref()
                .map(|p| p.iter().copied().collect()),
            priority_classes,
            ingress_classes,
            storage_classes,
            runtime_classes,
            hostnames,
            services,
            external_ips,
        })
    }

    /// Checks the registry an image is pulled from.
    pub fn check_image(&self, image: &str) -> Result<(), Violation> {
        let reference = Reference::parse(image);
        if self.registries.allows(&reference.registry) {
            return Ok(());
        }
        Err(Violation::ContainerRegistryForbidden {
            image: image.to_string(),
            registry: reference.registry,
            allowed: self.registries.to_string(),
        })
    }

    /// Checks a container's pull policy. An unset policy is resolved the way
    /// the API server defaults it.
    pub fn check_pull_policy(
        &self,
        container: &str,
        image: &str,
        policy: Option<&str>,
    ) -> Result<(), Violation> {
        let Some(allowed) = self.pull_policies.as_ref() else {
            return Ok(());
        };

        let policy = match policy.filter(|p| !p.is_empty()) {
            Some(p) => p.to_string(),
            None if Reference::parse(image).tag == "latest" => ImagePullPolicy::Always.to_string(),
            None => ImagePullPolicy::IfNotPresent.to_string(),
        };
        if policy
            .parse::<ImagePullPolicy>()
            .is_ok_and(|p| allowed.contains(&p))
        {
            return Ok(());
        }

        Err(Violation::ImagePullPolicyForbidden {
            policy,
            container: container.to_string(),
            allowed: allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Resolves and checks a Pod's priority class. Returns the class the Pod
    /// must be mutated to, if any. Pods are not required to name a class.
    pub fn check_priority_class(
        &self,
        requested: Option<&str>,
        lookup: impl Fn(&str) -> Option<CatalogEntry>,
    ) -> Result<Option<String>, Violation> {
        let Some(classes) = self.priority_classes.as_ref() else {
            return Ok(None);
        };
        resolve_class(classes, requested, lookup).map_err(|class| {
            Violation::PriorityClassForbidden {
                class,
                allowed: classes.to_string(),
            }
        })
    }

    /// Resolves and checks a Pod's runtime class, like its priority class.
    pub fn check_runtime_class(
        &self,
        requested: Option<&str>,
        lookup: impl Fn(&str) -> Option<CatalogEntry>,
    ) -> Result<Option<String>, Violation> {
        let Some(classes) = self.runtime_classes.as_ref() else {
            return Ok(None);
        };
        resolve_class(classes, requested, lookup).map_err(|class| {
            Violation::RuntimeClassForbidden {
                class,
                allowed: classes.to_string(),
            }
        })
    }

    /// Resolves and checks an Ingress class. Returns the class the Ingress
    /// must be mutated to, if any. A constrained tenant requires a class.
    pub fn check_ingress_class(
        &self,
        requested: Option<&str>,
        lookup: impl Fn(&str) -> Option<CatalogEntry>,
    ) -> Result<Option<String>, Violation> {
        let Some(classes) = self.ingress_classes.as_ref() else {
            return Ok(None);
        };
        if is_missing(classes, requested) {
            return Err(Violation::IngressClassMissing {
                allowed: classes.to_string(),
            });
        }
        resolve_class(classes, requested, lookup).map_err(|class| {
            Violation::IngressClassForbidden {
                class,
                allowed: classes.to_string(),
            }
        })
    }

    /// Resolves and checks a PersistentVolumeClaim's storage class, like an
    /// Ingress class.
    pub fn check_storage_class(
        &self,
        requested: Option<&str>,
        lookup: impl Fn(&str) -> Option<CatalogEntry>,
    ) -> Result<Option<String>, Violation> {
        let Some(classes) = self.storage_classes.as_ref() else {
            return Ok(None);
        };
        if is_missing(classes, requested) {
            return Err(Violation::StorageClassMissing {
                allowed: classes.to_string(),
            });
        }
        resolve_class(classes, requested, lookup).map_err(|class| {
            Violation::StorageClassForbidden {
                class,
                allowed: classes.to_string(),
            }
        })
    }

    pub fn check_hostnames<'h>(
        &self,
        hostnames: impl IntoIterator<Item = &'h str>,
    ) -> Result<(), Violation> {
        for hostname in hostnames {
            if !self.hostnames.allows(hostname) {
                return Err(Violation::IngressHostnameForbidden {
                    hostname: hostname.to_string(),
                    allowed: self.hostnames.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks a Service type; an unset type is `ClusterIP`.
    pub fn check_service_type(&self, kind: Option<&str>) -> Result<(), Violation> {
        let allowed = match kind.unwrap_or("ClusterIP") {
            "NodePort" => self.services.node_port,
            "ExternalName" => self.services.external_name,
            "LoadBalancer" => self.services.load_balancer,
            _ => true,
        };
        if allowed {
            return Ok(());
        }
        Err(Violation::ServiceTypeForbidden {
            kind: kind.unwrap_or_default().to_string(),
        })
    }

    /// Checks external addresses and ranges against the allowed CIDRs. A
    /// tenant without an external IP policy allows any address.
    pub fn check_external_ips<S: AsRef<str>>(&self, ips: &[S]) -> Result<(), Violation> {
        let Some(allowed) = self.external_ips.as_ref() else {
            return Ok(());
        };
        match allowed.first_outside(ips) {
            None => Ok(()),
            Some(ip) => Err(Violation::ExternalIpForbidden {
                ip: ip.to_string(),
                allowed: allowed.to_string(),
            }),
        }
    }

    pub fn ingress_default_class(&self) -> Option<&str> {
        self.ingress_classes.as_ref().and_then(|c| c.default_class())
    }
}

/// Returns the class an object must be mutated to, if any, or the name of
/// the forbidden class it uses.
fn resolve_class(
    classes: &ClassList,
    requested: Option<&str>,
    lookup: impl Fn(&str) -> Option<CatalogEntry>,
) -> Result<Option<String>, String> {
    let mutated = classes.resolve_default(requested, &lookup);
    match mutated.as_deref().or(requested) {
        None => Ok(None),
        Some(name) if classes.allows(name, lookup(name).as_ref()) => Ok(mutated),
        Some(name) => Err(name.to_string()),
    }
}

/// True when an object must name a class and names none that a default
/// would fill in.
fn is_missing(classes: &ClassList, requested: Option<&str>) -> bool {
    requested.is_none() && classes.default_class().is_none() && !classes.is_unconstrained()
}

#[cfg(test)]
mod tests;
