//! The ownership index: which tenant owns each namespace, and each tenant's
//! compiled policy.
//!
//! Membership is bound the first time it is learned and never rebound while
//! the namespace exists. A tenant's `status.namespaces` is the durable record
//! of those bindings, so it takes precedence over namespace labels, which
//! owners may rewrite. Label rewrites never move a namespace between tenants;
//! the reconciler reverts them.

use ahash::AHashMap as HashMap;
use kubert::index::{ClusterRemoved, IndexClusterResource};
use parking_lot::RwLock;
use std::sync::Arc;
use tenancy_controller_core::{Requester, TenantPolicy};
use tenancy_controller_k8s_api::{self as k8s, Labels, ResourceExt, TENANT_LABEL};

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Debug, Default)]
pub struct Index {
    tenants: HashMap<String, TenantEntry>,
    namespaces: HashMap<String, NamespaceEntry>,

    /// Namespace name to owning tenant.
    bindings: HashMap<String, Binding>,

    tenants_synced: bool,
    namespaces_synced: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Binding {
    tenant: String,

    /// Set once the binding appears in the tenant's status.
    recorded: bool,
}

#[derive(Clone, Debug)]
pub struct TenantEntry {
    pub tenant: Arc<k8s::Tenant>,

    /// The compiled policy, or the reason the spec could not be compiled.
    pub policy: Result<Arc<TenantPolicy>, String>,
}

#[derive(Clone, Debug)]
pub struct NamespaceEntry {
    pub namespace: Arc<k8s::Namespace>,
    pub labels: Labels,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn tenant(&self, name: &str) -> Option<&TenantEntry> {
        self.tenants.get(name)
    }

    pub fn tenants(&self) -> impl Iterator<Item = (&str, &TenantEntry)> + '_ {
        self.tenants.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceEntry> {
        self.namespaces.get(name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &NamespaceEntry)> + '_ {
        self.namespaces.iter().map(|(name, ns)| (name.as_str(), ns))
    }

    /// The tenant that owns a namespace.
    pub fn tenant_of(&self, namespace: &str) -> Option<&str> {
        self.bindings.get(namespace).map(|b| b.tenant.as_str())
    }

    /// Live namespaces bound to a tenant, sorted.
    pub fn namespaces_of(&self, tenant: &str) -> Vec<String> {
        let mut namespaces = self
            .bindings
            .iter()
            .filter(|(ns, b)| b.tenant == tenant && self.namespaces.contains_key(*ns))
            .map(|(ns, _)| ns.clone())
            .collect::<Vec<_>>();
        namespaces.sort();
        namespaces
    }

    /// Tenants listing the requester as an owner, sorted.
    pub fn owned_by(&self, requester: &Requester) -> Vec<String> {
        let mut tenants = self
            .tenants
            .iter()
            .filter(|(_, t)| requester.owns(&t.tenant.spec.owners))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        tenants.sort();
        tenants
    }

    /// True once both the Tenant and Namespace watches have listed.
    pub fn is_synced(&self) -> bool {
        self.tenants_synced && self.namespaces_synced
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Binds a namespace learned from its label. Existing bindings win.
    fn bind_labeled(&mut self, namespace: &str, tenant: &str) {
        if let Some(existing) = self.bindings.get(namespace) {
            if existing.tenant != tenant {
                tracing::debug!(namespace, tenant, existing = %existing.tenant, "Ignoring relabeled namespace");
            }
            return;
        }
        tracing::debug!(namespace, tenant, "Bound namespace");
        self.bindings.insert(
            namespace.to_string(),
            Binding {
                tenant: tenant.to_string(),
                recorded: false,
            },
        );
    }

    /// Binds a namespace recorded in a tenant's status. Overrides a binding
    /// learned from a label, never one recorded by another tenant.
    fn bind_recorded(&mut self, namespace: &str, tenant: &str) {
        match self.bindings.get_mut(namespace) {
            Some(existing) if existing.recorded => {
                if existing.tenant != tenant {
                    tracing::warn!(namespace, tenant, existing = %existing.tenant, "Namespace recorded by several tenants");
                }
            }
            Some(existing) => {
                existing.tenant = tenant.to_string();
                existing.recorded = true;
            }
            None => {
                self.bindings.insert(
                    namespace.to_string(),
                    Binding {
                        tenant: tenant.to_string(),
                        recorded: true,
                    },
                );
            }
        }
    }
}

impl IndexClusterResource<k8s::Tenant> for Index {
    fn apply(&mut self, tenant: k8s::Tenant) {
        let name = tenant.name_unchecked();

        let policy = TenantPolicy::compile(&name, &tenant.spec)
            .map(Arc::new)
            .map_err(|error| {
                tracing::warn!(tenant = %name, %error, "Invalid tenant specification");
                error.to_string()
            });

        if let Some(status) = tenant.status.as_ref() {
            for ns in &status.namespaces {
                self.bind_recorded(ns, &name);
            }
        }

        self.tenants.insert(
            name,
            TenantEntry {
                tenant: Arc::new(tenant),
                policy,
            },
        );
    }

    fn delete(&mut self, name: String) {
        // Bindings outlive the tenant so that its namespaces, which are
        // garbage collected, cannot be claimed by another tenant meanwhile.
        self.tenants.remove(&name);
    }

    fn reset(&mut self, tenants: Vec<k8s::Tenant>, removed: ClusterRemoved) {
        for name in removed {
            self.tenants.remove(&name);
        }
        for tenant in tenants {
            IndexClusterResource::apply(self, tenant);
        }
        self.tenants_synced = true;
    }
}

impl IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        let labels = Labels::from(ns.metadata.labels.clone());
        if let Some(tenant) = labels.get(TENANT_LABEL).filter(|t| !t.is_empty()) {
            let tenant = tenant.to_string();
            self.bind_labeled(&name, &tenant);
        }
        self.namespaces.insert(
            name,
            NamespaceEntry {
                namespace: Arc::new(ns),
                labels,
            },
        );
    }

    fn delete(&mut self, name: String) {
        self.namespaces.remove(&name);
        if let Some(binding) = self.bindings.remove(&name) {
            tracing::debug!(namespace = %name, tenant = %binding.tenant, "Unbound namespace");
        }
    }

    fn reset(&mut self, namespaces: Vec<k8s::Namespace>, removed: ClusterRemoved) {
        for name in removed {
            IndexClusterResource::<k8s::Namespace>::delete(self, name);
        }
        for ns in namespaces {
            IndexClusterResource::apply(self, ns);
        }
        self.namespaces_synced = true;
    }
}
