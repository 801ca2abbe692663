mod custom_quota;
mod tenants;

use crate::{custom_quota::QuotaStore, QuotaError};
use kubert::index::IndexClusterResource;
use maplit::btreemap;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tenancy_controller_k8s_api::{
    self as k8s,
    custom_quota::CustomQuotaSource,
    tenant::{OwnerKind, OwnerSpec},
    CustomQuotaStatus, ObjectMeta, TENANT_LABEL,
};

fn mk_tenant(name: &str, owner: &str, recorded: &[&str]) -> k8s::Tenant {
    let mut tenant = k8s::Tenant::new(
        name,
        k8s::TenantSpec {
            owners: vec![OwnerSpec {
                kind: OwnerKind::User,
                name: owner.to_string(),
                cluster_roles: vec![],
            }],
            ..Default::default()
        },
    );
    if !recorded.is_empty() {
        tenant.status = Some(k8s::TenantStatus {
            namespaces: recorded.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
    }
    tenant
}

fn mk_namespace(name: &str, labels: BTreeMap<String, String>) -> k8s::Namespace {
    k8s::Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn mk_tenant_namespace(name: &str, tenant: &str) -> k8s::Namespace {
    mk_namespace(name, btreemap! { TENANT_LABEL.to_string() => tenant.to_string() })
}

fn index_with(
    tenants: Vec<k8s::Tenant>,
    namespaces: Vec<k8s::Namespace>,
) -> crate::tenants::SharedIndex {
    let index = crate::tenants::Index::shared();
    {
        let mut idx = index.write();
        for ns in namespaces {
            IndexClusterResource::<k8s::Namespace>::apply(&mut *idx, ns);
        }
        for tenant in tenants {
            IndexClusterResource::<k8s::Tenant>::apply(&mut *idx, tenant);
        }
    }
    index
}

/// An in-memory object store.
#[derive(Default)]
struct FakeStore {
    objects: Mutex<Vec<serde_json::Value>>,
    statuses: Mutex<BTreeMap<String, CustomQuotaStatus>>,

    /// Fails every list while set.
    unavailable: AtomicBool,
}

impl FakeStore {
    fn put(&self, obj: serde_json::Value) {
        let mut objects = self.objects.lock();
        let id = |o: &serde_json::Value| (o["metadata"]["namespace"].clone(), o["metadata"]["name"].clone());
        objects.retain(|o| id(o) != id(&obj));
        objects.push(obj);
    }

    fn status(&self, name: &str) -> Option<CustomQuotaStatus> {
        self.statuses.lock().get(name).cloned()
    }
}

#[async_trait::async_trait]
impl QuotaStore for FakeStore {
    async fn list(&self, source: &CustomQuotaSource) -> Result<Vec<serde_json::Value>, QuotaError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QuotaError::Timeout(tokio::time::Duration::from_secs(5)));
        }
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|o| o["kind"].as_str() == Some(source.kind.as_str()))
            .cloned()
            .collect())
    }

    async fn patch_status(&self, name: &str, status: CustomQuotaStatus) -> Result<(), QuotaError> {
        self.statuses.lock().insert(name.to_string(), status);
        Ok(())
    }
}
