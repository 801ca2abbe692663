//! Cross-namespace custom quotas.
//!
//! Usage is never tracked incrementally: every participating write rescans
//! the quota's member objects while holding the quota's lock, so concurrent
//! writes against one quota are decided one at a time. Writes admitted but
//! not yet visible to the scan are remembered as claims for a short while.

use crate::{tenants, ResourceId};
use ahash::AHashMap as HashMap;
use kubert::index::IndexClusterResource;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tenancy_controller_core::{custom_quota::CustomQuota, Quantity, Violation};
use tenancy_controller_k8s_api::{
    self as k8s, custom_quota::CustomQuotaSource, CustomQuotaStatus, Labels, ResourceExt,
};
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};

pub type SharedIndex = Arc<RwLock<QuotaIndex>>;

/// Compiled ClusterCustomQuotas, by name.
#[derive(Debug, Default)]
pub struct QuotaIndex {
    quotas: HashMap<String, QuotaEntry>,
}

#[derive(Clone, Debug)]
struct QuotaEntry {
    source: CustomQuotaSource,
    selectors: Vec<k8s::labels::Selector>,
    quota: Result<Arc<CustomQuota>, String>,

    /// Outlives spec changes so that writes stay serialized.
    claims: Arc<Mutex<Claims>>,
}

#[derive(Debug, Default)]
struct Claims(HashMap<String, (Quantity, Instant)>);

/// Reads member objects and writes quota status.
#[async_trait::async_trait]
pub trait QuotaStore: Send + Sync {
    /// Lists every object of the source kind, across all namespaces.
    async fn list(&self, source: &CustomQuotaSource) -> Result<Vec<serde_json::Value>, QuotaError>;

    async fn patch_status(&self, name: &str, status: CustomQuotaStatus) -> Result<(), QuotaError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("failed to discover {kind}: {source}")]
    Discovery {
        kind: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to list {kind}: {source}")]
    List {
        kind: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to update status: {0}")]
    Patch(#[source] kube::Error),

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a write could not be admitted against a quota.
#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error(transparent)]
    Violation(#[from] Violation),

    /// Member objects could not be read, so no decision was reached.
    #[error("cannot read members of ClusterCustomQuota {quota}: {source}")]
    Unavailable {
        quota: String,
        #[source]
        source: QuotaError,
    },
}

/// Decides writes against custom quotas.
#[derive(Clone)]
pub struct Aggregator {
    quotas: SharedIndex,
    tenants: tenants::SharedIndex,
    store: Arc<dyn QuotaStore>,
    claim_ttl: Duration,
}

/// A write to an object that may participate in custom quotas.
#[derive(Clone, Debug)]
pub struct Write<'o> {
    pub group: &'o str,
    pub kind: &'o str,
    pub id: ResourceId,

    /// The object after the write; `None` for deletes.
    pub object: Option<&'o serde_json::Value>,

    /// Dry runs are decided but leave no claims or status behind.
    pub dry_run: bool,
}

// === impl QuotaIndex ===

impl QuotaIndex {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.quotas.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl IndexClusterResource<k8s::ClusterCustomQuota> for QuotaIndex {
    fn apply(&mut self, quota: k8s::ClusterCustomQuota) {
        let name = quota.name_unchecked();
        let compiled = CustomQuota::compile(&name, &quota.spec)
            .map(Arc::new)
            .map_err(|error| {
                tracing::warn!(quota = %name, %error, "Invalid ClusterCustomQuota");
                error.to_string()
            });
        let claims = self
            .quotas
            .get(&name)
            .map(|e| e.claims.clone())
            .unwrap_or_default();
        self.quotas.insert(
            name,
            QuotaEntry {
                source: quota.spec.source,
                selectors: quota.spec.selectors,
                quota: compiled,
                claims,
            },
        );
    }

    fn delete(&mut self, name: String) {
        self.quotas.remove(&name);
    }
}

// === impl Aggregator ===

impl Aggregator {
    pub fn new(
        quotas: SharedIndex,
        tenants: tenants::SharedIndex,
        store: Arc<dyn QuotaStore>,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            quotas,
            tenants,
            store,
            claim_ttl,
        }
    }

    /// Decides a write against every quota it participates in. Quotas are
    /// checked in name order and the first violation wins.
    pub async fn admit(&self, write: &Write<'_>) -> Result<(), AdmitError> {
        for (name, entry) in self.participating(write) {
            let quota = entry
                .quota
                .map_err(|reason| Violation::CustomQuotaUnavailable {
                    quota: name.clone(),
                    reason,
                })?;
            let mut claims = entry.claims.lock().await;
            self.admit_one(&quota, &mut claims, write).await?;
        }
        Ok(())
    }

    /// Recomputes a quota's usage and writes it to its status.
    pub async fn refresh(&self, name: &str) -> Result<(), AdmitError> {
        let Some(entry) = self.quotas.read().quotas.get(name).cloned() else {
            return Ok(());
        };
        let quota = entry
            .quota
            .map_err(|reason| Violation::CustomQuotaUnavailable {
                quota: name.to_string(),
                reason,
            })?;
        let mut claims = entry.claims.lock().await;
        let usage = self.scan(&quota, &mut claims).await?;
        self.write_status(&quota, &usage).await;
        Ok(())
    }

    fn participating(&self, write: &Write<'_>) -> Vec<(String, QuotaEntry)> {
        let labels = self
            .tenants
            .read()
            .namespace(&write.id.namespace)
            .map(|ns| ns.labels.clone())
            .unwrap_or_default();
        let mut entries = self
            .quotas
            .read()
            .quotas
            .iter()
            .filter(|(_, e)| e.source.targets(write.group, write.kind))
            .filter(|(_, e)| e.selectors.iter().any(|s| s.matches(&labels)))
            .map(|(name, e)| (name.clone(), e.clone()))
            .collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }

    async fn admit_one(
        &self,
        quota: &CustomQuota,
        claims: &mut Claims,
        write: &Write<'_>,
    ) -> Result<(), AdmitError> {
        let key = format!("{}.{}", write.id.namespace, write.id.name);
        let contribution = match write.object {
            Some(obj) if quota.selects_object(&object_labels(obj)) => quota.contribution(obj)?,
            _ => Quantity::ZERO,
        };

        let mut usage = self.scan(quota, claims).await?;
        let before = usage.values().copied().sum::<Quantity>();
        let previous = usage.get(&key).copied().unwrap_or_default();
        let after = before.saturating_sub(previous) + contribution;

        quota.decide(before, after).map_err(|violation| {
            tracing::info!(quota = %quota.name, %before, %after, limit = %quota.limit, "Denied by custom quota");
            violation
        })?;

        if write.dry_run {
            return Ok(());
        }

        claims.0.insert(key.clone(), (contribution, Instant::now()));
        if write.object.is_some() && contribution > Quantity::ZERO {
            usage.insert(key, contribution);
        } else {
            usage.remove(&key);
        }
        self.write_status(quota, &usage).await;
        Ok(())
    }

    /// Sums member objects by `<namespace>.<name>`, overlaid with unexpired
    /// claims.
    async fn scan(
        &self,
        quota: &CustomQuota,
        claims: &mut Claims,
    ) -> Result<BTreeMap<String, Quantity>, AdmitError> {
        let objects =
            self.store
                .list(&quota.source)
                .await
                .map_err(|source| AdmitError::Unavailable {
                    quota: quota.name.clone(),
                    source,
                })?;

        let members = {
            let tenants = self.tenants.read();
            tenants
                .namespaces()
                .filter(|(_, ns)| quota.selects_namespace(&ns.labels))
                .map(|(name, _)| name.to_string())
                .collect::<ahash::AHashSet<_>>()
        };

        let mut usage = BTreeMap::new();
        for obj in &objects {
            let Some((namespace, name)) = object_id(obj) else {
                continue;
            };
            if !members.contains(namespace) || !quota.selects_object(&object_labels(obj)) {
                continue;
            }
            usage.insert(format!("{namespace}.{name}"), quota.contribution(obj)?);
        }

        let now = Instant::now();
        claims
            .0
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < self.claim_ttl);
        for (key, (value, _)) in &claims.0 {
            if *value > Quantity::ZERO {
                usage.insert(key.clone(), *value);
            } else {
                usage.remove(key);
            }
        }

        Ok(usage)
    }

    async fn write_status(&self, quota: &CustomQuota, usage: &BTreeMap<String, Quantity>) {
        let used = usage.values().copied().sum::<Quantity>();
        let totals = quota.usage(used);
        let status = CustomQuotaStatus {
            used: Some(k8s::Quantity(totals.used.to_string())),
            available: Some(k8s::Quantity(totals.available.to_string())),
            claims: usage.keys().cloned().collect(),
        };
        if let Err(error) = self.store.patch_status(&quota.name, status).await {
            tracing::warn!(quota = %quota.name, %error, "Failed to update ClusterCustomQuota status");
        }
    }
}

fn object_id(obj: &serde_json::Value) -> Option<(&str, &str)> {
    let meta = obj.get("metadata")?;
    Some((
        meta.get("namespace")?.as_str()?,
        meta.get("name")?.as_str()?,
    ))
}

fn object_labels(obj: &serde_json::Value) -> Labels {
    obj.get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| serde_json::from_value::<k8s::labels::Map>(l.clone()).ok())
        .into()
}

/// Lists and patches through the API server.
pub struct KubeStore {
    client: k8s::Client,
    resources: parking_lot::Mutex<HashMap<k8s::GroupVersionKind, k8s::ApiResource>>,
    timeout: Duration,
}

impl KubeStore {
    pub fn new(client: k8s::Client, timeout: Duration) -> Self {
        Self {
            client,
            resources: Default::default(),
            timeout,
        }
    }

    async fn resource(&self, source: &CustomQuotaSource) -> Result<k8s::ApiResource, QuotaError> {
        let (group, version) = source.group_version();
        let gvk = k8s::GroupVersionKind::gvk(group, version, &source.kind);
        if let Some(resource) = self.resources.lock().get(&gvk) {
            return Ok(resource.clone());
        }

        let (resource, _) = kube::discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|source| QuotaError::Discovery {
                kind: gvk.kind.clone(),
                source,
            })?;
        self.resources.lock().insert(gvk, resource.clone());
        Ok(resource)
    }
}

#[async_trait::async_trait]
impl QuotaStore for KubeStore {
    async fn list(&self, source: &CustomQuotaSource) -> Result<Vec<serde_json::Value>, QuotaError> {
        let resource = self.resource(source).await?;
        let api = k8s::Api::<k8s::DynamicObject>::all_with(self.client.clone(), &resource);
        let list = tokio::time::timeout(self.timeout, api.list(&k8s::ListParams::default()))
            .await
            .map_err(|_| QuotaError::Timeout(self.timeout))?
            .map_err(|source| QuotaError::List {
                kind: resource.kind.clone(),
                source,
            })?;
        list.items
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(Into::into))
            .collect()
    }

    async fn patch_status(&self, name: &str, status: CustomQuotaStatus) -> Result<(), QuotaError> {
        let api = k8s::Api::<k8s::ClusterCustomQuota>::all(self.client.clone());
        let patch = k8s::Patch::Merge(serde_json::json!({ "status": status }));
        let params = k8s::PatchParams::apply(tenancy_controller_core::FIELD_MANAGER);
        tokio::time::timeout(self.timeout, api.patch_status(name, &params, &patch))
            .await
            .map_err(|_| QuotaError::Timeout(self.timeout))?
            .map_err(QuotaError::Patch)?;
        Ok(())
    }
}
