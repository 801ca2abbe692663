use crate::{
    desired::{self, Derived, QuotaUsage},
    metrics::Outcome,
    status, Backoff, ControllerMetrics, Error, Update,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
#[cfg(not(test))]
use chrono::offset::Utc;
use futures::{stream, StreamExt};
use kubert::lease::Claim;
use std::{future::Future, sync::Arc};
use tenancy_controller_core::FIELD_MANAGER;
use tenancy_controller_k8s_api::{
    self as k8s,
    tenant::ResourceQuotaScope,
    Api, DeleteParams, ListParams, Patch, PatchParams, Resource, ResourceExt,
    RESOURCE_QUOTA_LABEL, TENANT_LABEL,
};
use tenancy_controller_k8s_index::tenants;
use tokio::{
    sync::{mpsc, watch, Notify},
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tracing::Instrument;

/// Namespaces of one tenant reconciled at once.
const NAMESPACE_CONCURRENCY: usize = 8;

/// Attempts to revert namespace metadata that lose a write race.
const CONFLICT_RETRIES: usize = 3;

pub struct Controller {
    ctx: Arc<Context>,
    updates: mpsc::Receiver<Update>,
    workers: HashMap<String, Worker>,
}

struct Context {
    claims: watch::Receiver<Arc<Claim>>,
    client: k8s::Client,
    name: String,
    tenants: tenants::SharedIndex,
    timeout: Duration,
    metrics: ControllerMetrics,
}

struct Worker {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

enum Reconciled {
    Done,
    Deleted,
    NotSynced,
}

struct Snapshot {
    tenant: Arc<k8s::Tenant>,
    spec_error: Option<String>,
    namespaces: Vec<String>,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        claims: watch::Receiver<Arc<Claim>>,
        client: k8s::Client,
        name: String,
        tenants: tenants::SharedIndex,
        updates: mpsc::Receiver<Update>,
        timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            ctx: Arc::new(Context {
                claims,
                client,
                name,
                tenants,
                timeout,
                metrics,
            }),
            updates,
            workers: HashMap::default(),
        }
    }

    /// Dispatches queued tenants to their workers until the queue closes.
    pub async fn run(mut self) {
        while let Some(Update { tenant }) = self.updates.recv().await {
            self.workers.retain(|_, w| !w.task.is_finished());
            let ctx = self.ctx.clone();
            let worker = self.workers.entry(tenant.clone()).or_insert_with(|| {
                let notify = Arc::new(Notify::new());
                let task = tokio::spawn(
                    work(ctx, tenant.clone(), notify.clone())
                        .instrument(tracing::info_span!("tenant", name = %tenant)),
                );
                Worker { notify, task }
            });
            // Notifications sent while a pass runs coalesce into one more
            // pass.
            worker.notify.notify_one();
        }
    }
}

/// Reconciles one tenant each time it is notified, until the tenant is
/// deleted.
async fn work(ctx: Arc<Context>, tenant: String, notify: Arc<Notify>) {
    loop {
        notify.notified().await;
        let mut backoff = Backoff::default();
        loop {
            if !ctx.is_leader() {
                tracing::trace!("Not the leader; skipping");
                break;
            }
            let started = Instant::now();
            match ctx.reconcile(&tenant).await {
                Ok(Reconciled::Done) => {
                    ctx.metrics.reconciled(Outcome::Reconciled, started);
                    break;
                }
                Ok(Reconciled::NotSynced) => {
                    tracing::debug!("Waiting for the ownership index to sync");
                    break;
                }
                Ok(Reconciled::Deleted) => {
                    tracing::debug!("Tenant deleted");
                    return;
                }
                Err(error) => match backoff.next_delay() {
                    Some(delay) => {
                        ctx.metrics.reconciled(Outcome::Failed, started);
                        tracing::warn!(%error, ?delay, "Failed to reconcile tenant");
                        tokio::select! {
                            _ = time::sleep(delay) => {}
                            _ = notify.notified() => {}
                        }
                    }
                    None => {
                        ctx.metrics.reconciled(Outcome::Exhausted, started);
                        tracing::error!(%error, "Failed to reconcile tenant; retrying on the next resync");
                        break;
                    }
                },
            }
        }
    }
}

// === impl Context ===

impl Context {
    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.name)
    }

    fn snapshot(&self, name: &str) -> Result<Snapshot, Reconciled> {
        let index = self.tenants.read();
        if !index.is_synced() {
            return Err(Reconciled::NotSynced);
        }
        let entry = index.tenant(name).ok_or(Reconciled::Deleted)?;
        Ok(Snapshot {
            tenant: entry.tenant.clone(),
            spec_error: entry.policy.as_ref().err().cloned(),
            namespaces: index.namespaces_of(name),
        })
    }

    async fn reconcile(&self, name: &str) -> Result<Reconciled, Error> {
        let Snapshot {
            tenant,
            spec_error,
            namespaces,
        } = match self.snapshot(name) {
            Ok(snapshot) => snapshot,
            Err(reconciled) => return Ok(reconciled),
        };

        // Derived objects are left untouched while the spec is invalid.
        let mut outcomes = status::Outcomes::new();
        if spec_error.is_none() {
            let usage = self.quota_usage(&tenant, &namespaces).await?;
            let (tenant, usage) = (&*tenant, &usage);
            let results = stream::iter(namespaces.iter().cloned())
                .map(|ns: String| async move {
                    let res = self.sync_namespace(tenant, &ns, usage).await;
                    (ns, res)
                })
                .buffer_unordered(NAMESPACE_CONCURRENCY)
                .collect::<Vec<_>>()
                .await;
            for (ns, res) in results {
                if let Err(error) = &res {
                    tracing::warn!(namespace = %ns, %error, "Failed to reconcile namespace");
                }
                outcomes.insert(ns, res.map_err(|e| e.to_string()));
            }
        }

        self.update_status(&tenant, &namespaces, spec_error.as_deref(), &outcomes)
            .await?;

        let failed = outcomes.values().filter(|r| r.is_err()).count();
        if failed > 0 {
            return Err(Error::Namespaces {
                failed,
                total: outcomes.len(),
            });
        }
        Ok(Reconciled::Done)
    }

    async fn quota_usage(
        &self,
        tenant: &k8s::Tenant,
        namespaces: &[String],
    ) -> Result<QuotaUsage, Error> {
        let tenant_scoped = tenant
            .spec
            .resource_quotas
            .as_ref()
            .is_some_and(|rq| rq.scope == ResourceQuotaScope::Tenant && !rq.items.is_empty());
        if !tenant_scoped {
            return Ok(QuotaUsage::default());
        }

        let name = tenant.name_unchecked();
        let api = Api::<k8s::ResourceQuota>::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{TENANT_LABEL}={name},{RESOURCE_QUOTA_LABEL}"));
        let quotas = self.call(api.list(&params)).await?;
        Ok(QuotaUsage::collect(&name, namespaces, &quotas.items))
    }

    async fn sync_namespace(
        &self,
        tenant: &k8s::Tenant,
        namespace: &str,
        usage: &QuotaUsage,
    ) -> Result<(), Error> {
        self.sync_namespace_metadata(tenant, namespace).await?;

        let desired::Objects {
            network_policies,
            limit_ranges,
            resource_quotas,
            role_bindings,
        } = desired::objects(tenant, namespace, usage)?;
        let name = tenant.name_unchecked();
        self.sync_kind(&name, namespace, network_policies).await?;
        self.sync_kind(&name, namespace, limit_ranges).await?;
        self.sync_kind(&name, namespace, resource_quotas).await?;
        self.sync_kind(&name, namespace, role_bindings).await?;
        Ok(())
    }

    /// Re-applies the tenant's namespace metadata, reverting changes made to
    /// ownership labels or references.
    async fn sync_namespace_metadata(
        &self,
        tenant: &k8s::Tenant,
        namespace: &str,
    ) -> Result<(), Error> {
        let api = Api::<k8s::Namespace>::all(self.client.clone());
        let params = PatchParams::apply(FIELD_MANAGER);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let ns = self.call(api.get(namespace)).await?;
            let Some(patch) = desired::namespace_patch(tenant, &ns)? else {
                return Ok(());
            };
            tracing::debug!(%namespace, %patch, "Patching namespace metadata");
            match self.call(api.patch(namespace, &params, &Patch::Merge(&patch))).await {
                Ok(_) => {
                    self.metrics.namespace_reverted();
                    return Ok(());
                }
                Err(error) if error.is_conflict() && attempt < CONFLICT_RETRIES => {
                    tracing::debug!(%namespace, attempt, "Namespace changed concurrently; retrying");
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Applies the desired objects of one kind that drifted and deletes the
    /// tenant's objects of that kind that are no longer desired.
    async fn sync_kind<K: Derived>(
        &self,
        tenant: &str,
        namespace: &str,
        desired: Vec<K>,
    ) -> Result<(), Error> {
        let kind = K::kind(&());
        let api = Api::<K>::namespaced(self.client.clone(), namespace);
        let selector = format!("{TENANT_LABEL}={tenant},{}", K::INDEX_LABEL);
        let existing = self
            .call(api.list(&ListParams::default().labels(&selector)))
            .await?
            .items;

        let params = PatchParams::apply(FIELD_MANAGER).force();
        let mut names = HashSet::default();
        for obj in desired {
            let name = obj.name_unchecked();
            let current = existing.iter().find(|o| o.name_unchecked() == name);
            if !current.is_some_and(|current| desired::is_applied(&obj, current)) {
                tracing::debug!(%namespace, %name, %kind, "Applying");
                self.call(api.patch(&name, &params, &Patch::Apply(&obj)))
                    .await?;
                self.metrics.applied(&kind);
            }
            names.insert(name);
        }

        for obj in existing {
            let name = obj.name_unchecked();
            if names.contains(&name) {
                continue;
            }
            tracing::debug!(%namespace, %name, %kind, "Pruning");
            match self.call(api.delete(&name, &DeleteParams::default())).await {
                Ok(_) => self.metrics.pruned(&kind),
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    async fn update_status(
        &self,
        tenant: &k8s::Tenant,
        namespaces: &[String],
        spec_error: Option<&str>,
        outcomes: &status::Outcomes,
    ) -> Result<(), Error> {
        #[cfg(not(test))]
        let now = Utc::now();
        #[cfg(test)]
        let now = chrono::DateTime::<chrono::Utc>::MIN_UTC;

        let status = status::tenant_status(tenant, namespaces, spec_error, outcomes, now);
        if tenant.status.as_ref() == Some(&status) {
            return Ok(());
        }

        let name = tenant.name_unchecked();
        tracing::debug!(size = status.size, "Patching status");
        let api = Api::<k8s::Tenant>::all(self.client.clone());
        let patch = serde_json::json!({
            "apiVersion": k8s::Tenant::api_version(&()),
            "kind": k8s::Tenant::kind(&()),
            "status": status,
        });
        self.call(api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch)))
            .await?;
        self.metrics.status_patched();
        Ok(())
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, Error> {
        time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(Into::into)
    }
}
