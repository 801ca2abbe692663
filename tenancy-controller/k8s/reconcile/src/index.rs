use crate::{desired::Derived, IndexMetrics};
use ahash::AHashMap as HashMap;
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::RwLock;
use std::sync::Arc;
use tenancy_controller_k8s_api::{self as k8s, ResourceExt, TENANT_LABEL};
use tenancy_controller_k8s_index::tenants;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{self, Duration},
};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Queues tenants for reconciliation as the objects they own change.
///
/// Namespace membership is read from the ownership index, which must observe
/// each Namespace before this index does.
pub struct Index {
    tenants: tenants::SharedIndex,
    updates: mpsc::Sender<Update>,
    metrics: IndexMetrics,

    /// The last observed generation of each tenant.
    generations: HashMap<String, Option<i64>>,

    /// The tenant of each observed tenant namespace.
    namespaces: HashMap<String, String>,
}

/// A tenant that needs to be reconciled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub tenant: String,
}

// === impl Index ===

impl Index {
    pub fn shared(
        tenants: tenants::SharedIndex,
        updates: mpsc::Sender<Update>,
        metrics: IndexMetrics,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            tenants,
            updates,
            metrics,
            generations: HashMap::default(),
            namespaces: HashMap::default(),
        }))
    }

    /// Queues every tenant periodically so that drift in objects that are not
    /// watched is eventually reverted and failed reconciles are retried.
    pub async fn run(index: SharedIndex, period: Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let index = index.read();
            let names = index
                .tenants
                .read()
                .tenants()
                .map(|(name, _)| name.to_string())
                .collect::<Vec<_>>();
            tracing::trace!(tenants = names.len(), "Resyncing");
            for name in names {
                index.queue(name);
            }
        }
    }

    fn queue(&self, tenant: String) {
        match self.updates.try_send(Update { tenant }) {
            Ok(()) => self.metrics.queued(),
            Err(TrySendError::Full(Update { tenant })) => {
                tracing::warn!(%tenant, "Reconcile queue is full; dropping update");
                self.metrics.dropped();
            }
            Err(TrySendError::Closed(Update { tenant })) => {
                tracing::debug!(%tenant, "Reconciler has stopped");
            }
        }
    }
}

impl IndexClusterResource<k8s::Tenant> for Index {
    fn apply(&mut self, tenant: k8s::Tenant) {
        let name = tenant.name_unchecked();
        let generation = tenant.metadata.generation;
        // Status writes do not change the generation.
        if self.generations.insert(name.clone(), generation) == Some(generation) {
            return;
        }
        self.queue(name);
    }

    fn delete(&mut self, name: String) {
        self.generations.remove(&name);
        self.queue(name);
    }
}

impl IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        let bound = self.tenants.read().tenant_of(&name).map(str::to_string);
        let Some(tenant) = bound.or_else(|| ns.labels().get(TENANT_LABEL).cloned()) else {
            self.namespaces.remove(&name);
            return;
        };
        self.namespaces.insert(name, tenant.clone());
        self.queue(tenant);
    }

    fn delete(&mut self, name: String) {
        if let Some(tenant) = self.namespaces.remove(&name) {
            self.queue(tenant);
        }
    }
}

impl<K: Derived> IndexNamespacedResource<K> for Index {
    fn apply(&mut self, obj: K) {
        let tenant = obj
            .namespace()
            .and_then(|ns| self.namespaces.get(&ns).cloned())
            .or_else(|| obj.labels().get(TENANT_LABEL).cloned());
        if let Some(tenant) = tenant {
            self.queue(tenant);
        }
    }

    fn delete(&mut self, namespace: String, _name: String) {
        if let Some(tenant) = self.namespaces.get(&namespace).cloned() {
            self.queue(tenant);
        }
    }
}
