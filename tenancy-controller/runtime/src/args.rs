use crate::{
    admission::{Admission, Config as AdmissionConfig, FailurePolicy},
    core::{
        node_metadata::{ForbiddenKeys, NodeMetadataGuard},
        Privileged,
    },
    index::{self, custom_quota, Aggregator, Catalog, CollisionIndex, KubeStore, QuotaIndex},
    index_list::IndexList,
    k8s::{self, Client, Resource, TENANT_LABEL},
    lease,
    metrics::AdmissionMetrics,
    reconcile,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration},
};
use tracing::{info_span, Instrument};

const RESYNC_PERIOD: Duration = Duration::from_secs(60);

// Unconfirmed hostname reservations and quota claims are dropped after these
// periods, so a write that never reaches the API server holds nothing for
// long.
const PENDING_INGRESS_TTL: Duration = Duration::from_secs(30);
const QUOTA_CLAIM_TTL: Duration = Duration::from_secs(10);

// Each tenant is queued at most once per event, so the queue only needs to
// absorb a burst of namespace events.
const RECONCILE_QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Parser)]
#[clap(name = "tenancy", about = "A multi-tenancy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "tenancy=info,warn",
        env = "TENANCY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    #[clap(long, default_value = "capsule-system")]
    controller_namespace: String,

    #[clap(long, default_value = "tenancy-controller")]
    controller_deployment_name: String,

    /// The controller's service account; its writes are never denied.
    #[clap(long, default_value = "tenancy-controller")]
    controller_service_account: String,

    /// Groups whose members administer tenants.
    #[clap(long, value_delimiter = ',', default_value = "system:masters")]
    administrator_groups: Vec<String>,

    #[clap(long, value_delimiter = ',')]
    administrator_users: Vec<String>,

    #[clap(long, default_value = "8000")]
    admission_timeout_ms: u64,

    /// How writes are decided when admission cannot reach a decision
    /// (`closed` or `open`).
    #[clap(long, default_value = "closed")]
    failure_policy: FailurePolicy,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Node labels that only administrators may change.
    #[clap(long, value_delimiter = ',')]
    forbidden_node_labels: Vec<String>,

    #[clap(long)]
    forbidden_node_labels_regex: Option<String>,

    /// Node annotations that only administrators may change.
    #[clap(long, value_delimiter = ',')]
    forbidden_node_annotations: Vec<String>,

    #[clap(long)]
    forbidden_node_annotations_regex: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            controller_namespace,
            controller_deployment_name,
            controller_service_account,
            administrator_groups,
            mut administrator_users,
            admission_timeout_ms,
            failure_policy,
            patch_timeout_ms,
            forbidden_node_labels,
            forbidden_node_labels_regex,
            forbidden_node_annotations,
            forbidden_node_annotations_regex,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        // The controller's own writes to derived objects and namespaces must
        // never be denied.
        administrator_users.push(format!(
            "system:serviceaccount:{controller_namespace}:{controller_service_account}"
        ));
        let nodes = NodeMetadataGuard {
            labels: ForbiddenKeys::new(
                forbidden_node_labels,
                forbidden_node_labels_regex.as_deref(),
            )
            .context("invalid --forbidden-node-labels-regex")?,
            annotations: ForbiddenKeys::new(
                forbidden_node_annotations,
                forbidden_node_annotations_regex.as_deref(),
            )
            .context("invalid --forbidden-node-annotations-regex")?,
        };
        let config = AdmissionConfig {
            privileged: Privileged::new(administrator_users, administrator_groups),
            nodes,
            timeout: Duration::from_millis(admission_timeout_ms),
            failure_policy,
        };

        // Build the indexes shared by admission and the reconciler.
        let tenants = index::tenants::Index::shared();
        let catalog = Catalog::shared();
        let collisions = CollisionIndex::shared(PENDING_INGRESS_TTL);
        let quotas = QuotaIndex::shared();

        let mut prom = <Registry>::default();
        index::metrics::register(
            prom.sub_registry_with_prefix("index"),
            tenants.clone(),
            catalog.clone(),
            collisions.clone(),
            quotas.clone(),
        );
        let reconcile_reg = prom.sub_registry_with_prefix("reconcile");
        let controller_metrics = reconcile::ControllerMetrics::register(reconcile_reg);
        let reconcile_index_metrics = reconcile::IndexMetrics::register(reconcile_reg);
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Build the reconcile index which queues tenants whenever their
        // namespaces or derived objects change.
        let (updates_tx, updates_rx) = mpsc::channel(RECONCILE_QUEUE_SIZE);
        let reconcile_index =
            reconcile::Index::shared(tenants.clone(), updates_tx, reconcile_index_metrics);

        // Spawn resource watches.

        // Tenants and namespaces reach the ownership index before the
        // reconcile index, which reads from it.
        let tenant_indexes = IndexList::new(tenants.clone())
            .push(reconcile_index.clone())
            .shared();

        let tenant_watch = runtime.watch_all::<k8s::Tenant>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(tenant_indexes.clone(), tenant_watch)
                .instrument(info_span!("tenants")),
        );

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(tenant_indexes, namespaces)
                .instrument(info_span!("namespaces")),
        );

        let ingress_classes = runtime.watch_all::<k8s::IngressClass>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(catalog.clone(), ingress_classes)
                .instrument(info_span!("ingressclasses")),
        );

        let priority_classes = runtime.watch_all::<k8s::PriorityClass>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(catalog.clone(), priority_classes)
                .instrument(info_span!("priorityclasses")),
        );

        let storage_classes = runtime.watch_all::<k8s::StorageClass>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(catalog.clone(), storage_classes)
                .instrument(info_span!("storageclasses")),
        );

        let runtime_classes = runtime.watch_all::<k8s::RuntimeClass>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(catalog.clone(), runtime_classes)
                .instrument(info_span!("runtimeclasses")),
        );

        let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(collisions.clone(), ingresses)
                .instrument(info_span!("ingresses")),
        );

        if api_resource_exists::<k8s::ClusterCustomQuota>(&runtime.client()).await {
            let custom_quotas =
                runtime.watch_all::<k8s::ClusterCustomQuota>(watcher::Config::default());
            tokio::spawn(
                kubert::index::cluster(quotas.clone(), custom_quotas)
                    .instrument(info_span!("clustercustomquotas")),
            );
        } else {
            tracing::warn!(
                "clustercustomquotas.capsule.clastix.io resource kind not found, skipping watches"
            );
        }

        // Derived objects are only watched when they carry the tenant label.
        let derived = || watcher::Config::default().labels(TENANT_LABEL);

        let network_policies = runtime.watch_all::<k8s::NetworkPolicy>(derived());
        tokio::spawn(
            kubert::index::namespaced(reconcile_index.clone(), network_policies)
                .instrument(info_span!("networkpolicies")),
        );

        let limit_ranges = runtime.watch_all::<k8s::LimitRange>(derived());
        tokio::spawn(
            kubert::index::namespaced(reconcile_index.clone(), limit_ranges)
                .instrument(info_span!("limitranges")),
        );

        let resource_quotas = runtime.watch_all::<k8s::ResourceQuota>(derived());
        tokio::spawn(
            kubert::index::namespaced(reconcile_index.clone(), resource_quotas)
                .instrument(info_span!("resourcequotas")),
        );

        let role_bindings = runtime.watch_all::<k8s::RoleBinding>(derived());
        tokio::spawn(
            kubert::index::namespaced(reconcile_index.clone(), role_bindings)
                .instrument(info_span!("rolebindings")),
        );

        // Spawn the periodic resync of every tenant.
        tokio::spawn(
            reconcile::Index::run(reconcile_index, RESYNC_PERIOD)
                .instrument(info_span!("reconcile_index")),
        );

        let client = runtime.client();
        let patch_timeout = Duration::from_millis(patch_timeout_ms);

        let store = Arc::new(KubeStore::new(client.clone(), patch_timeout));
        let aggregator = Aggregator::new(quotas.clone(), tenants.clone(), store, QUOTA_CLAIM_TTL);
        tokio::spawn(
            refresh_quotas(
                aggregator.clone(),
                quotas.clone(),
                claims.clone(),
                hostname.clone(),
            )
            .instrument(info_span!("clustercustomquota_status")),
        );

        let controller = reconcile::Controller::new(
            claims,
            client,
            hostname,
            tenants.clone(),
            updates_rx,
            patch_timeout,
            controller_metrics,
        );
        tokio::spawn(controller.run().instrument(info_span!("reconcile_controller")));

        let admission = Admission::new(
            tenants,
            catalog,
            collisions,
            aggregator,
            config,
            admission_metrics,
        );
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Periodically recomputes every ClusterCustomQuota's status from a full
/// scan while this replica holds the lease.
async fn refresh_quotas(
    aggregator: Aggregator,
    quotas: custom_quota::SharedIndex,
    claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    hostname: String,
) {
    let mut interval = time::interval(RESYNC_PERIOD);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if !claims.borrow().is_current_for(&hostname) {
            continue;
        }
        let names = quotas.read().names();
        for name in names {
            if let Err(error) = aggregator.refresh(&name).await {
                tracing::warn!(quota = %name, %error, "Failed to refresh ClusterCustomQuota usage");
            }
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
