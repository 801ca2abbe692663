use super::*;
use crate::{Index, IndexMetrics, Update};
use kubert::index::IndexNamespacedResource;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use prometheus_client::registry::Registry;
use tenancy_controller_k8s_api::{RESOURCE_QUOTA_LABEL, TENANT_LABEL};
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::Receiver<Update>) -> Vec<String> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|u| u.tenant)
        .collect()
}

fn tenant_namespace(name: &str, tenant: &str) -> k8s::Namespace {
    mk_namespace(name, btreemap! { TENANT_LABEL.to_string() => tenant.to_string() })
}

#[test]
fn queues_tenants_on_spec_changes() {
    let (tx, mut rx) = mpsc::channel(16);
    let index = Index::shared(
        ownership(vec![], vec![]),
        tx,
        IndexMetrics::register(&mut Registry::default()),
    );

    let mut tenant = mk_tenant("solar", TenantSpec::default());
    IndexClusterResource::apply(&mut *index.write(), tenant.clone());
    // A status write does not change the generation.
    IndexClusterResource::apply(&mut *index.write(), tenant.clone());
    tenant.metadata.generation = Some(2);
    IndexClusterResource::apply(&mut *index.write(), tenant);
    IndexClusterResource::<k8s::Tenant>::delete(&mut *index.write(), "solar".to_string());

    assert_eq!(drain(&mut rx), vec!["solar", "solar", "solar"]);
}

#[test]
fn queues_the_bound_tenant_of_relabeled_namespaces() {
    let (tx, mut rx) = mpsc::channel(16);
    let tenants = ownership(
        vec![mk_tenant("solar", TenantSpec::default())],
        vec![tenant_namespace("solar-dev", "solar")],
    );
    let index = Index::shared(
        tenants.clone(),
        tx,
        IndexMetrics::register(&mut Registry::default()),
    );

    // The ownership index observes the relabel first and keeps the binding.
    let relabeled = tenant_namespace("solar-dev", "oil");
    IndexClusterResource::apply(&mut *tenants.write(), relabeled.clone());
    IndexClusterResource::apply(&mut *index.write(), relabeled);
    IndexClusterResource::apply(
        &mut *index.write(),
        mk_namespace("kube-system", Default::default()),
    );
    IndexClusterResource::<k8s::Namespace>::delete(&mut *index.write(), "solar-dev".to_string());
    IndexClusterResource::<k8s::Namespace>::delete(&mut *index.write(), "kube-system".to_string());

    assert_eq!(drain(&mut rx), vec!["solar", "solar"]);
}

#[test]
fn queues_tenants_of_derived_objects() {
    let (tx, mut rx) = mpsc::channel(16);
    let index = Index::shared(
        ownership(vec![], vec![]),
        tx,
        IndexMetrics::register(&mut Registry::default()),
    );
    IndexClusterResource::apply(&mut *index.write(), tenant_namespace("solar-dev", "solar"));
    drain(&mut rx);

    let quota = k8s::ResourceQuota {
        metadata: ObjectMeta {
            name: Some("capsule-solar-0".to_string()),
            namespace: Some("solar-dev".to_string()),
            labels: Some(btreemap! {
                TENANT_LABEL.to_string() => "solar".to_string(),
                RESOURCE_QUOTA_LABEL.to_string() => "0".to_string(),
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    IndexNamespacedResource::apply(&mut *index.write(), quota);
    IndexNamespacedResource::<k8s::ResourceQuota>::delete(
        &mut *index.write(),
        "solar-dev".to_string(),
        "capsule-solar-0".to_string(),
    );
    IndexNamespacedResource::<k8s::LimitRange>::delete(
        &mut *index.write(),
        "default".to_string(),
        "limits".to_string(),
    );

    assert_eq!(drain(&mut rx), vec!["solar", "solar"]);
}

#[test]
fn drops_updates_when_the_queue_is_full() {
    let (tx, mut rx) = mpsc::channel(1);
    let index = Index::shared(
        ownership(vec![], vec![]),
        tx,
        IndexMetrics::register(&mut Registry::default()),
    );
    IndexClusterResource::apply(&mut *index.write(), mk_tenant("solar", TenantSpec::default()));
    IndexClusterResource::apply(&mut *index.write(), mk_tenant("oil", TenantSpec::default()));

    assert_eq!(drain(&mut rx), vec!["solar"]);
}
