use super::*;
use crate::{
    custom_quota::{AdmitError, Aggregator, QuotaIndex, Write},
    ResourceId,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::{
    iter::FromIterator,
    sync::{atomic::Ordering, Arc},
};
use tenancy_controller_core::Violation;
use tenancy_controller_k8s_api::{labels::Selector, ClusterCustomQuotaSpec};
use tokio::{sync::Barrier, time::Duration};

struct Test {
    store: Arc<FakeStore>,
    quotas: crate::custom_quota::SharedIndex,
    aggregator: Aggregator,
}

impl Test {
    fn new(limit: &str) -> Self {
        let tenants = index_with(
            vec![mk_tenant("solar", "alice", &[])],
            vec![
                mk_tenant_namespace("solar-dev", "solar"),
                mk_tenant_namespace("solar-prod", "solar"),
                mk_namespace("other", BTreeMap::new()),
            ],
        );
        let quotas = QuotaIndex::shared();
        IndexClusterResource::apply(&mut *quotas.write(), mk_quota("replicas", limit));
        let store = Arc::new(FakeStore::default());
        let aggregator = Aggregator::new(
            quotas.clone(),
            tenants,
            store.clone(),
            Duration::from_secs(30),
        );
        Self {
            store,
            quotas,
            aggregator,
        }
    }

    async fn write(&self, obj: &serde_json::Value) -> Result<(), Violation> {
        let res = admit(&self.aggregator, obj).await;
        if res.is_ok() {
            self.store.put(obj.clone());
        }
        res
    }

    fn status(&self) -> (String, String) {
        let status = self.store.status("replicas").expect("status must be written");
        (
            status.used.expect("used must be set").0,
            status.available.expect("available must be set").0,
        )
    }
}

/// Admits a Deployment write, expecting a decision.
async fn admit(aggregator: &Aggregator, obj: &serde_json::Value) -> Result<(), Violation> {
    let res = aggregator
        .admit(&Write {
            group: "apps",
            kind: "Deployment",
            id: ResourceId::new(
                obj["metadata"]["namespace"].as_str().unwrap(),
                obj["metadata"]["name"].as_str().unwrap(),
            ),
            object: Some(obj),
            dry_run: false,
        })
        .await;
    match res {
        Ok(()) => Ok(()),
        Err(AdmitError::Violation(violation)) => Err(violation),
        Err(error) => panic!("no decision was reached: {error}"),
    }
}

fn mk_quota(name: &str, limit: &str) -> k8s::ClusterCustomQuota {
    k8s::ClusterCustomQuota::new(
        name,
        ClusterCustomQuotaSpec {
            limit: k8s::Quantity(limit.to_string()),
            source: CustomQuotaSource {
                version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                path: ".spec.replicas".to_string(),
            },
            selectors: vec![Selector::from_iter(Some((TENANT_LABEL, "solar")))],
            scope_selectors: vec![],
        },
    )
}

fn mk_deployment(ns: &str, name: &str, replicas: i64) -> serde_json::Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"namespace": ns, "name": name},
        "spec": {"replicas": replicas},
    })
}

#[tokio::test]
async fn sums_across_member_namespaces() {
    let test = Test::new("5");
    test.write(&mk_deployment("solar-dev", "a", 2)).await.unwrap();
    test.write(&mk_deployment("solar-prod", "b", 3)).await.unwrap();
    assert_eq!(test.status(), ("5".to_string(), "0".to_string()));

    let err = test
        .write(&mk_deployment("solar-prod", "c", 1))
        .await
        .expect_err("the quota is exhausted");
    assert_eq!(
        err,
        Violation::CustomQuotaExceeded {
            quota: "replicas".to_string(),
            used: "6".to_string(),
            limit: "5".to_string(),
        }
    );

    // Non-member namespaces do not participate.
    test.write(&mk_deployment("other", "d", 100)).await.unwrap();
    assert_eq!(test.status(), ("5".to_string(), "0".to_string()));
}

#[tokio::test]
async fn shrinking_at_the_cap_is_allowed() {
    let test = Test::new("5");
    test.write(&mk_deployment("solar-dev", "a", 5)).await.unwrap();
    test.write(&mk_deployment("solar-dev", "a", 4)).await.unwrap();
    assert_eq!(test.status(), ("4".to_string(), "1".to_string()));
    test.write(&mk_deployment("solar-dev", "a", 5)).await.unwrap();
    assert!(test.write(&mk_deployment("solar-dev", "a", 6)).await.is_err());
}

#[tokio::test]
async fn over_limit_quotas_may_decrease() {
    let test = Test::new("10");
    test.write(&mk_deployment("solar-dev", "a", 8)).await.unwrap();

    // The limit is lowered below current usage.
    IndexClusterResource::apply(&mut *test.quotas.write(), mk_quota("replicas", "5"));
    test.write(&mk_deployment("solar-dev", "a", 7)).await.unwrap();
    assert_eq!(test.status(), ("7".to_string(), "0".to_string()));
    assert!(test.write(&mk_deployment("solar-dev", "b", 1)).await.is_err());
}

#[tokio::test]
async fn admitted_writes_count_before_they_are_listed() {
    let test = Test::new("5");
    let first = mk_deployment("solar-dev", "a", 3);
    test.aggregator
        .admit(&Write {
            group: "apps",
            kind: "Deployment",
            id: ResourceId::new("solar-dev", "a"),
            object: Some(&first),
            dry_run: false,
        })
        .await
        .unwrap();

    // The first object has not reached the store yet.
    assert!(test.write(&mk_deployment("solar-prod", "b", 3)).await.is_err());
}

#[tokio::test]
async fn missing_fields_make_usage_unavailable() {
    let test = Test::new("5");
    test.store.put(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"namespace": "solar-dev", "name": "broken"},
        "spec": {},
    }));
    assert!(matches!(
        test.write(&mk_deployment("solar-prod", "b", 1)).await,
        Err(Violation::CustomQuotaUnavailable { .. })
    ));
}

#[tokio::test]
async fn deletes_release_usage() {
    let test = Test::new("5");
    test.write(&mk_deployment("solar-dev", "a", 5)).await.unwrap();
    test.aggregator
        .admit(&Write {
            group: "apps",
            kind: "Deployment",
            id: ResourceId::new("solar-dev", "a"),
            object: None,
            dry_run: false,
        })
        .await
        .unwrap();

    // The deleted object is still listed, but no longer counted.
    assert_eq!(test.status(), ("0".to_string(), "5".to_string()));
    test.write(&mk_deployment("solar-dev", "b", 5)).await.unwrap();
}

#[tokio::test]
async fn other_kinds_do_not_participate() {
    let test = Test::new("1");
    let cm = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"namespace": "solar-dev", "name": "cm"},
    });
    test.aggregator
        .admit(&Write {
            group: "",
            kind: "ConfigMap",
            id: ResourceId::new("solar-dev", "cm"),
            object: Some(&cm),
            dry_run: false,
        })
        .await
        .expect("ConfigMaps are not counted");
    assert_eq!(test.store.status("replicas"), None);
}

#[tokio::test]
async fn unreadable_members_leave_writes_undecided() {
    let test = Test::new("5");
    test.store.unavailable.store(true, Ordering::SeqCst);
    let obj = mk_deployment("solar-dev", "a", 1);
    let err = test
        .aggregator
        .admit(&Write {
            group: "apps",
            kind: "Deployment",
            id: ResourceId::new("solar-dev", "a"),
            object: Some(&obj),
            dry_run: false,
        })
        .await
        .expect_err("members cannot be listed");
    assert!(
        matches!(&err, AdmitError::Unavailable { quota, .. } if quota == "replicas"),
        "{err}"
    );

    test.store.unavailable.store(false, Ordering::SeqCst);
    test.write(&obj).await.expect("the store is back");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_writes_are_decided_one_at_a_time() {
    let test = Test::new("5");
    let barrier = Arc::new(Barrier::new(2));

    let tasks = ["a", "b"].map(|name| {
        let aggregator = test.aggregator.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            let obj = mk_deployment("solar-dev", name, 3);
            barrier.wait().await;
            admit(&aggregator, &obj).await
        })
    });

    let mut admitted = 0;
    for task in tasks {
        match task.await.expect("task must not panic") {
            Ok(()) => admitted += 1,
            Err(violation) => assert!(
                matches!(violation, Violation::CustomQuotaExceeded { .. }),
                "{violation}"
            ),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(test.status(), ("3".to_string(), "2".to_string()));
}
