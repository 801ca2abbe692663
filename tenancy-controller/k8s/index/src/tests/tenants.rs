use super::*;
use pretty_assertions::assert_eq;
use tenancy_controller_core::Requester;
use tenancy_controller_k8s_api::tenant::AllowedListSpec;

#[test]
fn binds_labeled_namespaces() {
    let index = index_with(
        vec![mk_tenant("solar", "alice", &[]), mk_tenant("oil", "bob", &[])],
        vec![
            mk_tenant_namespace("solar-dev", "solar"),
            mk_tenant_namespace("solar-prod", "solar"),
            mk_tenant_namespace("oil-dev", "oil"),
            mk_namespace("kube-system", BTreeMap::new()),
        ],
    );

    let idx = index.read();
    assert_eq!(idx.tenant_of("solar-dev"), Some("solar"));
    assert_eq!(idx.tenant_of("oil-dev"), Some("oil"));
    assert_eq!(idx.tenant_of("kube-system"), None);
    assert_eq!(idx.namespaces_of("solar"), vec!["solar-dev", "solar-prod"]);
}

#[test]
fn relabeling_does_not_move_membership() {
    let index = index_with(
        vec![mk_tenant("solar", "alice", &[]), mk_tenant("oil", "bob", &[])],
        vec![mk_tenant_namespace("solar-dev", "solar")],
    );

    IndexClusterResource::<k8s::Namespace>::apply(
        &mut *index.write(),
        mk_tenant_namespace("solar-dev", "oil"),
    );
    IndexClusterResource::<k8s::Namespace>::apply(
        &mut *index.write(),
        mk_namespace("solar-dev", BTreeMap::new()),
    );

    let idx = index.read();
    assert_eq!(idx.tenant_of("solar-dev"), Some("solar"));
    assert!(idx.namespaces_of("oil").is_empty());
}

#[test]
fn recorded_membership_wins_over_labels() {
    // The label was rewritten while nothing was watching.
    let index = index_with(
        vec![mk_tenant("oil", "bob", &[]), mk_tenant("solar", "alice", &["solar-dev"])],
        vec![mk_tenant_namespace("solar-dev", "oil")],
    );
    assert_eq!(index.read().tenant_of("solar-dev"), Some("solar"));
}

#[test]
fn deleting_a_namespace_unbinds_it() {
    let index = index_with(
        vec![mk_tenant("solar", "alice", &["solar-dev"])],
        vec![mk_tenant_namespace("solar-dev", "solar")],
    );
    IndexClusterResource::<k8s::Namespace>::delete(&mut *index.write(), "solar-dev".to_string());

    let idx = index.read();
    assert_eq!(idx.tenant_of("solar-dev"), None);
    assert!(idx.namespaces_of("solar").is_empty());
}

#[test]
fn recorded_namespaces_must_exist() {
    let index = index_with(vec![mk_tenant("solar", "alice", &["gone"])], vec![]);
    assert!(index.read().namespaces_of("solar").is_empty());
}

#[test]
fn finds_owned_tenants() {
    let index = index_with(
        vec![
            mk_tenant("solar", "alice", &[]),
            mk_tenant("wind", "alice", &[]),
            mk_tenant("oil", "bob", &[]),
        ],
        vec![],
    );
    let idx = index.read();
    assert_eq!(
        idx.owned_by(&Requester::new("alice", vec![])),
        vec!["solar", "wind"]
    );
    assert!(idx.owned_by(&Requester::new("carol", vec![])).is_empty());
}

#[test]
fn invalid_specs_are_kept_as_errors() {
    let mut tenant = mk_tenant("solar", "alice", &[]);
    tenant.spec.container_registries = Some(AllowedListSpec {
        allowed: vec![],
        allowed_regex: Some("(".to_string()),
    });
    let index = index_with(vec![tenant, mk_tenant("oil", "bob", &[])], vec![]);

    let idx = index.read();
    let err = idx
        .tenant("solar")
        .expect("tenant must be indexed")
        .policy
        .clone()
        .expect_err("policy must not compile");
    assert!(err.contains("containerRegistries"), "{err}");
    assert!(idx.tenant("oil").expect("tenant must be indexed").policy.is_ok());
}

#[test]
fn synced_after_both_listings() {
    let index = crate::tenants::Index::shared();
    assert!(!index.read().is_synced());

    IndexClusterResource::<k8s::Tenant>::reset(
        &mut *index.write(),
        vec![mk_tenant("solar", "alice", &[])],
        Default::default(),
    );
    assert!(!index.read().is_synced());

    IndexClusterResource::<k8s::Namespace>::reset(
        &mut *index.write(),
        vec![mk_tenant_namespace("solar-dev", "solar")],
        Default::default(),
    );
    let idx = index.read();
    assert!(idx.is_synced());
    assert_eq!(idx.namespaces_of("solar"), vec!["solar-dev"]);
}
