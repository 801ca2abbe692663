use super::*;
use crate::{labels::Selector, Labels};
use std::iter::FromIterator;
use tenancy_controller_k8s_api::tenant::{
    AllowedListSpec, AllowedServices, DefaultAllowedListSpec, ExternalIpsSpec, IngressOptions,
    ServiceOptions,
};

fn compile(spec: TenantSpec) -> TenantPolicy {
    TenantPolicy::compile("solar", &spec).expect("tenant must compile")
}

fn allowed(exact: &[&str], regex: Option<&str>) -> AllowedListSpec {
    AllowedListSpec {
        allowed: exact.iter().map(|s| s.to_string()).collect(),
        allowed_regex: regex.map(Into::into),
    }
}

fn no_catalog(_: &str) -> Option<CatalogEntry> {
    None
}

#[test]
fn empty_spec_allows_everything() {
    let policy = compile(TenantSpec::default());
    assert_eq!(policy.check_image("quay.io/org/app:1.0"), Ok(()));
    assert_eq!(policy.check_pull_policy("app", "nginx", None), Ok(()));
    assert_eq!(policy.check_priority_class(Some("high"), no_catalog), Ok(None));
    assert_eq!(policy.check_ingress_class(None, no_catalog), Ok(None));
    assert_eq!(policy.check_storage_class(None, no_catalog), Ok(None));
    assert_eq!(policy.check_runtime_class(Some("kata"), no_catalog), Ok(None));
    assert_eq!(policy.check_hostnames(["a.example.com"]), Ok(()));
    assert_eq!(policy.check_service_type(Some("NodePort")), Ok(()));
    assert_eq!(policy.check_external_ips(&["203.0.113.7"]), Ok(()));
    assert_eq!(policy.collision_scope, HostnameCollisionScope::Disabled);
}

#[test]
fn registries() {
    let policy = compile(TenantSpec {
        container_registries: Some(allowed(&["docker.io"], Some("^.*\\.corp\\.example$"))),
        ..Default::default()
    });
    assert_eq!(policy.check_image("nginx:1.25"), Ok(()));
    assert_eq!(policy.check_image("registry.corp.example/app"), Ok(()));

    let err = policy.check_image("quay.io/org/app").unwrap_err();
    assert_eq!(
        err,
        Violation::ContainerRegistryForbidden {
            image: "quay.io/org/app".to_string(),
            registry: "quay.io".to_string(),
            allowed: "use one from the following list (docker.io) or use one matching the following regex (^.*\\.corp\\.example$)".to_string(),
        }
    );
}

#[test]
fn pull_policies_default_like_the_api_server() {
    let policy = compile(TenantSpec {
        image_pull_policies: Some(vec![ImagePullPolicy::Always]),
        ..Default::default()
    });
    assert_eq!(policy.check_pull_policy("app", "nginx", Some("Always")), Ok(()));
    // An untagged image defaults to Always.
    assert_eq!(policy.check_pull_policy("app", "nginx", None), Ok(()));
    assert!(matches!(
        policy.check_pull_policy("app", "nginx:1.25", None),
        Err(Violation::ImagePullPolicyForbidden { .. })
    ));
    assert!(policy
        .check_pull_policy("app", "nginx", Some("Never"))
        .is_err());
}

#[test]
fn ingress_class_defaults_and_constraints() {
    let policy = compile(TenantSpec {
        ingress_options: Some(IngressOptions {
            allowed_classes: Some(DefaultAllowedListSpec {
                list: allowed(&["nginx"], None),
                selector: Selector::default(),
                default: Some("tenant-default".to_string()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    });

    assert_eq!(
        policy.check_ingress_class(None, no_catalog),
        Ok(Some("tenant-default".to_string()))
    );
    assert_eq!(policy.check_ingress_class(Some("nginx"), no_catalog), Ok(None));
    assert_eq!(
        policy.check_ingress_class(Some("haproxy"), no_catalog),
        Err(Violation::IngressClassForbidden {
            class: "haproxy".to_string(),
            allowed: "use one from the following list (nginx) or use the tenant default (tenant-default)"
                .to_string(),
        })
    );

    let global = |name: &str| {
        (name == "cluster-default").then(|| CatalogEntry {
            labels: Labels::default(),
            global_default: true,
        })
    };
    assert_eq!(
        policy.check_ingress_class(Some("cluster-default"), global),
        Ok(Some("tenant-default".to_string()))
    );
    assert_eq!(policy.ingress_default_class(), Some("tenant-default"));
}

#[test]
fn ingress_class_required_when_constrained() {
    let policy = compile(TenantSpec {
        ingress_options: Some(IngressOptions {
            allowed_classes: Some(DefaultAllowedListSpec {
                list: allowed(&["nginx"], None),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    assert!(matches!(
        policy.check_ingress_class(None, no_catalog),
        Err(Violation::IngressClassMissing { .. })
    ));
}

#[test]
fn priority_class_selected_by_labels() {
    let policy = compile(TenantSpec {
        priority_classes: Some(DefaultAllowedListSpec {
            selector: Selector::from_iter(Some(("tier", "gold"))),
            ..Default::default()
        }),
        ..Default::default()
    });
    let catalog = |name: &str| match name {
        "gold" => Some(CatalogEntry {
            labels: Labels::from_iter(Some(("tier", "gold"))),
            global_default: false,
        }),
        "bronze" => Some(CatalogEntry::default()),
        _ => None,
    };
    assert_eq!(policy.check_priority_class(Some("gold"), catalog), Ok(None));
    assert!(policy.check_priority_class(Some("bronze"), catalog).is_err());
    assert!(policy.check_priority_class(Some("missing"), catalog).is_err());
    assert_eq!(policy.check_priority_class(None, catalog), Ok(None));
}

#[test]
fn storage_class_defaults_and_requirement() {
    let policy = compile(TenantSpec {
        storage_classes: Some(DefaultAllowedListSpec {
            list: allowed(&["ceph-rbd"], Some("^local-.*$")),
            selector: Selector::default(),
            default: Some("ceph-rbd".to_string()),
        }),
        ..Default::default()
    });
    assert_eq!(
        policy.check_storage_class(None, no_catalog),
        Ok(Some("ceph-rbd".to_string()))
    );
    assert_eq!(policy.check_storage_class(Some("local-ssd"), no_catalog), Ok(None));
    assert_eq!(
        policy.check_storage_class(Some("gp2"), no_catalog),
        Err(Violation::StorageClassForbidden {
            class: "gp2".to_string(),
            allowed: "use one from the following list (ceph-rbd) or use one matching the following regex (^local-.*$) or use the tenant default (ceph-rbd)".to_string(),
        })
    );

    // The cluster default gives way to the tenant default.
    let global = |name: &str| {
        (name == "standard").then(|| CatalogEntry {
            labels: Labels::default(),
            global_default: true,
        })
    };
    assert_eq!(
        policy.check_storage_class(Some("standard"), global),
        Ok(Some("ceph-rbd".to_string()))
    );

    let without_default = compile(TenantSpec {
        storage_classes: Some(DefaultAllowedListSpec {
            list: allowed(&["ceph-rbd"], None),
            ..Default::default()
        }),
        ..Default::default()
    });
    assert_eq!(
        without_default.check_storage_class(None, no_catalog),
        Err(Violation::StorageClassMissing {
            allowed: "use one from the following list (ceph-rbd)".to_string(),
        })
    );
}

#[test]
fn runtime_class_is_optional() {
    let policy = compile(TenantSpec {
        runtime_classes: Some(DefaultAllowedListSpec {
            selector: Selector::from_iter(Some(("sandbox", "gvisor"))),
            ..Default::default()
        }),
        ..Default::default()
    });
    let catalog = |name: &str| {
        (name == "gvisor").then(|| CatalogEntry {
            labels: Labels::from_iter(Some(("sandbox", "gvisor"))),
            global_default: false,
        })
    };
    assert_eq!(policy.check_runtime_class(None, catalog), Ok(None));
    assert_eq!(policy.check_runtime_class(Some("gvisor"), catalog), Ok(None));
    assert!(matches!(
        policy.check_runtime_class(Some("kata"), catalog),
        Err(Violation::RuntimeClassForbidden { class, .. }) if class == "kata"
    ));
}

#[test]
fn hostnames_checked_per_host() {
    let policy = compile(TenantSpec {
        ingress_options: Some(IngressOptions {
            allowed_hostnames: Some(allowed(&["exact.example.com"], Some("^.*\\.solar\\.io$"))),
            ..Default::default()
        }),
        ..Default::default()
    });
    assert_eq!(
        policy.check_hostnames(["exact.example.com", "app.solar.io"]),
        Ok(())
    );
    assert!(matches!(
        policy.check_hostnames(["app.solar.io", "evil.example.com"]),
        Err(Violation::IngressHostnameForbidden { hostname, .. }) if hostname == "evil.example.com"
    ));
}

#[test]
fn service_types() {
    let policy = compile(TenantSpec {
        service_options: Some(ServiceOptions {
            allowed_services: Some(AllowedServices {
                node_port: Some(false),
                external_name: None,
                load_balancer: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    assert_eq!(policy.check_service_type(None), Ok(()));
    assert_eq!(policy.check_service_type(Some("ExternalName")), Ok(()));
    assert_eq!(
        policy.check_service_type(Some("NodePort")),
        Err(Violation::ServiceTypeForbidden {
            kind: "NodePort".to_string()
        })
    );
    assert!(policy.check_service_type(Some("LoadBalancer")).is_err());
}

#[test]
fn external_ips() {
    let policy = compile(TenantSpec {
        service_options: Some(ServiceOptions {
            external_ips: Some(ExternalIpsSpec {
                allowed: vec!["10.0.0.0/24".to_string(), "192.168.1.1".to_string()],
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    assert_eq!(policy.check_external_ips(&["10.0.0.7", "192.168.1.1"]), Ok(()));
    assert!(matches!(
        policy.check_external_ips(&["10.0.1.7"]),
        Err(Violation::ExternalIpForbidden { ip, .. }) if ip == "10.0.1.7"
    ));

    let deny_all = compile(TenantSpec {
        service_options: Some(ServiceOptions {
            external_ips: Some(ExternalIpsSpec::default()),
            ..Default::default()
        }),
        ..Default::default()
    });
    assert!(deny_all.check_external_ips(&["10.0.0.7"]).is_err());
    assert_eq!(deny_all.check_external_ips::<&str>(&[]), Ok(()));
}

#[test]
fn invalid_specs_are_configuration_errors() {
    let bad_regex = TenantSpec {
        container_registries: Some(allowed(&[], Some("("))),
        ..Default::default()
    };
    assert!(matches!(
        TenantPolicy::compile("solar", &bad_regex),
        Err(ConfigError::Regex {
            field: "containerRegistries",
            ..
        })
    ));

    let bad_cidr = TenantSpec {
        service_options: Some(ServiceOptions {
            external_ips: Some(ExternalIpsSpec {
                allowed: vec!["not-an-ip".to_string()],
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert!(matches!(
        TenantPolicy::compile("solar", &bad_cidr),
        Err(ConfigError::Cidr(_))
    ));

    let bad_owner = TenantSpec {
        owners: vec![OwnerSpec {
            kind: OwnerKind::ServiceAccount,
            name: "deployer".to_string(),
            cluster_roles: vec![],
        }],
        ..Default::default()
    };
    assert!(matches!(
        TenantPolicy::compile("solar", &bad_owner),
        Err(ConfigError::Owner(_))
    ));
}
