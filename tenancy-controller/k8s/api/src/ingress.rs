use k8s_openapi::api::networking::v1 as networkingv1;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// The `extensions/v1beta1` and `networking.k8s.io/v1beta1` Ingress shape.
///
/// Only the fields consulted by admission are modeled.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyIngress {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LegacyIngressSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyIngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<LegacyBackend>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<LegacyIngressRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyIngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<LegacyHttpIngressRuleValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LegacyHttpIngressRuleValue {
    #[serde(default)]
    pub paths: Vec<LegacyHttpIngressPath>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LegacyHttpIngressPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub backend: LegacyBackend,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<serde_json::Value>,
}

/// A hostname and path pair exposed by an Ingress rule.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostPath {
    pub host: String,
    pub path: String,
}

/// Either supported Ingress shape.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyIngress {
    V1(networkingv1::Ingress),
    Legacy(LegacyIngress),
}

// === impl AnyIngress ===

impl AnyIngress {
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::V1(ing) => &ing.metadata,
            Self::Legacy(ing) => &ing.metadata,
        }
    }

    /// The requested class: `spec.ingressClassName`, falling back to the
    /// `kubernetes.io/ingress.class` annotation.
    pub fn class_name(&self) -> Option<&str> {
        let spec = match self {
            Self::V1(ing) => ing.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref()),
            Self::Legacy(ing) => ing.spec.ingress_class_name.as_deref(),
        };
        spec.or_else(|| {
            self.metadata()
                .annotations
                .as_ref()
                .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
                .map(String::as_str)
        })
        .filter(|c| !c.is_empty())
    }

    /// Every non-empty hostname named by a rule.
    pub fn hostnames(&self) -> BTreeSet<String> {
        self.host_paths().into_iter().map(|hp| hp.host).collect()
    }

    /// Every (host, path) pair. Rules without an explicit path expose `/`.
    pub fn host_paths(&self) -> BTreeSet<HostPath> {
        let mut pairs = BTreeSet::new();
        let mut push = |host: Option<&str>, path: Option<&str>| {
            if let Some(host) = host.filter(|h| !h.is_empty()) {
                let path = path.filter(|p| !p.is_empty()).unwrap_or("/");
                pairs.insert(HostPath {
                    host: host.to_string(),
                    path: path.to_string(),
                });
            }
        };

        match self {
            Self::V1(ing) => {
                for rule in ing.spec.iter().flat_map(|s| s.rules.iter().flatten()) {
                    let paths = rule.http.as_ref().map(|h| h.paths.as_slice()).unwrap_or_default();
                    if paths.is_empty() {
                        push(rule.host.as_deref(), None);
                    }
                    for p in paths {
                        push(rule.host.as_deref(), p.path.as_deref());
                    }
                }
            }
            Self::Legacy(ing) => {
                for rule in &ing.spec.rules {
                    let paths = rule.http.as_ref().map(|h| h.paths.as_slice()).unwrap_or_default();
                    if paths.is_empty() {
                        push(rule.host.as_deref(), None);
                    }
                    for p in paths {
                        push(rule.host.as_deref(), p.path.as_deref());
                    }
                }
            }
        }

        pairs
    }
}

impl std::fmt::Display for HostPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}
