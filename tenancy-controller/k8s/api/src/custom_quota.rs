use crate::labels::Selector;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Limits the sum of a numeric field across objects of one kind in a set of
/// namespaces.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "capsule.clastix.io",
    version = "v1beta2",
    kind = "ClusterCustomQuota",
    status = "CustomQuotaStatus",
    printcolumn = r#"{"name":"Used","type":"string","jsonPath":".status.used"}"#,
    printcolumn = r#"{"name":"Limit","type":"string","jsonPath":".spec.limit"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCustomQuotaSpec {
    pub limit: Quantity,

    pub source: CustomQuotaSource,

    /// Namespaces matching any of these selectors are members.
    #[serde(default)]
    pub selectors: Vec<Selector>,

    /// Objects matching any of these selectors count toward the quota. When
    /// empty, every object of the source kind counts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope_selectors: Vec<Selector>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomQuotaSource {
    /// The API version of the counted kind, e.g. `v1` or `apps/v1`.
    pub version: String,
    pub kind: String,
    /// Field path of the counted value, e.g. `.spec.replicas`.
    pub path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomQuotaStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Quantity>,
    /// Counted objects, as `<namespace>.<name>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<String>,
}

impl CustomQuotaSource {
    /// Splits the API version into its group and version.
    pub fn group_version(&self) -> (&str, &str) {
        match self.version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.version.as_str()),
        }
    }

    pub fn targets(&self, group: &str, kind: &str) -> bool {
        let (g, _) = self.group_version();
        g.eq_ignore_ascii_case(group) && self.kind.eq_ignore_ascii_case(kind)
    }
}
