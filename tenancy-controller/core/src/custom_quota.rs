use crate::{
    field_path::{FieldPath, FieldPathError},
    labels::Selector,
    quantity::{Quantity, QuantityError},
    Labels, Violation,
};
use tenancy_controller_k8s_api::custom_quota::{ClusterCustomQuotaSpec, CustomQuotaSource};

/// A ClusterCustomQuota, compiled for admission and aggregation.
#[derive(Clone, Debug)]
pub struct CustomQuota {
    pub name: String,
    pub limit: Quantity,
    pub source: CustomQuotaSource,
    pub path: FieldPath,
    selectors: Vec<Selector>,
    scope_selectors: Vec<Selector>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidQuota {
    #[error("spec.limit: {0}")]
    Limit(#[from] QuantityError),

    #[error("spec.limit must not be negative")]
    NegativeLimit,

    #[error("spec.source.path: {0}")]
    Path(#[from] FieldPathError),

    #[error("spec.source.kind must not be empty")]
    EmptyKind,

    #[error("spec.source.version must not be empty")]
    EmptyVersion,
}

/// Aggregated usage of a quota.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub used: Quantity,
    pub available: Quantity,
}

// === impl CustomQuota ===

impl CustomQuota {
    pub fn compile(name: &str, spec: &ClusterCustomQuotaSpec) -> Result<Self, InvalidQuota> {
        if spec.source.kind.is_empty() {
            return Err(InvalidQuota::EmptyKind);
        }
        if spec.source.version.is_empty() {
            return Err(InvalidQuota::EmptyVersion);
        }
        let limit = spec.limit.0.parse::<Quantity>()?;
        if limit.is_negative() {
            return Err(InvalidQuota::NegativeLimit);
        }
        Ok(Self {
            name: name.to_string(),
            limit,
            source: spec.source.clone(),
            path: spec.source.path.parse()?,
            selectors: spec.selectors.clone(),
            scope_selectors: spec.scope_selectors.clone(),
        })
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn scope_selectors(&self) -> &[Selector] {
        &self.scope_selectors
    }

    /// True when a namespace with these labels is a member.
    pub fn selects_namespace(&self, labels: &Labels) -> bool {
        self.selectors.iter().any(|s| s.matches(labels))
    }

    /// True when an object with these labels counts toward the quota.
    pub fn selects_object(&self, labels: &Labels) -> bool {
        self.scope_selectors.is_empty() || self.scope_selectors.iter().any(|s| s.matches(labels))
    }

    /// Extracts an object's contribution. A missing or negative field makes
    /// usage impossible to compute.
    pub fn contribution(&self, object: &serde_json::Value) -> Result<Quantity, Violation> {
        let unavailable = |reason: String| Violation::CustomQuotaUnavailable {
            quota: self.name.clone(),
            reason,
        };
        let value = self
            .path
            .extract(object)
            .map_err(|e| unavailable(e.to_string()))?;
        if value.is_negative() {
            return Err(unavailable(format!("{} is negative: {value}", self.path)));
        }
        Ok(value)
    }

    /// Decides whether a write changing total usage from `before` to `after`
    /// may proceed. Writes that do not increase usage are always allowed, so
    /// an over-limit quota can still be brought back under it.
    pub fn decide(&self, before: Quantity, after: Quantity) -> Result<(), Violation> {
        if after <= self.limit || after <= before {
            return Ok(());
        }
        Err(Violation::CustomQuotaExceeded {
            quota: self.name.clone(),
            used: after.to_string(),
            limit: self.limit.to_string(),
        })
    }

    pub fn usage(&self, used: Quantity) -> Usage {
        Usage {
            used,
            available: self.limit.saturating_sub(used),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;
    use tenancy_controller_k8s_api::Quantity as K8sQuantity;

    fn quota(limit: &str) -> CustomQuota {
        CustomQuota::compile(
            "replicas",
            &ClusterCustomQuotaSpec {
                limit: K8sQuantity(limit.to_string()),
                source: CustomQuotaSource {
                    version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    path: ".spec.replicas".to_string(),
                },
                selectors: vec![Selector::from_iter(Some(("team", "solar")))],
                scope_selectors: vec![],
            },
        )
        .expect("quota must compile")
    }

    #[test]
    fn allows_within_limit() {
        let q = quota("5");
        let u = Quantity::from_units;
        assert_eq!(q.decide(u(3), u(5)), Ok(()));
        assert!(matches!(
            q.decide(u(3), u(6)),
            Err(Violation::CustomQuotaExceeded { .. })
        ));
    }

    #[test]
    fn allows_decreases_over_limit() {
        let q = quota("5");
        let u = Quantity::from_units;
        assert_eq!(q.decide(u(8), u(7)), Ok(()));
        assert_eq!(q.decide(u(8), u(8)), Ok(()));
        assert!(q.decide(u(8), u(9)).is_err());
    }

    #[test]
    fn available_floors_at_zero() {
        let q = quota("5");
        assert_eq!(
            q.usage(Quantity::from_units(7)),
            Usage {
                used: Quantity::from_units(7),
                available: Quantity::ZERO,
            }
        );
    }

    #[test]
    fn missing_field_is_unavailable() {
        let q = quota("5");
        let obj = serde_json::json!({"spec": {}});
        assert!(matches!(
            q.contribution(&obj),
            Err(Violation::CustomQuotaUnavailable { .. })
        ));
    }

    #[test]
    fn negative_values_are_rejected() {
        let q = quota("5");
        assert_eq!(
            q.contribution(&serde_json::json!({"spec": {"replicas": -3}})),
            Err(Violation::CustomQuotaUnavailable {
                quota: "replicas".to_string(),
                reason: ".spec.replicas is negative: -3".to_string(),
            })
        );

        let spec = ClusterCustomQuotaSpec {
            limit: K8sQuantity("-1".to_string()),
            source: q.source.clone(),
            selectors: vec![],
            scope_selectors: vec![],
        };
        assert!(matches!(
            CustomQuota::compile("negative", &spec),
            Err(InvalidQuota::NegativeLimit)
        ));
    }

    #[test]
    fn empty_scope_selects_every_object() {
        let q = quota("5");
        assert!(q.selects_object(&Labels::default()));
        assert!(q.selects_namespace(&Labels::from_iter(Some(("team", "solar")))));
        assert!(!q.selects_namespace(&Labels::default()));
    }
}
