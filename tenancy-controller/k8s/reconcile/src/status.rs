use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use tenancy_controller_k8s_api::{
    tenant::{Condition, NamespaceStatus, TenantState},
    Tenant, TenantStatus,
};

pub const READY: &str = "Ready";

pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_FAILED: &str = "ReconcileFailed";
pub const REASON_PENDING: &str = "Pending";

/// The outcome of reconciling one namespace. Namespaces that were not
/// reconciled in a pass are absent.
pub type Outcomes = BTreeMap<String, Result<(), String>>;

/// Rebuilds a tenant's status from live membership and the outcome of a
/// reconcile pass.
///
/// Transition times are carried over from the previous status while a
/// condition's status is unchanged, so an unchanged tenant yields an equal
/// status.
pub fn tenant_status(
    tenant: &Tenant,
    namespaces: &[String],
    spec_error: Option<&str>,
    outcomes: &Outcomes,
    now: DateTime<Utc>,
) -> TenantStatus {
    let previous = tenant.status.as_ref();
    let mut namespaces = namespaces.to_vec();
    namespaces.sort();
    namespaces.dedup();

    let ready = match spec_error {
        Some(error) => condition(READY, false, REASON_INVALID_SPEC, error),
        None => {
            let failed = outcomes
                .iter()
                .filter_map(|(ns, res)| res.as_ref().err().map(|e| format!("{ns}: {e}")))
                .collect::<Vec<_>>();
            if failed.is_empty() {
                condition(READY, true, REASON_RECONCILED, "")
            } else {
                condition(READY, false, REASON_FAILED, &failed.join("; "))
            }
        }
    };
    let conditions = vec![stamp(
        ready,
        previous.map(|s| s.conditions.as_slice()).unwrap_or_default(),
        now,
    )];

    let spaces = namespaces
        .iter()
        .map(|ns| {
            let prior = previous
                .and_then(|s| s.spaces.iter().find(|space| space.name == *ns))
                .map(|space| space.conditions.as_slice())
                .unwrap_or_default();
            let ready = match outcomes.get(ns) {
                Some(Ok(())) => condition(READY, true, REASON_RECONCILED, ""),
                Some(Err(error)) => condition(READY, false, REASON_FAILED, error),
                None => match prior.iter().find(|c| c.type_ == READY) {
                    Some(c) => c.clone(),
                    None => Condition {
                        type_: READY.to_string(),
                        status: "Unknown".to_string(),
                        reason: REASON_PENDING.to_string(),
                        message: String::new(),
                        last_transition_time: None,
                    },
                },
            };
            NamespaceStatus {
                name: ns.clone(),
                conditions: vec![stamp(ready, prior, now)],
            }
        })
        .collect();

    TenantStatus {
        size: namespaces.len() as u32,
        state: if tenant.spec.cordoned {
            TenantState::Cordoned
        } else {
            TenantState::Active
        },
        namespaces,
        conditions,
        spaces,
    }
}

fn condition(type_: &str, ok: bool, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: None,
    }
}

fn stamp(mut condition: Condition, previous: &[Condition], now: DateTime<Utc>) -> Condition {
    if condition.last_transition_time.is_some() {
        return condition;
    }
    condition.last_transition_time = previous
        .iter()
        .find(|c| c.type_ == condition.type_ && c.status == condition.status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)));
    condition
}
