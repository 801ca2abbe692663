use super::{inject_metadata, set_field, Admission, Denied, Write};
use crate::{
    core::{cordon, Operation, Violation},
    index::tenants::TenantEntry,
    k8s::{self, Resource, ResourceExt, API_GROUP, TENANT_LABEL},
};
use serde_json::Value;

/// Binds new namespaces to a tenant and limits changes to tenant namespaces
/// to their owners.
pub(super) fn admit(
    admission: &Admission,
    write: &Write<'_>,
    object: Option<&mut Value>,
) -> Result<(), Denied> {
    match (write.op, object) {
        (Operation::Create, Some(object)) => create(admission, write, object),
        (Operation::Update | Operation::Delete, _) => modify(admission, write),
        _ => Ok(()),
    }
}

fn create(admission: &Admission, write: &Write<'_>, object: &mut Value) -> Result<(), Denied> {
    let tenants = admission.tenants.read();
    let requested = write
        .req
        .object
        .as_ref()
        .and_then(|ns| ns.labels().get(TENANT_LABEL).cloned());

    let (name, entry) = match requested {
        Some(name) => {
            let entry = tenants
                .tenant(&name)
                .ok_or_else(|| Violation::TenantNotFound {
                    tenant: name.clone(),
                })?;
            if !write.privileged && !write.requester.owns(&entry.tenant.spec.owners) {
                return Err(Violation::TenantNotOwned { tenant: name }.into());
            }
            (name, entry)
        }
        None => {
            let owned = tenants.owned_by(&write.requester);
            match owned.as_slice() {
                [] => return Ok(()),
                [name] => match tenants.tenant(name) {
                    Some(entry) => (name.clone(), entry),
                    None => return Ok(()),
                },
                _ => {
                    return Err(Violation::TenantLabelRequired {
                        tenants: owned.join(", "),
                    }
                    .into())
                }
            }
        }
    };

    if !write.privileged {
        cordon::check(&name, entry.tenant.spec.cordoned, write.op)?;
    }
    let policy = entry
        .policy
        .as_ref()
        .map_err(|reason| Violation::InvalidTenant {
            tenant: name.clone(),
            reason: reason.clone(),
        })?;
    if let Some(quota) = policy.namespace_quota {
        if tenants.namespaces_of(&name).len() >= quota as usize {
            return Err(Violation::NamespaceQuotaExceeded { tenant: name }.into());
        }
    }

    tracing::debug!(tenant = %name, "Binding namespace");
    if let Some(metadata) = policy.namespace_metadata.as_ref() {
        inject_metadata(object, metadata);
    }
    set_field(object, &["metadata", "labels", TENANT_LABEL], name.clone().into());
    set_owner(object, entry)?;
    Ok(())
}

/// Only owners may change or delete a tenant namespace. Requesters that own
/// no tenant at all (cluster components, such as the garbage collector) are
/// governed by RBAC alone.
fn modify(admission: &Admission, write: &Write<'_>) -> Result<(), Denied> {
    if write.privileged {
        return Ok(());
    }
    let tenants = admission.tenants.read();
    let ns = &write.req.name;
    let Some((name, entry)) = tenants
        .tenant_of(ns)
        .and_then(|t| tenants.tenant(t).map(|e| (t, e)))
    else {
        return Ok(());
    };

    cordon::check(name, entry.tenant.spec.cordoned, write.op)?;
    if !write.requester.owns(&entry.tenant.spec.owners)
        && !tenants.owned_by(&write.requester).is_empty()
    {
        return Err(Violation::NotTenantOwner {
            namespace: ns.clone(),
            tenant: name.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Makes the tenant the namespace's controller, replacing references to any
/// other tenant.
fn set_owner(object: &mut Value, entry: &TenantEntry) -> Result<(), Denied> {
    let Some(owner) = entry.tenant.controller_owner_ref(&()) else {
        return Ok(());
    };
    let owner = serde_json::to_value(owner).map_err(|source| Denied::Decode {
        kind: k8s::Tenant::kind(&()).to_string(),
        source,
    })?;

    let mut refs = object
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    refs.retain(|r| {
        let tenant = r.get("kind").and_then(Value::as_str) == Some("Tenant")
            && r
                .get("apiVersion")
                .and_then(Value::as_str)
                .is_some_and(|v| v.starts_with(API_GROUP));
        !tenant
    });
    refs.push(owner);
    set_field(object, &["metadata", "ownerReferences"], Value::Array(refs));
    Ok(())
}
