use super::{parse_spec, Denied, Write};
use crate::{
    core::{custom_quota::CustomQuota, TenantPolicy, Violation},
    k8s::{ClusterCustomQuotaSpec, ResourceExt, TenantSpec},
};

/// Denies Tenants whose specification does not compile.
pub(super) fn tenant(write: &Write<'_>) -> Result<(), Denied> {
    if !write.is_upsert() {
        return Ok(());
    }
    let (obj, spec) = parse_spec::<TenantSpec>(write.req)?;
    let name = obj.name_any();
    TenantPolicy::compile(&name, &spec).map_err(|error| Violation::InvalidTenant {
        tenant: name,
        reason: error.to_string(),
    })?;
    Ok(())
}

/// Denies ClusterCustomQuotas whose path or limit is malformed.
pub(super) fn custom_quota(write: &Write<'_>) -> Result<(), Denied> {
    if !write.is_upsert() {
        return Ok(());
    }
    let (obj, spec) = parse_spec::<ClusterCustomQuotaSpec>(write.req)?;
    CustomQuota::compile(&obj.name_any(), &spec).map_err(|error| Denied::Invalid {
        kind: "ClusterCustomQuota".to_string(),
        reason: error.to_string(),
    })?;
    Ok(())
}
