use super::{decode, inject_metadata, Denied};
use crate::{core::TenantPolicy, k8s};
use serde_json::Value;

/// Checks a Service's type, external IPs and load balancer source ranges,
/// then applies the tenant's service metadata.
pub(super) fn admit(policy: &TenantPolicy, object: &mut Value) -> Result<(), Denied> {
    let svc = decode::<k8s::Service>("Service", object)?;
    if let Some(spec) = svc.spec.as_ref() {
        policy.check_service_type(spec.type_.as_deref().filter(|t| !t.is_empty()))?;
        policy.check_external_ips(spec.external_ips.as_deref().unwrap_or_default())?;
        policy.check_external_ips(
            spec.load_balancer_source_ranges
                .as_deref()
                .unwrap_or_default(),
        )?;
    }
    apply_metadata(policy, object);
    Ok(())
}

/// Applies the tenant's service metadata to Services, Endpoints and
/// EndpointSlices.
pub(super) fn apply_metadata(policy: &TenantPolicy, object: &mut Value) {
    if let Some(metadata) = policy.service_metadata.as_ref() {
        inject_metadata(object, metadata);
    }
}
