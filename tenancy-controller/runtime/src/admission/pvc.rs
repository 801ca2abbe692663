use super::{decode, set_field, Denied};
use crate::{core::TenantPolicy, index::SharedCatalog, k8s};
use serde_json::Value;

/// Resolves a PersistentVolumeClaim's storage class on create. The class of a
/// bound claim cannot change, so updates are not checked.
pub(super) fn admit(
    policy: &TenantPolicy,
    catalog: &SharedCatalog,
    object: &mut Value,
) -> Result<(), Denied> {
    let pvc = decode::<k8s::PersistentVolumeClaim>("PersistentVolumeClaim", object)?;
    let requested = pvc
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref());

    let lookup = |name: &str| catalog.read().storage_class(name);
    if let Some(class) = policy.check_storage_class(requested, lookup)? {
        tracing::debug!(%class, "Defaulting storage class");
        set_field(object, &["spec", "storageClassName"], class.into());
    }
    Ok(())
}
