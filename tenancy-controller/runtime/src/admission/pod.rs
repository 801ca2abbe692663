use super::{decode, set_field, Denied};
use crate::{
    core::{Operation, TenantPolicy},
    index::SharedCatalog,
    k8s,
};
use serde_json::Value;

/// Checks every container's image registry and pull policy and resolves the
/// Pod's priority and runtime classes.
///
/// The classes of a Pod cannot change once it exists, so they are only
/// checked and defaulted on create.
pub(super) fn admit(
    policy: &TenantPolicy,
    catalog: &SharedCatalog,
    op: Operation,
    object: &mut Value,
) -> Result<(), Denied> {
    let pod = decode::<k8s::Pod>("Pod", object)?;
    let Some(spec) = pod.spec else {
        return Ok(());
    };

    let containers = spec
        .containers
        .iter()
        .map(|c| (&c.name, &c.image, &c.image_pull_policy))
        .chain(
            spec.init_containers
                .iter()
                .flatten()
                .map(|c| (&c.name, &c.image, &c.image_pull_policy)),
        )
        .chain(
            spec.ephemeral_containers
                .iter()
                .flatten()
                .map(|c| (&c.name, &c.image, &c.image_pull_policy)),
        );
    for (name, image, pull_policy) in containers {
        let Some(image) = image.as_deref() else {
            continue;
        };
        policy.check_image(image)?;
        policy.check_pull_policy(name, image, pull_policy.as_deref())?;
    }

    if op == Operation::Create {
        let requested = spec.priority_class_name.as_deref();
        let lookup = |name: &str| catalog.read().priority_class(name);
        if let Some(class) = policy.check_priority_class(requested, lookup)? {
            tracing::debug!(%class, "Defaulting priority class");
            set_field(object, &["spec", "priorityClassName"], class.into());
        }

        let requested = spec.runtime_class_name.as_deref();
        let lookup = |name: &str| catalog.read().runtime_class(name);
        if let Some(class) = policy.check_runtime_class(requested, lookup)? {
            tracing::debug!(%class, "Defaulting runtime class");
            set_field(object, &["spec", "runtimeClassName"], class.into());
        }
    }

    Ok(())
}
