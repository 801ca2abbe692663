use super::{decode, object_name, set_field, Admission, AdmissionRequest, Denied, Write};
use crate::{
    core::TenantPolicy,
    index::{collision, CollisionIndex, Reservation, ResourceId},
    k8s::ingress::{AnyIngress, INGRESS_CLASS_ANNOTATION},
};
use serde_json::Value;

/// Ingresses are admitted in the `networking.k8s.io/v1` shape and in the
/// legacy `extensions/v1beta1` and `networking.k8s.io/v1beta1` shape.
pub(super) fn is_ingress(req: &AdmissionRequest) -> bool {
    req.kind.kind.eq_ignore_ascii_case("Ingress")
        && (req.kind.group.eq_ignore_ascii_case("networking.k8s.io")
            || req.kind.group.eq_ignore_ascii_case("extensions"))
}

/// Resolves the Ingress class, checks hostnames and reserves the Ingress's
/// hostname/path pairs.
pub(super) fn admit(
    admission: &Admission,
    policy: &TenantPolicy,
    write: &Write<'_>,
    object: &mut Value,
) -> Result<Reservation, Denied> {
    let req = write.req;
    let ingress = if req.kind.group == "networking.k8s.io" && req.kind.version == "v1" {
        AnyIngress::V1(decode("Ingress", object)?)
    } else {
        AnyIngress::Legacy(decode("Ingress", object)?)
    };

    let lookup = |name: &str| admission.catalog.read().ingress_class(name);
    if let Some(class) = policy.check_ingress_class(ingress.class_name(), lookup)? {
        tracing::debug!(%class, "Defaulting ingress class");
        set_class(object, class);
    }

    let hostnames = ingress.hostnames();
    policy.check_hostnames(hostnames.iter().map(String::as_str))?;

    let ns = req.namespace.clone().unwrap_or_default();
    let reservation = CollisionIndex::reserve(
        &admission.collisions,
        collision::Request {
            id: ResourceId::new(ns, object_name(req)),
            keys: ingress.host_paths(),
            scope: policy.collision_scope,
            tenant: &policy.name,
            generate_name: req
                .name
                .is_empty()
                .then(|| ingress.metadata().generate_name.clone())
                .flatten(),
        },
        |ns| admission.tenants.read().tenant_of(ns).map(str::to_string),
    )?;
    Ok(reservation)
}

/// Writes the class where the requester named it: the class annotation when
/// only it is set, `spec.ingressClassName` otherwise.
fn set_class(object: &mut Value, class: String) {
    let annotated = object
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
        .is_some();
    let in_spec = object
        .pointer("/spec/ingressClassName")
        .is_some_and(|c| !c.is_null());
    if annotated && !in_spec {
        set_field(
            object,
            &["metadata", "annotations", INGRESS_CLASS_ANNOTATION],
            class.into(),
        );
    } else {
        set_field(object, &["spec", "ingressClassName"], class.into());
    }
}
