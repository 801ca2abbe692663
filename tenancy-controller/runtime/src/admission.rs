//! The admission webhook.
//!
//! Every write is decoded, bound to the tenant that owns its namespace,
//! checked against the cordon gate and the tenant's policy, registered in
//! the collision index and decided against custom quotas, in that order.
//! Mutations are returned as a JSON patch against the submitted object.

use crate::{
    core::{cordon, node_metadata::NodeMetadataGuard, Operation, Privileged, Requester, Violation},
    index::{collision, tenants, AdmitError, Aggregator, Reservation, ResourceId, SharedCatalog},
    k8s::{self, DynamicObject, ResourceExt, TENANT_LABEL},
    metrics::AdmissionMetrics,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{core::admission, Resource};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::time::{self, Duration};
use tracing::{debug, info, trace, warn};

mod ingress;
mod namespace;
mod node;
mod pod;
mod pvc;
mod service;
mod validate;


#[derive(Clone)]
pub struct Admission {
    tenants: tenants::SharedIndex,
    catalog: SharedCatalog,
    collisions: collision::SharedIndex,
    quotas: Aggregator,
    config: Arc<Config>,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Requesters exempt from the cordon gate, namespace ownership and the
    /// reconciler-owned object guard.
    pub privileged: Privileged,
    pub nodes: NodeMetadataGuard,

    /// The deadline of each decision.
    pub timeout: Duration,
    pub failure_policy: FailurePolicy,
}

/// How writes are decided when a decision cannot be reached.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Closed,
    Open,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a write was denied.
#[derive(Debug, Error)]
enum Denied {
    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: String, reason: String },

    #[error("the tenancy indexes have not synced yet")]
    NotSynced,

    #[error(transparent)]
    QuotaUnavailable(AdmitError),

    #[error("admission timed out after {0:?}")]
    Timeout(Duration),
}

/// An allowed write, possibly mutated.
#[derive(Debug, Default)]
struct Allowed {
    patch: Option<json_patch::Patch>,
}

/// A write under admission.
struct Write<'r> {
    req: &'r AdmissionRequest,
    op: Operation,
    requester: Requester,
    privileged: bool,
}

type Review = admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = admission::AdmissionResponse;
type AdmissionReview = admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        tenants: tenants::SharedIndex,
        catalog: SharedCatalog,
        collisions: collision::SharedIndex,
        quotas: Aggregator,
        config: Config,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            tenants,
            catalog,
            collisions,
            quotas,
            config: Arc::new(config),
            metrics,
        }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let started = time::Instant::now();
        let kind = req.kind.kind.clone();
        let ns = req.namespace.clone().unwrap_or_default();
        let name = req.name.clone();

        // Dropping the decision on timeout rolls back its reservations.
        let decision = time::timeout(self.config.timeout, self.decide(&req))
            .await
            .unwrap_or(Err(Denied::Timeout(self.config.timeout)));

        let rsp = AdmissionResponse::from(&req);
        match decision {
            Ok(Allowed { patch: None }) => {
                self.metrics.allowed(&kind, started);
                rsp
            }

            Ok(Allowed { patch: Some(patch) }) => {
                debug!(%ns, %name, %kind, ?patch, "Mutated");
                match rsp.with_patch(patch) {
                    Ok(rsp) => {
                        self.metrics.mutated(&kind, started);
                        rsp
                    }
                    Err(error) => {
                        warn!(%error, %ns, %name, %kind, "Failed to encode patch");
                        self.metrics.denied(&kind, "patch", started);
                        AdmissionResponse::from(&req).deny(error)
                    }
                }
            }

            Err(error) if error.is_unavailable() => {
                self.metrics.fallback(&kind, self.config.failure_policy);
                match self.config.failure_policy {
                    FailurePolicy::Open => {
                        warn!(%error, %ns, %name, %kind, "Allowed by failure policy");
                        self.metrics.allowed(&kind, started);
                        let mut rsp = rsp;
                        rsp.warnings = Some(vec![format!("{error}: allowed by failure policy")]);
                        rsp
                    }
                    FailurePolicy::Closed => {
                        warn!(%error, %ns, %name, %kind, "Denied by failure policy");
                        self.metrics.denied(&kind, error.dimension(), started);
                        rsp.deny(error)
                    }
                }
            }

            Err(error) => {
                info!(%error, %ns, %name, %kind, "Denied");
                self.metrics.denied(&kind, error.dimension(), started);
                rsp.deny(error)
            }
        }
    }

    /// Decides a write.
    ///
    /// Subresource writes (status, scale, exec, ...) are not decided. A
    /// `scale` write thus changes `.spec.replicas` without a custom quota
    /// check: its Scale object does not name the parent kind that quotas
    /// select on. The next quota refresh reports the resulting usage, and
    /// later writes to the parent cannot grow it further.
    async fn decide(&self, req: &AdmissionRequest) -> Result<Allowed, Denied> {
        if req.sub_resource.is_some() {
            return Ok(Allowed::default());
        }

        let requester = Requester::new(
            req.user_info.username.clone().unwrap_or_default(),
            req.user_info.groups.clone().unwrap_or_default(),
        );
        let write = Write {
            req,
            op: operation(&req.operation),
            privileged: self.config.privileged.contains(&requester),
            requester,
        };

        if is_kind::<k8s::Tenant>(req) {
            validate::tenant(&write)?;
            return Ok(Allowed::default());
        }

        if is_kind::<k8s::ClusterCustomQuota>(req) {
            validate::custom_quota(&write)?;
            return Ok(Allowed::default());
        }

        if is_kind::<k8s::Node>(req) {
            node::admit(&self.config.nodes, &write)?;
            return Ok(Allowed::default());
        }

        if !self.is_synced() {
            return Err(Denied::NotSynced);
        }

        let original = req
            .object
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|source| Denied::Decode {
                kind: req.kind.kind.clone(),
                source,
            })?;
        let mut object = original.clone();

        let reservation = if is_kind::<k8s::Namespace>(req) {
            namespace::admit(self, &write, object.as_mut())?;
            None
        } else {
            self.admit_namespaced(&write, object.as_mut())?
        };

        if let (true, Some(ns)) = (write.op.is_mutating(), req.namespace.as_deref()) {
            let quota_write = crate::index::custom_quota::Write {
                group: &req.kind.group,
                kind: &req.kind.kind,
                id: ResourceId::new(ns, object_name(req)),
                object: object.as_ref(),
                dry_run: req.dry_run,
            };
            self.quotas.admit(&quota_write).await?;
        }

        // Reservations of dry runs are dropped, which rolls them back.
        if let Some(reservation) = reservation.filter(|_| !req.dry_run) {
            reservation.commit();
        }

        let patch = match (&original, &object) {
            (Some(original), Some(mutated)) => {
                Some(json_patch::diff(original, mutated)).filter(|p| !p.0.is_empty())
            }
            _ => None,
        };
        Ok(Allowed { patch })
    }

    /// True once every index consulted for tenant writes has listed.
    fn is_synced(&self) -> bool {
        self.tenants.read().is_synced()
            && self.catalog.read().is_synced()
            && self.collisions.read().is_synced()
    }

    /// Admits a write to a namespaced object, returning the collision
    /// reservation to commit once the write is allowed.
    fn admit_namespaced(
        &self,
        write: &Write<'_>,
        object: Option<&mut Value>,
    ) -> Result<Option<Reservation>, Denied> {
        let req = write.req;
        let Some(ns) = req.namespace.as_deref() else {
            return Ok(None);
        };

        check_reconciler_owned(write)?;

        let entry = {
            let tenants = self.tenants.read();
            let Some(tenant) = tenants.tenant_of(ns) else {
                return Ok(None);
            };
            match tenants.tenant(tenant) {
                Some(entry) => entry.clone(),
                // Deletes proceed so that the namespace can be torn down.
                None if write.privileged || !write.is_upsert() => return Ok(None),
                None => {
                    return Err(Violation::TenantNotFound {
                        tenant: tenant.to_string(),
                    }
                    .into())
                }
            }
        };
        let tenant = entry.tenant.name_unchecked();

        if !write.privileged {
            cordon::check(&tenant, entry.tenant.spec.cordoned, write.op)?;
        }

        let Some(object) = object.filter(|_| write.is_upsert()) else {
            return Ok(None);
        };
        let policy = entry
            .policy
            .map_err(|reason| Violation::InvalidTenant { tenant, reason })?;

        if is_kind::<k8s::Pod>(req) {
            pod::admit(&policy, &self.catalog, write.op, object)?;
        } else if is_kind::<k8s::PersistentVolumeClaim>(req) {
            if write.op == Operation::Create {
                pvc::admit(&policy, &self.catalog, object)?;
            }
        } else if is_kind::<k8s::Service>(req) {
            service::admit(&policy, object)?;
        } else if is_kind::<k8s::Endpoints>(req) || is_kind::<k8s::EndpointSlice>(req) {
            service::apply_metadata(&policy, object);
        } else if ingress::is_ingress(req) {
            return ingress::admit(self, &policy, write, object).map(Some);
        }
        Ok(None)
    }
}

/// Derived objects are written by the reconciler only.
fn check_reconciler_owned(write: &Write<'_>) -> Result<(), Violation> {
    let req = write.req;
    let guarded = is_kind::<k8s::ResourceQuota>(req)
        || is_kind::<k8s::LimitRange>(req)
        || is_kind::<k8s::NetworkPolicy>(req)
        || is_kind::<k8s::RoleBinding>(req);
    if write.privileged || !guarded {
        return Ok(());
    }

    let tenant = [req.object.as_ref(), req.old_object.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|obj| obj.labels().get(TENANT_LABEL).cloned());
    match tenant {
        Some(tenant) => Err(Violation::ReconcilerOwned {
            kind: req.kind.kind.clone(),
            name: req.name.clone(),
            tenant,
        }),
        None => Ok(()),
    }
}

// === impl Write ===

impl Write<'_> {
    fn is_upsert(&self) -> bool {
        matches!(self.op, Operation::Create | Operation::Update)
    }
}

// === impl Denied ===

impl Denied {
    /// Denials that reflect the controller's state rather than the write.
    fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NotSynced | Self::QuotaUnavailable(_) | Self::Timeout(_)
        )
    }

    fn dimension(&self) -> &'static str {
        match self {
            Self::Violation(v) => v.dimension(),
            Self::Decode { .. } => "decode",
            Self::Invalid { .. } => "configuration",
            Self::NotSynced => "not_synced",
            Self::QuotaUnavailable(_) => "custom_quota",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<AdmitError> for Denied {
    fn from(error: AdmitError) -> Self {
        match error {
            AdmitError::Violation(violation) => Self::Violation(violation),
            error => Self::QuotaUnavailable(error),
        }
    }
}

// === impl FailurePolicy ===

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            s => anyhow::bail!("invalid failure policy: {s} (expected closed or open)"),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => "closed".fmt(f),
            Self::Open => "open".fmt(f),
        }
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn operation(op: &admission::Operation) -> Operation {
    match op {
        admission::Operation::Create => Operation::Create,
        admission::Operation::Update => Operation::Update,
        admission::Operation::Delete => Operation::Delete,
        admission::Operation::Connect => Operation::Connect,
    }
}

/// The name of the object under admission. Objects created with a generated
/// name are not named yet, so they are identified by the request.
fn object_name(req: &AdmissionRequest) -> String {
    if !req.name.is_empty() {
        return req.name.clone();
    }
    let prefix = req
        .object
        .as_ref()
        .and_then(|o| o.metadata.generate_name.as_deref())
        .unwrap_or_default();
    format!("{prefix}{}", req.uid)
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: &AdmissionRequest) -> Result<(&DynamicObject, T), Denied> {
    let kind = &req.kind.kind;
    let invalid = |reason: &str| Denied::Invalid {
        kind: kind.clone(),
        reason: reason.to_string(),
    };
    let obj = req
        .object
        .as_ref()
        .ok_or_else(|| invalid("admission request missing 'object'"))?;
    let data = obj
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| invalid("admission request missing 'spec'"))?;
    let spec = serde_json::from_value(data).map_err(|source| Denied::Decode {
        kind: kind.clone(),
        source,
    })?;
    Ok((obj, spec))
}

fn decode<T: DeserializeOwned>(kind: &str, object: &Value) -> Result<T, Denied> {
    serde_json::from_value(object.clone()).map_err(|source| Denied::Decode {
        kind: kind.to_string(),
        source,
    })
}

/// Sets a nested field, creating intermediate objects. Intermediate values
/// that are not objects are replaced.
fn set_field(object: &mut Value, path: &[&str], value: Value) {
    let Some((key, rest)) = path.split_first() else {
        *object = value;
        return;
    };
    if !object.is_object() {
        *object = Value::Object(Default::default());
    }
    if let Value::Object(map) = object {
        let child = map.entry(key.to_string()).or_insert(Value::Null);
        set_field(child, rest, value);
    }
}

/// Sets labels and annotations, overriding values set by the requester.
fn inject_metadata(object: &mut Value, metadata: &k8s::tenant::AdditionalMetadata) {
    for (key, value) in &metadata.labels {
        set_field(object, &["metadata", "labels", key], value.clone().into());
    }
    for (key, value) in &metadata.annotations {
        set_field(object, &["metadata", "annotations", key], value.clone().into());
    }
}
