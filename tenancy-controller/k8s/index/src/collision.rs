//! Hostname/path uniqueness across Ingresses.
//!
//! Keys come from two sources: Ingresses observed through the watch, which
//! are confirmed, and Ingresses admitted but not yet observed, which are
//! pending. A pending claim counts against other admissions until the watch
//! confirms it or it expires, so two concurrent creates of one key cannot
//! both be admitted.
//!
//! Objects created with `generateName` are not named at admission, so their
//! pending claim is held under a provisional id. The watch releases it when
//! it observes an object generated from the same prefix with the same keys.

use crate::ResourceId;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use tenancy_controller_core::Violation;
use tenancy_controller_k8s_api::{
    self as k8s,
    ingress::{AnyIngress, HostPath},
    tenant::HostnameCollisionScope,
    ResourceExt,
};
use tokio::time::{Duration, Instant};

pub type SharedIndex = Arc<RwLock<CollisionIndex>>;

#[derive(Debug)]
pub struct CollisionIndex {
    claims: HashMap<ResourceId, Claim>,
    by_key: HashMap<HostPath, HashSet<ResourceId>>,
    pending_ttl: Duration,
    next_token: u64,

    /// Set once the Ingress watch has listed.
    synced: bool,
}

/// A check-and-reserve request for one Ingress.
#[derive(Clone, Debug)]
pub struct Request<'t> {
    pub id: ResourceId,
    pub keys: BTreeSet<HostPath>,
    pub scope: HostnameCollisionScope,
    pub tenant: &'t str,

    /// The `generateName` prefix of an object that is not named yet.
    pub generate_name: Option<String>,
}

/// Keys reserved by an admission. Dropping an uncommitted reservation rolls
/// it back.
#[must_use]
#[derive(Debug)]
pub struct Reservation {
    index: SharedIndex,
    id: ResourceId,
    token: u64,
    committed: bool,
}

#[derive(Debug, Default)]
struct Claim {
    confirmed: BTreeSet<HostPath>,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    keys: BTreeSet<HostPath>,
    since: Instant,
    token: u64,
    generate_name: Option<String>,
}

// === impl CollisionIndex ===

impl CollisionIndex {
    pub fn shared(pending_ttl: Duration) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            claims: HashMap::default(),
            by_key: HashMap::default(),
            pending_ttl,
            next_token: 0,
            synced: false,
        }))
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Checks a request against every live claim and, when there is no
    /// conflict, reserves its keys. Both happen under the index's write lock.
    ///
    /// `tenant_of` resolves the tenant owning a namespace.
    pub fn reserve(
        index: &SharedIndex,
        req: Request<'_>,
        tenant_of: impl Fn(&str) -> Option<String>,
    ) -> Result<Reservation, Violation> {
        let mut idx = index.write();
        let now = Instant::now();
        for key in &req.keys {
            idx.purge_expired(key, now);
        }

        if req.scope != HostnameCollisionScope::Disabled {
            for key in &req.keys {
                let mut holders = idx
                    .by_key
                    .get(key)
                    .into_iter()
                    .flatten()
                    .filter(|id| **id != req.id && idx.claims.contains_key(*id))
                    .collect::<Vec<_>>();
                holders.sort();

                let conflict = holders.into_iter().find(|other| match req.scope {
                    HostnameCollisionScope::Cluster => true,
                    HostnameCollisionScope::Namespace => other.namespace == req.id.namespace,
                    HostnameCollisionScope::Tenant => {
                        tenant_of(&other.namespace).as_deref() == Some(req.tenant)
                    }
                    HostnameCollisionScope::Disabled => false,
                });
                if let Some(other) = conflict {
                    return Err(Violation::IngressHostnameCollision {
                        hostname: key.host.clone(),
                        path: key.path.clone(),
                        scope: req.scope.to_string(),
                        existing: other.to_string(),
                    });
                }
            }
        }

        let token = idx.next_token;
        idx.next_token += 1;
        let pending = Pending {
            keys: req.keys,
            since: now,
            token,
            generate_name: req.generate_name,
        };
        idx.update(&req.id, |claim| claim.pending = Some(pending));
        drop(idx);

        Ok(Reservation {
            index: index.clone(),
            id: req.id,
            token,
            committed: false,
        })
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// The live holders of a key.
    pub fn holders(&self, key: &HostPath) -> Vec<ResourceId> {
        let now = Instant::now();
        let mut ids = self
            .by_key
            .get(key)
            .into_iter()
            .flatten()
            .filter(|id| {
                self.claims
                    .get(*id)
                    .is_some_and(|c| c.holds(key, now, self.pending_ttl))
            })
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn update(&mut self, id: &ResourceId, f: impl FnOnce(&mut Claim)) {
        let claim = self.claims.entry(id.clone()).or_default();
        let before = claim.keys();
        f(claim);
        let after = claim.keys();
        if claim.confirmed.is_empty() && claim.pending.is_none() {
            self.claims.remove(id);
        }

        for key in before.difference(&after) {
            if let Some(ids) = self.by_key.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        for key in after.difference(&before) {
            self.by_key
                .entry(key.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    /// Drops the expired pending claims on a key.
    fn purge_expired(&mut self, key: &HostPath, now: Instant) {
        let ttl = self.pending_ttl;
        let expired = self
            .by_key
            .get(key)
            .into_iter()
            .flatten()
            .filter(|id| {
                self.claims
                    .get(*id)
                    .and_then(|c| c.pending.as_ref())
                    .is_some_and(|p| p.is_expired(now, ttl))
            })
            .cloned()
            .collect::<Vec<_>>();
        for id in expired {
            self.update(&id, |claim| claim.pending = None);
        }
    }

    /// Releases the provisional claims of a generated object once the watch
    /// observes it under its real name.
    fn release_generated(&mut self, id: &ResourceId, prefix: &str, keys: &BTreeSet<HostPath>) {
        let Some(first) = keys.iter().next() else {
            return;
        };
        let provisional = self
            .by_key
            .get(first)
            .into_iter()
            .flatten()
            .filter(|other| *other != id && other.namespace == id.namespace)
            .filter(|other| {
                self.claims
                    .get(*other)
                    .and_then(|c| c.pending.as_ref())
                    .is_some_and(|p| p.generate_name.as_deref() == Some(prefix) && p.keys == *keys)
            })
            .cloned()
            .collect::<Vec<_>>();
        for other in provisional {
            tracing::debug!(%id, provisional = %other, "Released generated claim");
            self.update(&other, |claim| claim.pending = None);
        }
    }

    fn remove(&mut self, id: &ResourceId) {
        self.update(id, |claim| *claim = Claim::default());
    }

    fn rollback(&mut self, id: &ResourceId, token: u64) {
        self.update(id, |claim| {
            if claim.pending.as_ref().is_some_and(|p| p.token == token) {
                claim.pending = None;
            }
        });
    }
}

impl IndexNamespacedResource<k8s::Ingress> for CollisionIndex {
    fn apply(&mut self, ingress: k8s::Ingress) {
        let Some(namespace) = ingress.namespace() else {
            return;
        };
        let id = ResourceId::new(namespace, ingress.name_unchecked());
        let generate_name = ingress.metadata.generate_name.clone();
        let keys = AnyIngress::V1(ingress).host_paths();

        let now = Instant::now();
        for key in &keys {
            self.purge_expired(key, now);
        }
        if let Some(prefix) = generate_name.as_deref().filter(|p| !p.is_empty()) {
            self.release_generated(&id, prefix, &keys);
        }

        self.update(&id, |claim| {
            // A pending claim for a newer admission stays until it is
            // observed or expires.
            if claim.pending.as_ref().is_some_and(|p| p.keys == keys) {
                claim.pending = None;
            }
            claim.confirmed = keys;
        });
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(&ResourceId::new(namespace, name));
    }

    fn reset(&mut self, ingresses: Vec<k8s::Ingress>, removed: NamespacedRemoved) {
        // Claims for objects that were never persisted are dropped along
        // with removed objects.
        let live = ingresses
            .iter()
            .filter_map(|i| Some(ResourceId::new(i.namespace()?, i.name_unchecked())))
            .collect::<HashSet<_>>();
        let stale = self
            .claims
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect::<Vec<_>>();
        for id in stale {
            self.remove(&id);
        }
        for (namespace, names) in removed {
            for name in names {
                self.remove(&ResourceId::new(namespace.clone(), name));
            }
        }
        for ingress in ingresses {
            IndexNamespacedResource::apply(self, ingress);
        }
        self.synced = true;
    }
}

// === impl Claim ===

impl Claim {
    fn keys(&self) -> BTreeSet<HostPath> {
        let mut keys = self.confirmed.clone();
        if let Some(p) = &self.pending {
            keys.extend(p.keys.iter().cloned());
        }
        keys
    }

    fn holds(&self, key: &HostPath, now: Instant, ttl: Duration) -> bool {
        self.confirmed.contains(key)
            || self
                .pending
                .as_ref()
                .is_some_and(|p| !p.is_expired(now, ttl) && p.keys.contains(key))
    }
}

// === impl Pending ===

impl Pending {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.since) >= ttl
    }
}

// === impl Reservation ===

impl Reservation {
    /// Keeps the reserved keys until the watch observes the object or the
    /// reservation expires.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.index.write().rollback(&self.id, self.token);
        }
    }
}
