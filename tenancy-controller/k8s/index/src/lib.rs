//! Cluster state consulted by admission.
//!
//! Each index is fed by a watch and shared behind a lock:
//!
//! - [`tenants`] binds namespaces to tenants and holds each tenant's compiled
//!   policy.
//! - [`catalog`] holds the Ingress, Priority, Storage and Runtime classes
//!   tenants select from.
//! - [`collision`] registers the hostname/path pairs of every Ingress.
//! - [`custom_quota`] holds ClusterCustomQuotas; its [`Aggregator`] decides
//!   writes against them by rescanning their members.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod collision;
pub mod custom_quota;
pub mod metrics;
mod resource_id;
pub mod tenants;

#[cfg(test)]
mod tests;

pub use self::{
    catalog::{Catalog, SharedCatalog},
    collision::{CollisionIndex, Reservation},
    custom_quota::{AdmitError, Aggregator, KubeStore, QuotaError, QuotaIndex, QuotaStore},
    resource_id::ResourceId,
};
