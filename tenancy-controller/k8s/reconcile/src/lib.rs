//! The tenant reconciler.
//!
//! An [`Index`] observes Tenants, Namespaces and the objects derived from
//! them, and queues the affected tenant whenever one changes. The
//! [`Controller`] runs one worker per tenant, so tenants are reconciled in
//! parallel but a tenant is never reconciled concurrently with itself. Only
//! the holder of the write lease reconciles.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
mod controller;
pub mod desired;
mod index;
mod metrics;
pub mod status;


pub use self::{
    backoff::Backoff,
    controller::Controller,
    index::{Index, SharedIndex, Update},
    metrics::{ControllerMetrics, IndexMetrics},
};

use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("tenant {0} has no uid")]
    MissingUid(String),

    #[error("{failed} of {total} namespaces failed to reconcile")]
    Namespaces { failed: usize, total: usize },
}

impl Error {
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}
