pub use tenancy_controller_core as core;
pub use tenancy_controller_k8s_api as k8s;
pub use tenancy_controller_k8s_index as index;
pub use tenancy_controller_k8s_reconcile as reconcile;

mod admission;
mod args;
mod index_list;
mod metrics;

mod lease;
pub use self::{
    admission::{Admission, Config as AdmissionConfig, FailurePolicy},
    args::Args,
    metrics::AdmissionMetrics,
};
