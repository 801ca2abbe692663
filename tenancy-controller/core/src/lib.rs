#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod allowed_list;
pub mod cidr;
pub mod cordon;
pub mod custom_quota;
pub mod field_path;
pub mod node_metadata;
pub mod owner;
pub mod policy;
pub mod quantity;
pub mod registry;
mod violation;

pub use self::{
    cordon::Operation,
    owner::{Privileged, Requester},
    policy::{ConfigError, TenantPolicy},
    quantity::Quantity,
    violation::Violation,
};
pub use ipnet::IpNet;
pub use tenancy_controller_k8s_api::{self as k8s, labels, Labels};

/// The field manager used for every write the controller makes.
pub const FIELD_MANAGER: &str = "tenancy-controller";
