//! Workload identity, snapshots and policy flags.
//!
//! A [`WorkloadSnapshot`] is rebuilt from a `Deployment` every time a queue
//! item is processed or an admission request arrives. Nothing in this module
//! is persisted.

mod policy;
mod snapshot;

pub use policy::{BYPASS_CVE_DENIAL_ENV, NO_AUTO_EXPOSURE_ENV, PolicyFlags, is_enabled_value};
pub use snapshot::{ContainerImage, ContainerKind, WorkloadRef, WorkloadSnapshot};
