//! Resource generation module.
//!
//! Builds the exposure resources derived from a workload snapshot. Both take
//! the workload's name and namespace, which makes creation idempotent.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Service | Selects the workload's pods on port 80 |
//! | Ingress | Routes `/<workload>` on the shared host to the Service |

pub mod common;
pub mod ingress;
pub mod services;

pub use common::{HTTP_PORT, exposure_labels};
pub use ingress::generate_ingress;
pub use services::generate_service;
