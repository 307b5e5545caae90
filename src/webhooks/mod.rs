//! Validating admission webhook for Deployments.
//!
//! Every image a Deployment declares is scanned for critical vulnerabilities
//! and the request is denied when any are found, unless the workload opts
//! into the bypass.

mod engine;
mod outcome;
mod server;

pub use engine::{AdmissionEngine, AdmissionError, Verdict};
pub use outcome::{Decision, ImageScanResult, ValidationOutcome, decide};
pub use server::{WEBHOOK_PORT, WebhookError, create_webhook_router, run_webhook_server};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
