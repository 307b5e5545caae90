//! Admission decision engine.
//!
//! Decodes the Deployment under review, scans each declared image in order,
//! and folds the per-image results into an allow or deny verdict. A scan that
//! fails is logged and left out of the results, so scanner outages never
//! block admission.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::health::{HealthState, ScanResultLabel};
use crate::scanner::ImageScanner;
use crate::webhooks::outcome::{ImageScanResult, ValidationOutcome};
use crate::workload::WorkloadSnapshot;

/// Errors that make an admission request unanswerable
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The review carried no request
    #[error("invalid AdmissionReview: {0}")]
    InvalidReview(String),

    /// The request carried no object to inspect
    #[error("admission request has no object")]
    MissingObject,

    /// The object under review is not a Deployment
    #[error("expected a Deployment, got {0}")]
    UnsupportedKind(String),

    /// The object could not be decoded as a Deployment
    #[error("failed to decode Deployment: {0}")]
    Decode(String),

    /// The outcome could not be serialized into the response
    #[error("failed to serialize validation outcome: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The engine's answer to one admission request.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub uid: String,
    pub allowed: bool,
    /// Indented JSON of the outcome, when images were evaluated.
    pub message: Option<String>,
    pub outcome: Option<ValidationOutcome>,
}

impl Verdict {
    /// Build the admission response for the request this verdict answers.
    pub fn into_response(self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let mut response = AdmissionResponse::from(request);
        match (self.allowed, self.message) {
            (true, Some(message)) => {
                response.result.message = message;
                response
            }
            (true, None) => response,
            (false, message) => response.deny(message.unwrap_or_default()),
        }
    }
}

/// Evaluates admission requests against image scan results.
pub struct AdmissionEngine<S> {
    scanner: S,
    health_state: Option<Arc<HealthState>>,
}

impl<S: ImageScanner> AdmissionEngine<S> {
    pub fn new(scanner: S, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            scanner,
            health_state,
        }
    }

    pub async fn evaluate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Verdict, AdmissionError> {
        if request.operation == Operation::Delete {
            debug!(uid = %request.uid, name = %request.name, "Allowing DELETE without scan");
            return Ok(Verdict {
                uid: request.uid.clone(),
                allowed: true,
                message: None,
                outcome: None,
            });
        }

        if request.kind.kind != "Deployment" {
            return Err(AdmissionError::UnsupportedKind(request.kind.kind.clone()));
        }

        let object = request
            .object
            .clone()
            .ok_or(AdmissionError::MissingObject)?;
        let deployment: Deployment = object
            .try_parse()
            .map_err(|e| AdmissionError::Decode(e.to_string()))?;

        let workload = WorkloadSnapshot::from_deployment(&deployment);
        let name = resolve_name(&workload, request);
        let namespace = resolve_namespace(&workload, request);
        let flags = workload.policy_flags();

        let images = self.scan_images(&workload.images()).await;
        let outcome = ValidationOutcome::new(&name, &namespace, images, flags.bypass_cve_denial);

        if outcome.decision.is_allowed() && flags.bypass_cve_denial && outcome.critical_total() > 0
        {
            warn!(
                name = %name,
                namespace = %namespace,
                critical = outcome.critical_total(),
                "Critical vulnerabilities bypassed"
            );
        }
        info!(
            uid = %request.uid,
            name = %name,
            namespace = %namespace,
            decision = %outcome.decision,
            critical = outcome.critical_total(),
            "Admission decision"
        );
        if let Some(state) = &self.health_state {
            state.metrics.record_decision(outcome.decision.as_str());
        }

        Ok(Verdict {
            uid: request.uid.clone(),
            allowed: outcome.decision.is_allowed(),
            message: Some(outcome.to_message()?),
            outcome: Some(outcome),
        })
    }

    /// Scan images one at a time, in declaration order.
    async fn scan_images(&self, images: &[&str]) -> Vec<ImageScanResult> {
        let mut results = Vec::with_capacity(images.len());
        for image in images {
            match self.scanner.scan(image).await {
                Ok(report) => {
                    debug!(image = %image, critical = report.count, "Scanned image");
                    self.record_scan(if report.safe {
                        ScanResultLabel::Clean
                    } else {
                        ScanResultLabel::Vulnerable
                    });
                    results.push(ImageScanResult::new(*image, report));
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "Image scan failed, excluding from results");
                    self.record_scan(ScanResultLabel::Failed);
                }
            }
        }
        results
    }

    fn record_scan(&self, result: ScanResultLabel) {
        if let Some(state) = &self.health_state {
            state.metrics.record_scan(result);
        }
    }
}

fn resolve_name(workload: &WorkloadSnapshot, request: &AdmissionRequest<DynamicObject>) -> String {
    if !workload.name.is_empty() {
        return workload.name.clone();
    }
    request.name.clone()
}

fn resolve_namespace(
    workload: &WorkloadSnapshot,
    request: &AdmissionRequest<DynamicObject>,
) -> String {
    if !workload.namespace.is_empty() {
        return workload.namespace.clone();
    }
    request.namespace.clone().unwrap_or_default()
}
