//! Image vulnerability scanning.
//!
//! [`ImageScanner`] is the seam the admission engine scans through. The
//! production implementation shells out to a Trivy client that talks to a
//! Trivy server; tests use in-memory scanners.

mod trivy;

pub use trivy::{DEFAULT_SCAN_TIMEOUT_SECS, DEFAULT_TRIVY_SERVER, TrivyScanner, parse_report};

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// One critical vulnerability found in an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanFinding {
    #[serde(rename = "id")]
    pub vulnerability_id: String,
    #[serde(rename = "url")]
    pub reference_url: String,
}

/// Result of scanning a single image. Only critical findings are reported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub safe: bool,
    pub findings: Vec<ScanFinding>,
    pub count: usize,
}

impl ScanReport {
    pub fn from_findings(findings: Vec<ScanFinding>) -> Self {
        Self {
            safe: findings.is_empty(),
            count: findings.len(),
            findings,
        }
    }

    pub fn clean() -> Self {
        Self::from_findings(Vec::new())
    }
}

/// Errors from a single scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// The scanner process could not be started
    #[error("failed to start scanner: {0}")]
    Spawn(#[source] std::io::Error),

    /// The scanner exited unsuccessfully
    #[error("scanner exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The scan did not finish in time
    #[error("scan timed out after {0:?}")]
    Timeout(Duration),

    /// The scanner output was not a valid report
    #[error("failed to parse scanner output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Scans one container image reference.
pub trait ImageScanner: Send + Sync {
    fn scan(
        &self,
        image: &str,
    ) -> impl Future<Output = Result<ScanReport, ScanError>> + Send;
}
