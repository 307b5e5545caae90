//! Per-image scan results and the aggregate admission decision.

use std::fmt;

use serde::Serialize;

use crate::scanner::{ScanFinding, ScanReport};

/// Final admission decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allowed => "ALLOWED",
            Decision::Denied => "DENIED",
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Critical findings for one successfully scanned image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageScanResult {
    #[serde(rename = "name")]
    pub image: String,
    #[serde(rename = "critical_cves")]
    pub critical_count: usize,
    #[serde(rename = "cves")]
    pub findings: Vec<ScanFinding>,
}

impl ImageScanResult {
    pub fn new(image: impl Into<String>, report: ScanReport) -> Self {
        Self {
            image: image.into(),
            critical_count: report.count,
            findings: report.findings,
        }
    }
}

/// Everything the webhook reports back for one workload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    #[serde(rename = "deployment")]
    pub workload: String,
    pub namespace: String,
    pub images: Vec<ImageScanResult>,
    pub decision: Decision,
}

impl ValidationOutcome {
    pub fn new(
        workload: impl Into<String>,
        namespace: impl Into<String>,
        images: Vec<ImageScanResult>,
        bypass_cve_denial: bool,
    ) -> Self {
        let decision = decide(&images, bypass_cve_denial);
        Self {
            workload: workload.into(),
            namespace: namespace.into(),
            images,
            decision,
        }
    }

    /// Total critical findings across all scanned images.
    pub fn critical_total(&self) -> usize {
        self.images.iter().map(|i| i.critical_count).sum()
    }

    /// Indented JSON carried in the admission response message.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Deny when any image carries a critical finding, unless the workload
/// declared the bypass. Counts are never altered by the bypass.
pub fn decide(images: &[ImageScanResult], bypass_cve_denial: bool) -> Decision {
    let vulnerable = images.iter().any(|i| i.critical_count > 0);
    if vulnerable && !bypass_cve_denial {
        Decision::Denied
    } else {
        Decision::Allowed
    }
}
