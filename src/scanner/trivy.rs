//! Trivy client adapter.
//!
//! Runs `trivy image` in client mode against a Trivy server and keeps only
//! the CRITICAL findings from its JSON report.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{ImageScanner, ScanError, ScanFinding, ScanReport};

/// In-cluster address of the Trivy server
pub const DEFAULT_TRIVY_SERVER: &str = "http://trivy-server-service.default.svc:8080";
/// Upper bound for a single image scan, in seconds
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 300;

const CRITICAL: &str = "CRITICAL";

#[derive(Deserialize)]
struct Report {
    #[serde(rename = "Results", default)]
    results: Option<Vec<TargetResult>>,
}

#[derive(Deserialize)]
struct TargetResult {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<Vulnerability>>,
}

#[derive(Deserialize)]
struct Vulnerability {
    #[serde(rename = "VulnerabilityID", default)]
    vulnerability_id: String,
    #[serde(rename = "PrimaryURL", default)]
    primary_url: String,
    #[serde(rename = "Severity", default)]
    severity: String,
}

/// Parse a Trivy JSON report. A report without results is a clean image.
pub fn parse_report(output: &[u8]) -> Result<ScanReport, ScanError> {
    let report: Report = serde_json::from_slice(output)?;
    let findings = report
        .results
        .into_iter()
        .flatten()
        .flat_map(|result| result.vulnerabilities.into_iter().flatten())
        .filter(|vuln| vuln.severity.eq_ignore_ascii_case(CRITICAL))
        .map(|vuln| ScanFinding {
            vulnerability_id: vuln.vulnerability_id,
            reference_url: vuln.primary_url,
        })
        .collect();
    Ok(ScanReport::from_findings(findings))
}

/// [`ImageScanner`] that invokes the Trivy CLI.
#[derive(Clone, Debug)]
pub struct TrivyScanner {
    binary: String,
    server_url: String,
    timeout: Duration,
}

impl TrivyScanner {
    pub fn new(binary: impl Into<String>, server_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            server_url: server_url.into(),
            timeout,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Arguments passed to the Trivy binary for one image.
    pub fn args<'a>(&'a self, image: &'a str) -> [&'a str; 10] {
        [
            "image",
            "--scanners",
            "vuln",
            "--severity",
            CRITICAL,
            "--server",
            &self.server_url,
            "--format",
            "json",
            image,
        ]
    }
}

impl ImageScanner for TrivyScanner {
    async fn scan(&self, image: &str) -> Result<ScanReport, ScanError> {
        debug!(image = %image, server = %self.server_url, "Scanning image");

        let child = Command::new(&self.binary)
            .args(self.args(image))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ScanError::Spawn)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ScanError::Timeout(self.timeout))?
            .map_err(ScanError::Spawn)?;

        if !output.status.success() {
            return Err(ScanError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_report(&output.stdout)
    }
}
