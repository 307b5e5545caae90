//! Command-line and environment configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::scanner::{DEFAULT_SCAN_TIMEOUT_SECS, DEFAULT_TRIVY_SERVER};
use crate::webhooks::WEBHOOK_PORT;

/// Locations probed for the webhook certificate when no path is given:
/// the mounted secret first, then a directory next to the binary.
const CERT_SEARCH_DIRS: [&str; 2] = ["/certs", "certs"];
const CERT_FILE: &str = "tls.crt";
const KEY_FILE: &str = "tls.key";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Plain,
}

#[derive(Clone, Debug, Parser)]
#[command(
    name = "workload-gate",
    about = "Exposes Deployments and gates their admission on image scans"
)]
pub struct Settings {
    /// Kubeconfig context to use. In-cluster or default config when unset.
    #[arg(long, env = "CONTEXT")]
    pub context: Option<String>,

    /// Only watch Deployments in this namespace. Cluster-wide when unset.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, env = "TRIVY_SERVER_URL", default_value = DEFAULT_TRIVY_SERVER)]
    pub trivy_server: String,

    #[arg(long, env = "TRIVY_BINARY", default_value = "trivy")]
    pub trivy_binary: String,

    #[arg(long, default_value_t = DEFAULT_SCAN_TIMEOUT_SECS)]
    pub scan_timeout_secs: u64,

    #[arg(long, env = "WEBHOOK_PORT", default_value_t = WEBHOOK_PORT)]
    pub webhook_port: u16,

    /// PEM certificate for the webhook listener.
    #[arg(long, env = "CERT_PATH", requires = "key_path")]
    pub cert_path: Option<PathBuf>,

    /// PEM private key for the webhook listener.
    #[arg(long, env = "KEY_PATH", requires = "cert_path")]
    pub key_path: Option<PathBuf>,

    #[arg(long, default_value_t = 8080)]
    pub health_port: u16,

    /// Number of reconciliation workers.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Settings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Certificate and key for the webhook, if any can be found.
    pub fn certificates(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => resolve_certificates(CERT_SEARCH_DIRS.iter().map(Path::new)),
        }
    }
}

/// First directory holding both `tls.crt` and `tls.key`.
pub fn resolve_certificates<'a>(
    dirs: impl IntoIterator<Item = &'a Path>,
) -> Option<(PathBuf, PathBuf)> {
    dirs.into_iter().find_map(|dir| {
        let cert = dir.join(CERT_FILE);
        let key = dir.join(KEY_FILE);
        (cert.is_file() && key.is_file()).then_some((cert, key))
    })
}
