//! workload-gate - exposes Deployments and gates their admission on image scans.
//!
//! This is the main entry point that:
//! - Parses configuration and initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the health server, the exposure controller, and the webhook
//!   server when certificates are available

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use workload_gate::config::{LogFormat, Settings};
use workload_gate::health::{HealthState, run_health_server};
use workload_gate::run_controller;
use workload_gate::scanner::TrivyScanner;
use workload_gate::webhooks::{AdmissionEngine, run_webhook_server};

/// Upper bound for workers to finish their in-flight item during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::parse();
    init_tracing(settings.log_format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting workload-gate");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let client = create_client(settings.context.as_deref()).await?;
    info!("Connected to Kubernetes cluster");

    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    info!(instance = %pod_name, "Instance identity");

    let health_state = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    // Start health server immediately so liveness probes pass during sync
    let health_handle = {
        let health_state = health_state.clone();
        let port = settings.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let mut controller_handle = {
        let health_state = health_state.clone();
        let client = client.clone();
        let namespace = settings.namespace.clone();
        let workers = usize::from(settings.workers);
        let shutdown = shutdown.clone();
        let instance = Some(pod_name.clone());
        tokio::spawn(async move {
            run_controller(client, namespace, instance, workers, Some(health_state), shutdown)
                .await;
        })
    };

    let webhook_handle = match settings.certificates() {
        Some((cert_path, key_path)) => {
            info!(cert = %cert_path.display(), "TLS certificates found, starting webhook server");
            let scanner = TrivyScanner::new(
                settings.trivy_binary.clone(),
                settings.trivy_server.clone(),
                settings.scan_timeout(),
            );
            let engine = Arc::new(AdmissionEngine::new(scanner, Some(health_state.clone())));
            let port = settings.webhook_port;
            let health_state = health_state.clone();
            Some(tokio::spawn(async move {
                let result =
                    run_webhook_server(engine, port, &cert_path, &key_path, Some(health_state))
                        .await;
                if let Err(e) = result {
                    error!("Webhook server error: {}", e);
                }
            }))
        }
        None => {
            warn!("Webhook certificates not found, webhook server disabled");
            None
        }
    };

    tokio::select! {
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.begin_shutdown().await;
            info!("Marked as not ready");

            shutdown.cancel();
            let grace = Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS);
            if tokio::time::timeout(grace, &mut controller_handle).await.is_err() {
                warn!("Controller did not stop within {}s", SHUTDOWN_GRACE_PERIOD_SECS);
            }
        }
    }

    info!("workload-gate stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("workload_gate=info".parse()?)
        .add_directive("kube=info".parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Plain => builder.init(),
    }
    Ok(())
}

async fn create_client(context: Option<&str>) -> Result<Client, Box<dyn std::error::Error>> {
    let Some(context) = context else {
        return Ok(Client::try_default().await?);
    };

    info!(context = %context, "Using kubeconfig context");
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = Config::from_kubeconfig(&options).await?;
    Ok(Client::try_from(config)?)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
