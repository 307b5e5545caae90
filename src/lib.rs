//! workload-gate library crate
//!
//! Exposes every Deployment through a Service and an Ingress unless it opts
//! out, and gates Deployment admission on image vulnerability scans.

pub mod config;
pub mod controller;
pub mod health;
pub mod queue;
pub mod resources;
pub mod scanner;
pub mod webhooks;
pub mod workload;

pub use health::HealthState;
pub use webhooks::{WEBHOOK_PORT, WebhookError, run_webhook_server};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use controller::{EventDispatcher, ExposureController, KubeCluster, WorkloadTracker};
use queue::WorkQueue;
use workload::WorkloadRef;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create a reflector-backed watch stream.
///
/// The returned store is the controller's cache. The stream yields raw watch
/// events after they have been applied to the store, retrying with
/// exponential backoff on errors.
fn create_watch_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config)).default_backoff();
    (reader, stream)
}

/// Run the exposure controller until `shutdown` is cancelled.
///
/// When `namespace` is `Some(ns)`, only watches Deployments in that namespace.
/// Readiness is reported through `health_state` once the cache has synced.
/// `instance` is recorded as the reporting instance on published events.
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    instance: Option<String>,
    workers: usize,
    health_state: Option<Arc<HealthState>>,
    shutdown: CancellationToken,
) {
    let scope = namespace.as_deref().unwrap_or("cluster-wide");
    info!(scope = %scope, workers = workers, "Starting exposure controller");

    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace.as_deref());
    let (store, stream) = create_watch_stream(deployments, WatcherConfig::default());

    let queue: WorkQueue<WorkloadRef> = WorkQueue::new();
    let dispatcher = EventDispatcher::new(queue.clone());

    let watch_handle = tokio::spawn(async move {
        let mut tracker = WorkloadTracker::new();
        let mut stream = std::pin::pin!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    for classified in tracker.classify(event) {
                        dispatcher.dispatch(classified);
                    }
                }
                Err(e) => warn!(error = %e, "Watch error"),
            }
        }
        error!("Watch stream ended unexpectedly");
    });

    tokio::select! {
        result = store.wait_until_ready() => {
            if let Err(e) = result {
                error!(error = %e, "Watch cache closed before it synced");
                watch_handle.abort();
                return;
            }
        }
        _ = shutdown.cancelled() => {
            watch_handle.abort();
            return;
        }
    }
    info!(workloads = store.state().len(), "Watch cache synced");

    let controller = Arc::new(ExposureController::new(
        store,
        KubeCluster::new(client, instance),
        queue.clone(),
        health_state.clone(),
    ));
    if let Some(state) = &health_state {
        state.set_ready(true).await;
    }

    let worker_handles: Vec<_> = (0..workers.max(1))
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run().await })
        })
        .collect();

    shutdown.cancelled().await;
    info!("Stopping exposure controller");

    queue.shut_down();
    watch_handle.abort();
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked");
        }
    }
    info!("Exposure controller stopped");
}
