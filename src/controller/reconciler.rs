//! Reconciliation worker for workload exposure.
//!
//! Each key taken off the queue is resolved against the watch cache and, unless
//! the workload opted out, gets a Service and then an Ingress. Both creates
//! are create-if-absent; an existing object counts as success.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::controller::cluster::{CreateOutcome, ExposureApi, WorkloadCache};
use crate::controller::error::Result;
use crate::health::HealthState;
use crate::queue::WorkQueue;
use crate::resources::{generate_ingress, generate_service};
use crate::workload::{WorkloadRef, WorkloadSnapshot};

/// What a single sync did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The workload is gone from the cache.
    Missing,
    /// The workload opted out of exposure.
    OptedOut,
    Exposed {
        service: CreateOutcome,
        ingress: CreateOutcome,
    },
}

/// Drains the work queue and keeps exposure resources in place.
pub struct ExposureController<C, A> {
    cache: C,
    cluster: A,
    queue: WorkQueue<WorkloadRef>,
    health_state: Option<Arc<HealthState>>,
}

impl<C, A> ExposureController<C, A>
where
    C: WorkloadCache,
    A: ExposureApi,
{
    pub fn new(
        cache: C,
        cluster: A,
        queue: WorkQueue<WorkloadRef>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            cache,
            cluster,
            queue,
            health_state,
        }
    }

    pub fn queue(&self) -> &WorkQueue<WorkloadRef> {
        &self.queue
    }

    /// Process keys until the queue shuts down.
    pub async fn run(&self) {
        while self.process_next_item().await {}
        debug!("Worker stopped");
    }

    /// Take one key off the queue and sync it. Returns `false` once the queue
    /// has shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let start = Instant::now();
        match self.sync(&key).await {
            Ok(outcome) => {
                debug!(workload = %key, outcome = ?outcome, "Synced");
                self.queue.forget(&key);
                if let Some(state) = &self.health_state {
                    state.metrics.record_reconcile(
                        &key.namespace,
                        &key.name,
                        start.elapsed().as_secs_f64(),
                    );
                }
            }
            Err(e) => {
                let retries = self.queue.num_requeues(&key);
                if e.is_retryable() {
                    warn!(workload = %key, retries = retries, error = %e, "Sync failed, requeueing");
                } else {
                    error!(workload = %key, retries = retries, error = %e, "Sync failed, requeueing");
                }
                if let Some(state) = &self.health_state {
                    state.metrics.record_error(&key.namespace, &key.name);
                }
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
        true
    }

    /// Bring one workload's exposure resources into place.
    pub async fn sync(&self, key: &WorkloadRef) -> Result<SyncOutcome> {
        let Some(deployment) = self.cache.lookup(key) else {
            debug!(workload = %key, "Deployment no longer exists");
            return Ok(SyncOutcome::Missing);
        };

        let workload = WorkloadSnapshot::from_deployment(&deployment);
        if workload.policy_flags().no_auto_exposure {
            info!(workload = %key, "Automatic exposure disabled, skipping");
            if let Some(state) = &self.health_state {
                state.metrics.record_skipped(&key.namespace, &key.name);
            }
            return Ok(SyncOutcome::OptedOut);
        }

        let service = self
            .cluster
            .create_service(&generate_service(&workload))
            .await?;
        log_create("Service", key, service);

        let ingress = self
            .cluster
            .create_ingress(&generate_ingress(&workload))
            .await?;
        log_create("Ingress", key, ingress);

        if service.was_created() || ingress.was_created() {
            let note = format!(
                "Service {}, Ingress {}",
                describe(service),
                describe(ingress)
            );
            self.cluster.record_exposure(&deployment, note).await;
        }

        Ok(SyncOutcome::Exposed { service, ingress })
    }
}

fn log_create(kind: &str, key: &WorkloadRef, outcome: CreateOutcome) {
    match outcome {
        CreateOutcome::Created => info!(workload = %key, kind = kind, "Created"),
        CreateOutcome::AlreadyExists => {
            debug!(workload = %key, kind = kind, "Already exists")
        }
    }
}

fn describe(outcome: CreateOutcome) -> &'static str {
    match outcome {
        CreateOutcome::Created => "created",
        CreateOutcome::AlreadyExists => "already present",
    }
}
