//! Controller scenarios: a key goes in the queue, the worker syncs it against
//! the fake cluster, and the test inspects what was created.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use workload_gate::controller::{CreateOutcome, ExposureController, SyncOutcome};
use workload_gate::health::HealthState;
use workload_gate::queue::WorkQueue;
use workload_gate::resources::ingress::INGRESS_HOST;
use workload_gate::workload::WorkloadRef;

use crate::common::fixtures::DeploymentBuilder;
use crate::{Call, FakeCluster};

fn controller(
    cluster: &FakeCluster,
    health_state: Option<Arc<HealthState>>,
) -> ExposureController<FakeCluster, FakeCluster> {
    ExposureController::new(cluster.clone(), cluster.clone(), WorkQueue::new(), health_state)
}

fn web() -> WorkloadRef {
    WorkloadRef::new("default", "web")
}

#[tokio::test]
async fn test_new_workload_gets_service_then_ingress() {
    let cluster = FakeCluster::new().with_deployment(
        DeploymentBuilder::new("web")
            .pod_label("tier", "frontend")
            .container("app", "app:1.0")
            .build(),
    );
    let controller = controller(&cluster, None);

    controller.queue().add(web());
    assert!(controller.process_next_item().await);

    assert_eq!(
        cluster.calls(),
        vec![Call::CreateService(web()), Call::CreateIngress(web())]
    );

    let selector = cluster
        .service(&web())
        .and_then(|s| s.spec)
        .and_then(|s| s.selector)
        .unwrap();
    assert_eq!(selector.get("app"), Some(&"web".to_string()));
    assert_eq!(selector.get("tier"), Some(&"frontend".to_string()));

    let rule = cluster
        .ingress(&web())
        .and_then(|i| i.spec)
        .and_then(|s| s.rules)
        .and_then(|r| r.into_iter().next())
        .unwrap();
    assert_eq!(rule.host.as_deref(), Some(INGRESS_HOST));
    assert_eq!(
        rule.http.unwrap().paths[0].path.as_deref(),
        Some("/web")
    );

    assert_eq!(cluster.events().len(), 1, "creation is announced once");
    assert!(controller.queue().is_empty());
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let cluster = FakeCluster::new()
        .with_deployment(DeploymentBuilder::new("web").container("app", "app:1.0").build());
    let controller = controller(&cluster, None);

    let first = controller.sync(&web()).await.unwrap();
    let second = controller.sync(&web()).await.unwrap();

    assert_eq!(
        first,
        SyncOutcome::Exposed {
            service: CreateOutcome::Created,
            ingress: CreateOutcome::Created,
        }
    );
    assert_eq!(
        second,
        SyncOutcome::Exposed {
            service: CreateOutcome::AlreadyExists,
            ingress: CreateOutcome::AlreadyExists,
        }
    );
    assert_eq!(cluster.service_count(), 1);
    assert_eq!(cluster.ingress_count(), 1);
    assert_eq!(cluster.events().len(), 1, "nothing new to announce on resync");
}

#[tokio::test]
async fn test_opt_out_creates_nothing() {
    let cluster = FakeCluster::new().with_deployment(
        DeploymentBuilder::new("web")
            .container("app", "app:1.0")
            .env("app", "NO_AUTO_CREATION", "yes")
            .build(),
    );
    let health_state = Arc::new(HealthState::new());
    let controller = controller(&cluster, Some(health_state.clone()));

    controller.queue().add(web());
    assert!(controller.process_next_item().await);

    assert!(cluster.calls().is_empty());
    assert_eq!(cluster.service_count(), 0);
    assert_eq!(cluster.ingress_count(), 0);

    let metrics = health_state.metrics.encode();
    assert!(metrics.contains("workload_gate_exposures_skipped"));
    assert!(metrics.contains("name=\"web\""));
}

#[tokio::test]
async fn test_opt_out_from_init_container() {
    let cluster = FakeCluster::new().with_deployment(
        DeploymentBuilder::new("web")
            .init_container("setup", "setup:1")
            .container("app", "app:1.0")
            .env("setup", "NO_AUTO_CREATION", "TRUE")
            .build(),
    );
    let controller = controller(&cluster, None);

    assert_eq!(controller.sync(&web()).await.unwrap(), SyncOutcome::OptedOut);
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_existing_service_still_gets_ingress() {
    let existing = Service {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let cluster = FakeCluster::new()
        .with_deployment(DeploymentBuilder::new("web").container("app", "app:1.0").build())
        .with_existing_service(existing);
    let controller = controller(&cluster, None);

    let outcome = controller.sync(&web()).await.unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::Exposed {
            service: CreateOutcome::AlreadyExists,
            ingress: CreateOutcome::Created,
        }
    );
    assert_eq!(cluster.ingress_count(), 1);
}

#[tokio::test]
async fn test_missing_workload_is_done_without_requeue() {
    let cluster = FakeCluster::new();
    let controller = controller(&cluster, None);

    controller.queue().add(web());
    assert!(controller.process_next_item().await);

    assert!(cluster.calls().is_empty());
    assert_eq!(controller.queue().num_requeues(&web()), 0);
    assert!(controller.queue().is_empty());
}

#[tokio::test]
async fn test_workload_deleted_before_sync() {
    let cluster = FakeCluster::new()
        .with_deployment(DeploymentBuilder::new("web").container("app", "app:1.0").build());
    let controller = controller(&cluster, None);

    controller.queue().add(web());
    cluster.remove_deployment(&web());

    assert!(controller.process_next_item().await);
    assert!(cluster.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_service_failure_requeues_without_ingress() {
    let cluster = FakeCluster::new()
        .with_deployment(DeploymentBuilder::new("web").container("app", "app:1.0").build());
    cluster.fail_service_creates(1);
    let health_state = Arc::new(HealthState::new());
    let controller = controller(&cluster, Some(health_state.clone()));

    controller.queue().add(web());
    assert!(controller.process_next_item().await);

    assert_eq!(cluster.calls(), vec![Call::CreateService(web())]);
    assert_eq!(controller.queue().num_requeues(&web()), 1);
    assert!(
        health_state
            .metrics
            .encode()
            .contains("workload_gate_reconciliation_errors")
    );

    // The retry arrives after the backoff delay and succeeds.
    let processed = tokio::time::timeout(Duration::from_secs(1), controller.process_next_item())
        .await
        .expect("requeued key should be retried");
    assert!(processed);

    assert_eq!(cluster.service_count(), 1);
    assert_eq!(cluster.ingress_count(), 1);
    assert_eq!(controller.queue().num_requeues(&web()), 0, "success forgets backoff");
}

#[tokio::test(start_paused = true)]
async fn test_ingress_failure_retries_with_existing_service() {
    let cluster = FakeCluster::new()
        .with_deployment(DeploymentBuilder::new("web").container("app", "app:1.0").build());
    cluster.fail_ingress_creates(1);
    let controller = controller(&cluster, None);

    controller.queue().add(web());
    assert!(controller.process_next_item().await);
    assert_eq!(cluster.service_count(), 1);
    assert_eq!(cluster.ingress_count(), 0);

    tokio::time::timeout(Duration::from_secs(1), controller.process_next_item())
        .await
        .expect("requeued key should be retried");

    assert_eq!(cluster.ingress_count(), 1);
    assert_eq!(
        cluster.calls(),
        vec![
            Call::CreateService(web()),
            Call::CreateIngress(web()),
            Call::CreateService(web()),
            Call::CreateIngress(web()),
        ]
    );
}

#[tokio::test]
async fn test_workers_stop_on_shutdown() {
    let cluster = FakeCluster::new();
    let controller = Arc::new(controller(&cluster, None));

    let worker = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    tokio::task::yield_now().await;

    controller.queue().shut_down();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker should exit after shutdown")
        .unwrap();

    assert!(!controller.process_next_item().await);
}
