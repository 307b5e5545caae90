//! Cluster-facing seams used by the reconciliation worker.
//!
//! [`WorkloadCache`] resolves queue keys against the local watch cache and
//! [`ExposureApi`] issues create-if-absent calls. Production code backs both
//! with kube-rs; tests substitute in-memory fakes.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::PostParams;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::controller::error::{Error, Result};
use crate::workload::WorkloadRef;

/// Field manager recorded on objects this controller creates
pub const FIELD_MANAGER: &str = "workload-gate";

/// Result of a create-if-absent call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

impl CreateOutcome {
    pub fn was_created(self) -> bool {
        matches!(self, CreateOutcome::Created)
    }
}

/// Read access to the locally cached workloads.
pub trait WorkloadCache: Send + Sync {
    fn lookup(&self, key: &WorkloadRef) -> Option<Arc<Deployment>>;
}

impl WorkloadCache for Store<Deployment> {
    fn lookup(&self, key: &WorkloadRef) -> Option<Arc<Deployment>> {
        self.get(&ObjectRef::new(&key.name).within(&key.namespace))
    }
}

/// Write access for the derived exposure resources.
pub trait ExposureApi: Send + Sync {
    fn create_service(
        &self,
        service: &Service,
    ) -> impl Future<Output = Result<CreateOutcome>> + Send;

    fn create_ingress(
        &self,
        ingress: &Ingress,
    ) -> impl Future<Output = Result<CreateOutcome>> + Send;

    /// Record that exposure resources were created for a workload.
    fn record_exposure(
        &self,
        _deployment: &Deployment,
        _note: String,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// [`ExposureApi`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    reporter: Reporter,
}

impl KubeCluster {
    /// `instance` identifies this replica on published events.
    pub fn new(client: Client, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        }
    }

    async fn create_if_absent<K>(&self, obj: &K) -> Result<CreateOutcome>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        let namespace = obj
            .meta()
            .namespace
            .clone()
            .ok_or_else(|| Error::MissingField(format!("{}.metadata.namespace", K::kind(&()))))?;

        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api.create(&params, obj).await.map_err(Error::from) {
            Ok(_) => {
                debug!(kind = %K::kind(&()), name = %name, namespace = %namespace, "Created");
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.is_already_exists() => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }
}

impl ExposureApi for KubeCluster {
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome> {
        self.create_if_absent(service).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome> {
        self.create_if_absent(ingress).await
    }

    async fn record_exposure(&self, deployment: &Deployment, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let object_ref = deployment.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "ExposureCreated".into(),
                    note: Some(note),
                    action: "CreateExposure".into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(name = %deployment.name_any(), error = %e, "Failed to publish event");
        }
    }
}
