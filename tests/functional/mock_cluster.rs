//! In-memory stand-ins for the cluster API and the image scanner.
//!
//! `FakeCluster` implements both controller seams (`WorkloadCache` and
//! `ExposureApi`) over shared state, so a test can seed Deployments, inject
//! API failures, and inspect every create call the controller made.
//! `FakeScanner` answers scans from a fixed table and records the order in
//! which images were requested.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use parking_lot::Mutex;

use workload_gate::controller::error::{Error, Result};
use workload_gate::controller::{CreateOutcome, ExposureApi, WorkloadCache};
use workload_gate::scanner::{ImageScanner, ScanError, ScanFinding, ScanReport};
use workload_gate::workload::WorkloadRef;

/// A create call observed by the fake API server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateService(WorkloadRef),
    CreateIngress(WorkloadRef),
}

#[derive(Default)]
struct ClusterState {
    deployments: HashMap<WorkloadRef, Arc<Deployment>>,
    services: BTreeMap<WorkloadRef, Service>,
    ingresses: BTreeMap<WorkloadRef, Ingress>,
    calls: Vec<Call>,
    service_failures: u32,
    ingress_failures: u32,
    events: Vec<(WorkloadRef, String)>,
}

/// Shared, cloneable fake of the cluster.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a Deployment into the watch cache.
    pub fn with_deployment(self, deployment: Deployment) -> Self {
        let key = WorkloadRef::from_deployment(&deployment).expect("fixture has name and namespace");
        self.state.lock().deployments.insert(key, Arc::new(deployment));
        self
    }

    /// Pretend a Service already exists.
    pub fn with_existing_service(self, service: Service) -> Self {
        let key = key_of(&service);
        self.state.lock().services.insert(key, service);
        self
    }

    /// Fail the next `n` Service creates with a transient error.
    pub fn fail_service_creates(&self, n: u32) {
        self.state.lock().service_failures = n;
    }

    /// Fail the next `n` Ingress creates with a transient error.
    pub fn fail_ingress_creates(&self, n: u32) {
        self.state.lock().ingress_failures = n;
    }

    pub fn remove_deployment(&self, key: &WorkloadRef) {
        self.state.lock().deployments.remove(key);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn service(&self, key: &WorkloadRef) -> Option<Service> {
        self.state.lock().services.get(key).cloned()
    }

    pub fn ingress(&self, key: &WorkloadRef) -> Option<Ingress> {
        self.state.lock().ingresses.get(key).cloned()
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    pub fn ingress_count(&self) -> usize {
        self.state.lock().ingresses.len()
    }

    pub fn events(&self) -> Vec<(WorkloadRef, String)> {
        self.state.lock().events.clone()
    }
}

fn key_of<K: ResourceExt>(obj: &K) -> WorkloadRef {
    WorkloadRef::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

impl WorkloadCache for FakeCluster {
    fn lookup(&self, key: &WorkloadRef) -> Option<Arc<Deployment>> {
        self.state.lock().deployments.get(key).cloned()
    }
}

impl ExposureApi for FakeCluster {
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome> {
        let key = key_of(service);
        let mut state = self.state.lock();
        state.calls.push(Call::CreateService(key.clone()));
        if state.service_failures > 0 {
            state.service_failures -= 1;
            return Err(Error::Transient("injected service failure".to_string()));
        }
        if state.services.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.services.insert(key, service.clone());
        Ok(CreateOutcome::Created)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<CreateOutcome> {
        let key = key_of(ingress);
        let mut state = self.state.lock();
        state.calls.push(Call::CreateIngress(key.clone()));
        if state.ingress_failures > 0 {
            state.ingress_failures -= 1;
            return Err(Error::Transient("injected ingress failure".to_string()));
        }
        if state.ingresses.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.ingresses.insert(key, ingress.clone());
        Ok(CreateOutcome::Created)
    }

    async fn record_exposure(&self, deployment: &Deployment, note: String) {
        let key = key_of(deployment);
        self.state.lock().events.push((key, note));
    }
}

/// Scanner answering from a fixed table. Unknown images are clean.
#[derive(Clone, Default)]
pub struct FakeScanner {
    reports: Arc<HashMap<String, std::result::Result<Vec<String>, String>>>,
    scanned: Arc<Mutex<Vec<String>>>,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the given critical CVE ids for `image`.
    pub fn with_critical(mut self, image: &str, cve_ids: &[&str]) -> Self {
        Arc::make_mut(&mut self.reports).insert(
            image.to_string(),
            Ok(cve_ids.iter().map(|id| id.to_string()).collect()),
        );
        self
    }

    /// Fail every scan of `image`.
    pub fn with_failure(mut self, image: &str, stderr: &str) -> Self {
        Arc::make_mut(&mut self.reports).insert(image.to_string(), Err(stderr.to_string()));
        self
    }

    /// Images scanned so far, in request order.
    pub fn scanned(&self) -> Vec<String> {
        self.scanned.lock().clone()
    }
}

impl ImageScanner for FakeScanner {
    async fn scan(&self, image: &str) -> std::result::Result<ScanReport, ScanError> {
        self.scanned.lock().push(image.to_string());
        match self.reports.get(image) {
            None => Ok(ScanReport::clean()),
            Some(Ok(ids)) => Ok(ScanReport::from_findings(
                ids.iter()
                    .map(|id| ScanFinding {
                        vulnerability_id: id.clone(),
                        reference_url: format!("https://avd.aquasec.com/nvd/{}", id.to_lowercase()),
                    })
                    .collect(),
            )),
            Some(Err(stderr)) => Err(ScanError::Failed {
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            }),
        }
    }
}
