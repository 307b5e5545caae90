//! Read-only view of a Deployment used by both the controller and the webhook.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use kube::ResourceExt;

use super::PolicyFlags;

/// Queue identity of a workload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a Deployment, or `None` when its name or namespace is unset.
    pub fn from_deployment(deployment: &Deployment) -> Option<Self> {
        let name = deployment.metadata.name.as_deref()?;
        let namespace = deployment.metadata.namespace.as_deref()?;
        if name.is_empty() || namespace.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Whether a container runs before the main containers or alongside them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Init,
    Main,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Init => write!(f, "init"),
            ContainerKind::Main => write!(f, "main"),
        }
    }
}

/// A declared container: its image and literal environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerImage {
    pub kind: ContainerKind,
    pub name: String,
    pub image: String,
    /// Literal env values. Entries populated through `valueFrom` map to "".
    pub env: BTreeMap<String, String>,
}

impl ContainerImage {
    fn from_container(kind: ContainerKind, container: &Container) -> Self {
        let env = container
            .env
            .iter()
            .flatten()
            .map(|var| (var.name.clone(), var.value.clone().unwrap_or_default()))
            .collect();

        Self {
            kind,
            name: container.name.clone(),
            image: container.image.clone().unwrap_or_default(),
            env,
        }
    }
}

/// Immutable snapshot of the parts of a Deployment this crate acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Labels on the pod template; these select the pods the workload produces.
    pub pod_template_labels: BTreeMap<String, String>,
    pub replicas: Option<i32>,
    /// Init containers first, then main containers, each in declaration order.
    pub containers: Vec<ContainerImage>,
}

impl WorkloadSnapshot {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let spec = deployment.spec.as_ref();
        let template = spec.map(|s| &s.template);
        let pod_spec = template.and_then(|t| t.spec.as_ref());

        let pod_template_labels = template
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.labels.clone())
            .unwrap_or_default();

        let mut containers = Vec::new();
        if let Some(pod_spec) = pod_spec {
            containers.extend(
                pod_spec
                    .init_containers
                    .iter()
                    .flatten()
                    .map(|c| ContainerImage::from_container(ContainerKind::Init, c)),
            );
            containers.extend(
                pod_spec
                    .containers
                    .iter()
                    .map(|c| ContainerImage::from_container(ContainerKind::Main, c)),
            );
        }

        Self {
            name: deployment.name_any(),
            namespace: deployment.namespace().unwrap_or_default(),
            uid: deployment.uid(),
            labels: deployment.labels().clone(),
            pod_template_labels,
            replicas: spec.and_then(|s| s.replicas),
            containers,
        }
    }

    pub fn workload_ref(&self) -> WorkloadRef {
        WorkloadRef::new(&self.namespace, &self.name)
    }

    /// Every declared image in order. Duplicates are kept.
    pub fn images(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.image.as_str()).collect()
    }

    pub fn policy_flags(&self) -> PolicyFlags {
        PolicyFlags::from_containers(&self.containers)
    }
}
