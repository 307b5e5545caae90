//! Service generation for exposed workloads.
//!
//! The Service selects pods by the workload's pod-template labels rather than
//! the workload's own labels, so traffic reaches the pods it actually runs.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::resources::common::{HTTP_PORT, exposure_labels};
use crate::workload::WorkloadSnapshot;

/// Generate the Service exposing a workload on port 80.
pub fn generate_service(workload: &WorkloadSnapshot) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(workload.name.clone()),
            namespace: Some(workload.namespace.clone()),
            labels: Some(exposure_labels(&workload.name, "service")),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(workload.pod_template_labels.clone()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: HTTP_PORT,
                target_port: Some(IntOrString::Int(HTTP_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
