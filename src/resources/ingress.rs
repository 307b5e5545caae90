//! Ingress generation for exposed workloads.
//!
//! Every workload gets one prefix path, `/<name>`, on a shared host, routed to
//! the same-named Service.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::resources::common::{HTTP_PORT, exposure_labels};
use crate::workload::WorkloadSnapshot;

/// Host shared by every generated Ingress rule.
pub const INGRESS_HOST: &str = "demo.local";

/// Annotation that strips the workload prefix before forwarding.
pub const REWRITE_TARGET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/rewrite-target";

/// Generate the Ingress routing `/<name>` to the workload's Service.
pub fn generate_ingress(workload: &WorkloadSnapshot) -> Ingress {
    let path = HTTPIngressPath {
        path: Some(format!("/{}", workload.name)),
        path_type: "Prefix".to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: workload.name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(HTTP_PORT),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(workload.name.clone()),
            namespace: Some(workload.namespace.clone()),
            labels: Some(exposure_labels(&workload.name, "ingress")),
            annotations: Some(BTreeMap::from([(
                REWRITE_TARGET_ANNOTATION.to_string(),
                "/".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(INGRESS_HOST.to_string()),
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
