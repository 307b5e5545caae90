//! Labels and constants shared by the generated resources.

use std::collections::BTreeMap;

/// Port the Service listens on and the Ingress routes to.
pub const HTTP_PORT: i32 = 80;

/// Label carrying the name of the workload a resource was derived from.
pub const WORKLOAD_LABEL: &str = "workload-gate.io/workload";

/// Value of `app.kubernetes.io/managed-by` on everything this operator creates.
pub const MANAGED_BY: &str = "workload-gate";

/// Identifying labels for a derived resource.
///
/// `component` is `service` or `ingress`. These are never used as a selector.
pub fn exposure_labels(workload: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (WORKLOAD_LABEL.to_string(), workload.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
        ("app".to_string(), workload.to_string()),
        ("component".to_string(), component.to_string()),
    ])
}
