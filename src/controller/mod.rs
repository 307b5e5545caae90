//! Controller module for workload-gate.
//!
//! Contains the watch event dispatcher, the reconciliation worker, the
//! cluster seams it writes through, and error handling.

pub mod cluster;
pub mod dispatcher;
pub mod error;
pub mod reconciler;

pub use cluster::{CreateOutcome, ExposureApi, KubeCluster, WorkloadCache};
pub use dispatcher::{EventDispatcher, WorkloadEvent, WorkloadTracker};
pub use reconciler::{ExposureController, SyncOutcome};
