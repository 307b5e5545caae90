//! Watch event classification and enqueueing.
//!
//! [`WorkloadTracker`] turns raw watcher events into [`WorkloadEvent`]s by
//! remembering the last object seen per key. [`EventDispatcher`] logs each
//! event and enqueues the keys that need reconciliation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use kube::runtime::watcher;
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;
use crate::workload::{WorkloadRef, WorkloadSnapshot};

/// A classified change to a watched workload.
#[derive(Clone, Debug)]
pub enum WorkloadEvent {
    Added(Arc<Deployment>),
    Updated {
        old: Arc<Deployment>,
        new: Arc<Deployment>,
    },
    Deleted(Arc<Deployment>),
    /// The payload could not be identified as a workload.
    Unrecognized(String),
}

/// Remembers the last-seen object per key across watch restarts.
#[derive(Default)]
pub struct WorkloadTracker {
    known: HashMap<WorkloadRef, Arc<Deployment>>,
    /// Keys seen since the current relist started.
    relisted: Option<HashSet<WorkloadRef>>,
}

impl WorkloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one watcher event. A relist that drops a key yields `Deleted`
    /// for it once the relist completes.
    pub fn classify(&mut self, event: watcher::Event<Deployment>) -> Vec<WorkloadEvent> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let classified = self.apply(obj);
                if let (Some(seen), Some(key)) = (self.relisted.as_mut(), applied_key(&classified))
                {
                    seen.insert(key);
                }
                vec![classified]
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<WorkloadRef> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(WorkloadEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(obj) => vec![self.apply(obj)],
            watcher::Event::Delete(obj) => {
                let Some(key) = WorkloadRef::from_deployment(&obj) else {
                    return vec![unrecognized(&obj)];
                };
                self.known.remove(&key);
                vec![WorkloadEvent::Deleted(Arc::new(obj))]
            }
        }
    }

    /// Number of workloads currently tracked.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    fn apply(&mut self, obj: Deployment) -> WorkloadEvent {
        let Some(key) = WorkloadRef::from_deployment(&obj) else {
            return unrecognized(&obj);
        };
        let new = Arc::new(obj);
        match self.known.insert(key, new.clone()) {
            Some(old) => WorkloadEvent::Updated { old, new },
            None => WorkloadEvent::Added(new),
        }
    }
}

fn applied_key(event: &WorkloadEvent) -> Option<WorkloadRef> {
    match event {
        WorkloadEvent::Added(obj) | WorkloadEvent::Updated { new: obj, .. } => {
            WorkloadRef::from_deployment(obj)
        }
        _ => None,
    }
}

fn unrecognized(obj: &Deployment) -> WorkloadEvent {
    WorkloadEvent::Unrecognized(format!(
        "deployment without name or namespace (name={:?}, namespace={:?})",
        obj.metadata.name, obj.metadata.namespace
    ))
}

/// What an update changed, for logging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadChanges {
    pub replicas: Option<(Option<i32>, Option<i32>)>,
    pub images: Option<(Vec<String>, Vec<String>)>,
}

impl WorkloadChanges {
    pub fn between(old: &WorkloadSnapshot, new: &WorkloadSnapshot) -> Self {
        let replicas = (old.replicas != new.replicas).then_some((old.replicas, new.replicas));
        let old_images = owned_images(old);
        let new_images = owned_images(new);
        let images = (old_images != new_images).then_some((old_images, new_images));
        Self { replicas, images }
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.images.is_none()
    }
}

fn owned_images(snapshot: &WorkloadSnapshot) -> Vec<String> {
    snapshot.images().into_iter().map(str::to_string).collect()
}

/// Routes classified events to the work queue.
pub struct EventDispatcher {
    queue: WorkQueue<WorkloadRef>,
}

impl EventDispatcher {
    pub fn new(queue: WorkQueue<WorkloadRef>) -> Self {
        Self { queue }
    }

    pub fn dispatch(&self, event: WorkloadEvent) {
        match event {
            WorkloadEvent::Added(obj) => self.on_add(&obj),
            WorkloadEvent::Updated { old, new } => self.on_update(&old, &new),
            WorkloadEvent::Deleted(obj) => self.on_delete(&obj),
            WorkloadEvent::Unrecognized(detail) => {
                warn!(detail = %detail, "Ignoring unrecognized watch payload");
            }
        }
    }

    pub fn on_add(&self, obj: &Deployment) {
        let snapshot = WorkloadSnapshot::from_deployment(obj);
        info!(
            name = %snapshot.name,
            namespace = %snapshot.namespace,
            uid = ?snapshot.uid,
            created = ?obj.creation_timestamp().map(|t| t.0),
            replicas = ?snapshot.replicas,
            labels = ?snapshot.labels,
            "Deployment added"
        );
        self.queue.add(snapshot.workload_ref());
    }

    pub fn on_update(&self, old: &Deployment, new: &Deployment) {
        let old = WorkloadSnapshot::from_deployment(old);
        let new = WorkloadSnapshot::from_deployment(new);
        let changes = WorkloadChanges::between(&old, &new);

        if let Some((from, to)) = changes.replicas {
            info!(
                name = %new.name,
                namespace = %new.namespace,
                "Replicas changed: {} -> {}",
                display_replicas(from),
                display_replicas(to)
            );
        }
        if let Some((from, to)) = &changes.images {
            info!(
                name = %new.name,
                namespace = %new.namespace,
                old_images = ?from,
                new_images = ?to,
                "Images changed"
            );
        }
        if changes.is_empty() {
            debug!(name = %new.name, namespace = %new.namespace, "Deployment updated");
        }

        self.queue.add(new.workload_ref());
    }

    /// Deletions are logged only. Derived resources are left in place.
    pub fn on_delete(&self, obj: &Deployment) {
        info!(
            name = %obj.name_any(),
            namespace = ?obj.namespace(),
            uid = ?obj.uid(),
            deleted = ?obj.metadata.deletion_timestamp.as_ref().map(|t| &t.0),
            "Deployment deleted"
        );
    }
}

fn display_replicas(replicas: Option<i32>) -> String {
    replicas.map_or_else(|| "unset".to_string(), |r| r.to_string())
}
