//! Deduplicating, rate-limited work queue.
//!
//! Built from two cooperating pieces:
//! - an immediate queue (FIFO plus `dirty` and `processing` sets) that hands
//!   each key to at most one worker at a time, and
//! - a [`scheduler`] task that holds keys for a backoff delay before feeding
//!   them back through [`WorkQueue::add`].
//!
//! Semantics follow the usual controller queue contract:
//! - adding a key that is already waiting is a no-op,
//! - adding a key that is being processed parks it until [`WorkQueue::done`],
//! - [`WorkQueue::get`] resolves to `None` once the queue is shut down.

mod rate_limiter;
mod scheduler;

pub use rate_limiter::ExponentialBackoff;

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use scheduler::RequeueScheduler;

/// Bounds required of queue keys.
pub trait QueueKey: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static {}

impl<K> QueueKey for K where K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static {}

/// Handle to a shared work queue. Clones refer to the same queue.
pub struct WorkQueue<K: QueueKey> {
    shared: Arc<Shared<K>>,
}

struct Shared<K: QueueKey> {
    state: Mutex<State<K>>,
    notify: Notify,
    scheduler: RequeueScheduler<K>,
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    backoff: ExponentialBackoff<K>,
    shutting_down: bool,
}

impl<K: QueueKey> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create a queue with the default per-key backoff.
    ///
    /// Must be called from within a Tokio runtime: the requeue scheduler is
    /// spawned immediately.
    pub fn new() -> Self {
        Self::with_backoff(ExponentialBackoff::default())
    }

    pub fn with_backoff(backoff: ExponentialBackoff<K>) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<K>>| {
            let weak = weak.clone();
            let scheduler = RequeueScheduler::spawn(move |key: K| {
                if let Some(shared) = weak.upgrade() {
                    WorkQueue { shared }.add(key);
                }
            });
            Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    backoff,
                    shutting_down: false,
                }),
                notify: Notify::new(),
                scheduler,
            }
        });
        Self { shared }
    }

    /// Mark a key as needing processing.
    pub fn add(&self, key: K) {
        let mut state = self.shared.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "Key is in flight, deferring until done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish processing a key. A key re-added while in flight is queued again.
    pub fn done(&self, key: &K) {
        let mut state = self.shared.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Reset the backoff for a key after it was processed successfully.
    pub fn forget(&self, key: &K) {
        self.shared.state.lock().backoff.forget(key);
    }

    /// Re-add a key after its next exponential backoff delay.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.state.lock().backoff.next_delay(&key);
        self.add_after(key, delay);
    }

    /// Re-add a key after `delay`.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        trace!(?key, ?delay, "Scheduling requeue");
        self.shared.scheduler.schedule(key, delay);
    }

    /// Number of rate-limited requeues since the key was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared.state.lock().backoff.failures(key)
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out work. Pending and delayed keys are dropped.
    pub fn shut_down(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.shared.scheduler.stop();
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
