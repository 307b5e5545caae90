//! Deferred re-adds for the work queue.
//!
//! A single task owns a [`DelayQueue`]. Scheduling a key that is already
//! waiting keeps the earlier deadline, so a key never fires twice for one
//! wait.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;
use tracing::debug;

use super::QueueKey;

enum Command<K> {
    Schedule(K, Duration),
    Stop,
}

pub(super) struct RequeueScheduler<K> {
    tx: mpsc::UnboundedSender<Command<K>>,
}

impl<K: QueueKey> RequeueScheduler<K> {
    /// Spawn the scheduling task. `on_ready` runs for each key whose delay expires.
    pub(super) fn spawn<F>(on_ready: F) -> Self
    where
        F: Fn(K) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, on_ready));
        Self { tx }
    }

    pub(super) fn schedule(&self, key: K, delay: Duration) {
        // A closed channel means the task has stopped; late requeues are dropped.
        let _ = self.tx.send(Command::Schedule(key, delay));
    }

    pub(super) fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

async fn run<K, F>(mut rx: mpsc::UnboundedReceiver<Command<K>>, on_ready: F)
where
    K: QueueKey,
    F: Fn(K),
{
    let mut delays: DelayQueue<K> = DelayQueue::new();
    let mut waiting: HashMap<K, (Key, Instant)> = HashMap::new();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule(key, delay)) => {
                    let deadline = Instant::now() + delay;
                    match waiting.entry(key) {
                        Entry::Occupied(mut entry) => {
                            let (slot, current) = entry.get_mut();
                            if deadline < *current {
                                delays.reset_at(slot, deadline);
                                *current = deadline;
                            }
                        }
                        Entry::Vacant(entry) => {
                            let slot = delays.insert_at(entry.key().clone(), deadline);
                            entry.insert((slot, deadline));
                        }
                    }
                }
                Some(Command::Stop) | None => break,
            },
            Some(expired) = delays.next(), if !delays.is_empty() => {
                let key = expired.into_inner();
                waiting.remove(&key);
                on_ready(key);
            }
        }
    }

    debug!(pending = waiting.len(), "Requeue scheduler stopped");
}
