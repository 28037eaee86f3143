//! Deduplicating, rate-limited work queue.
//!
//! Keys are `namespace/name` (or bare `name`) strings. The queue
//! guarantees at most one in-flight reconciliation per key: a key
//! added while its predecessor is processing is deferred and re-queued
//! when `done` releases it, never run concurrently.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Per-key backoff defaults, matching the upstream controller rate
/// limiter (5 ms base doubling up to 1000 s).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

#[derive(Default)]
struct Inner {
    /// Keys ready to be handed to a worker, FIFO.
    queue: VecDeque<String>,
    /// Keys that need processing (pending or deferred behind a
    /// processing predecessor).
    dirty: HashSet<String>,
    /// Keys currently held by a worker.
    processing: HashSet<String>,
    /// Consecutive failure count per key, cleared by `forget`.
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

/// Rate-limited dedup work queue, one per reconciler.
pub struct DedupQueue {
    name: String,
    inner: Mutex<Inner>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl DedupQueue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_backoff(name, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_backoff(
        name: impl Into<String>,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            base_delay,
            max_delay,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a key unless it is already pending. A key whose
    /// predecessor is still processing is marked dirty and re-queued
    /// by `done`, preserving at-most-one-in-flight.
    pub fn add(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutting_down || inner.dirty.contains(key) {
            return;
        }
        inner.dirty.insert(key.to_string());
        if inner.processing.contains(key) {
            return;
        }
        inner.queue.push_back(key.to_string());
        drop(inner);
        self.notify.notify_one();
    }

    /// Blocks until a key is available and marks it processing.
    /// Returns `None` once the queue is shut down and drained of
    /// waiters.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking state so a notify
            // issued between the check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Releases the in-flight lock for a key. If the key was added
    /// again while processing, it is re-queued for exactly one more
    /// attempt.
    pub fn done(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Clears the retry backoff state for a key.
    pub fn forget(&self, key: &str) {
        self.inner.lock().unwrap().failures.remove(key);
    }

    /// Re-enqueues a key after an exponentially increasing delay.
    /// Delayed re-adds scheduled before shutdown are abandoned with
    /// the task runtime; none are guaranteed to run before exit.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            let attempts = inner.failures.entry(key.to_string()).or_insert(0);
            let delay = backoff_delay(self.base_delay, self.max_delay, *attempts);
            *attempts += 1;
            delay
        };

        debug!(queue = %self.name, key, delay_ms = delay.as_millis() as u64, "requeue after backoff");

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Number of consecutive failures recorded for a key.
    pub fn failure_count(&self, key: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Keys ready for pickup (excludes in-flight and deferred keys).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Permanently unblocks all `get` callers. Further adds are
    /// ignored.
    pub fn shut_down(&self) {
        self.inner.lock().unwrap().shutting_down = true;
        self.notify.notify_waiters();
    }
}

/// Exponential backoff: `base * 2^attempts`, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.min(31));
    base.saturating_mul(factor).min(max)
}
