//! The generic reconciliation engine.
//!
//! One reconciler instance owns a dedup queue and a fixed pool of
//! worker tasks. Each worker loops through the same cycle: block on
//! the queue, resolve the key against the change-feed cache, run the
//! kind-specific enrichment strategy, hand the record to the
//! persistence sink, then settle the attempt back into the queue
//! (forget on success, rate-limited re-add on failure). The queue's
//! at-most-one-in-flight-per-key guarantee is the only serialization
//! point; everything else is shared-read.

#[cfg(test)]
mod tests;

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::enrich::EnrichmentStrategy;
use crate::feed::ChangeFeed;
use crate::metrics::ObserverMetrics;
use crate::models::ResourceKey;
use crate::queue::DedupQueue;
use crate::sink::{RecordSink, SinkError};

/// Why a reconciliation attempt failed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The queue yielded something that is not a `namespace/name` or
    /// `name` token. Logged and dropped, never retried.
    #[error("malformed key {key:?}")]
    MalformedKey { key: String },

    /// The usage backend has nothing for this key yet. Retried with
    /// backoff like any transient failure.
    #[error("no usage data yet for {key}")]
    NoUsageData { key: ResourceKey },

    /// The usage backend call itself failed.
    #[error("usage query failed for {key}: {source}")]
    UsageQuery {
        key: ResourceKey,
        #[source]
        source: anyhow::Error,
    },

    /// The persistence sink rejected the record.
    #[error("persist failed for {key}: {source}")]
    Persist {
        key: ResourceKey,
        #[source]
        source: SinkError,
    },
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::MalformedKey { .. })
    }
}

/// What a single successful attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A record was computed and persisted.
    Persisted,
    /// Object gone between enqueue and dequeue, or gated by lifecycle
    /// phase. Settled silently, no retry.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Worker tasks pinned to this reconciler's queue.
    pub workers: usize,
    /// How long to wait for the change feed's initial sync before
    /// failing startup.
    pub sync_timeout: Duration,
    /// Poll interval while waiting for the sync barrier.
    pub sync_poll: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            sync_timeout: Duration::from_secs(60),
            sync_poll: Duration::from_millis(100),
        }
    }
}

/// One reconciler: a queue, a feed, a strategy, and a sink, shared by
/// a pool of worker tasks. All collaborators are injected at
/// construction time.
pub struct Reconciler<S, R> {
    name: String,
    feed: Arc<dyn ChangeFeed<S>>,
    strategy: Arc<dyn EnrichmentStrategy<S, R>>,
    sink: Arc<dyn RecordSink<R>>,
    queue: Arc<DedupQueue>,
    config: ReconcilerConfig,
    metrics: ObserverMetrics,
}

impl<S, R> Reconciler<S, R>
where
    S: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        feed: Arc<dyn ChangeFeed<S>>,
        strategy: Arc<dyn EnrichmentStrategy<S, R>>,
        sink: Arc<dyn RecordSink<R>>,
        config: ReconcilerConfig,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            queue: DedupQueue::new(name.clone()),
            metrics: ObserverMetrics::new(),
            name,
            feed,
            strategy,
            sink,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Arc<DedupQueue> {
        &self.queue
    }

    /// Queues a key for reconciliation. Safe to call from feed event
    /// handlers; duplicate pending keys coalesce.
    pub fn enqueue(&self, key: &ResourceKey) {
        self.queue.add(&key.to_string());
    }

    /// Waits for the change feed's cache to sync, then spawns the
    /// worker pool. Fails fast, with no workers started, if the sync
    /// wait times out or shutdown fires first.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut on_shutdown = shutdown.resubscribe();
        self.wait_for_sync(shutdown).await?;

        info!(
            reconciler = %self.name,
            workers = self.config.workers,
            "cache synced, starting workers"
        );

        let mut handles = Vec::with_capacity(self.config.workers + 1);
        for _ in 0..self.config.workers {
            handles.push(tokio::spawn(Arc::clone(self).worker_loop()));
        }

        // Shutdown translates into a queue shutdown, which drains the
        // worker loops. Backoff re-adds in flight are abandoned.
        let queue = Arc::clone(&self.queue);
        handles.push(tokio::spawn(async move {
            let _ = on_shutdown.recv().await;
            queue.shut_down();
        }));

        Ok(handles)
    }

    async fn wait_for_sync(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(reconciler = %self.name, "waiting for cache sync");
        let deadline = tokio::time::Instant::now() + self.config.sync_timeout;

        while !self.feed.has_synced() {
            tokio::select! {
                _ = shutdown.recv() => {
                    bail!("shutdown while waiting for {} cache sync", self.name);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    bail!("timed out waiting for {} cache sync", self.name);
                }
                _ = tokio::time::sleep(self.config.sync_poll) => {}
            }
        }
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>) {
        while self.process_next().await {}
        debug!(reconciler = %self.name, "worker stopped");
    }

    /// One turn of the worker state machine. Returns false once the
    /// queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(raw) = self.queue.get().await else {
            return false;
        };
        let started = Instant::now();

        match self.reconcile(&raw).await {
            Ok(Outcome::Persisted) => {
                self.metrics.observe_success(&self.name);
                debug!(reconciler = %self.name, key = %raw, "synced");
                self.queue.forget(&raw);
            }
            Ok(Outcome::Skipped) => {
                self.metrics.observe_skip(&self.name);
                self.queue.forget(&raw);
            }
            Err(err @ ReconcileError::MalformedKey { .. }) => {
                self.metrics.observe_failure(&self.name);
                error!(reconciler = %self.name, %err, "dropping unusable key");
                self.queue.forget(&raw);
            }
            Err(err) => {
                self.metrics.observe_failure(&self.name);
                self.metrics.observe_retry(&self.name);
                warn!(reconciler = %self.name, key = %raw, %err, "reconcile failed, requeuing");
                self.queue.add_rate_limited(&raw);
            }
        }

        self.queue.done(&raw);
        self.metrics
            .observe_latency(&self.name, started.elapsed().as_secs_f64());
        self.metrics
            .set_queue_depth(&self.name, self.queue.len() as i64);
        true
    }

    async fn reconcile(&self, raw: &str) -> Result<Outcome, ReconcileError> {
        let key = ResourceKey::parse(raw).map_err(|_| ReconcileError::MalformedKey {
            key: raw.to_string(),
        })?;

        // Resolving: an object deleted between enqueue and dequeue is
        // a terminal success for this attempt, not an error.
        let Some(snapshot) = self.feed.get_by_key(&key) else {
            debug!(reconciler = %self.name, %key, "object gone, skipping");
            return Ok(Outcome::Skipped);
        };

        let Some(record) = self.strategy.enrich(&key, snapshot).await? else {
            return Ok(Outcome::Skipped);
        };

        self.sink
            .insert(&record)
            .await
            .map_err(|source| ReconcileError::Persist {
                key: key.clone(),
                source,
            })?;

        Ok(Outcome::Persisted)
    }
}
