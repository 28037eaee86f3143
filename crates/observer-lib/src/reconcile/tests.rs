use super::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::enrich::{NodeStrategy, PodStrategy};
use crate::feed::MemoryFeed;
use crate::models::{
    NodeRecord, NodeSnapshot, PodPhase, PodRecord, PodSnapshot, UsageSample,
};
use crate::usage::{UsageError, UsageQuery};

struct FixedUsage;

#[async_trait]
impl UsageQuery for FixedUsage {
    async fn query_usage(
        &self,
        _namespace: &str,
        _pod: &str,
        _window: Duration,
    ) -> Result<UsageSample, UsageError> {
        Ok(UsageSample {
            cpu_milli: 150,
            memory_bytes: 95,
            sampled_at: Utc::now(),
        })
    }
}

struct NoData;

#[async_trait]
impl UsageQuery for NoData {
    async fn query_usage(
        &self,
        namespace: &str,
        pod: &str,
        _window: Duration,
    ) -> Result<UsageSample, UsageError> {
        Err(UsageError::NotFound {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        })
    }
}

/// Counts successful inserts, failing the first `fail_first` attempts.
struct CountingSink {
    attempts: AtomicU32,
    persisted: AtomicU32,
    fail_first: u32,
}

impl CountingSink {
    fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    fn failing_first(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            persisted: AtomicU32::new(0),
            fail_first,
        })
    }

    fn count(&self) -> u32 {
        self.persisted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Send + Sync + 'static> RecordSink<R> for CountingSink {
    async fn insert(&self, _record: &R) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(SinkError(anyhow::anyhow!("connection refused")));
        }
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn pod_snapshot(name: &str, phase: PodPhase) -> PodSnapshot {
    PodSnapshot {
        uid: format!("{name}-uid"),
        namespace: "ns1".to_string(),
        name: name.to_string(),
        phase,
        node_name: "node-1".to_string(),
        labels: HashMap::new(),
        owners: Vec::new(),
    }
}

fn node_snapshot(name: &str) -> NodeSnapshot {
    NodeSnapshot {
        uid: format!("{name}-uid"),
        name: name.to_string(),
        created_at: None,
        memory_bytes: 8_000_000_000,
        cpu_cores: 2,
        labels: HashMap::new(),
    }
}

fn pod_reconciler(
    feed: Arc<MemoryFeed<PodSnapshot>>,
    sink: Arc<CountingSink>,
    usage: Arc<dyn UsageQuery>,
) -> Arc<Reconciler<PodSnapshot, PodRecord>> {
    Reconciler::new(
        "pods",
        feed,
        Arc::new(PodStrategy::new(usage, Duration::from_secs(60))),
        sink,
        ReconcilerConfig::default(),
    )
}

#[tokio::test]
async fn pending_keys_coalesce_into_one_run() {
    let feed = MemoryFeed::<PodSnapshot>::new();
    feed.apply(pod_snapshot("pod-a", PodPhase::Running));
    feed.set_synced(true);

    let sink = CountingSink::new();
    let reconciler = pod_reconciler(
        Arc::clone(&feed),
        Arc::clone(&sink),
        Arc::new(FixedUsage),
    );

    let key = ResourceKey::namespaced("ns1", "pod-a");
    reconciler.enqueue(&key);
    reconciler.enqueue(&key);

    assert!(reconciler.process_next().await);
    assert_eq!(sink.count(), 1);
    assert!(reconciler.queue().is_empty());
}

#[tokio::test]
async fn missing_object_is_skipped_without_retry() {
    let feed = MemoryFeed::<PodSnapshot>::new();
    feed.set_synced(true);

    let sink = CountingSink::new();
    let reconciler = pod_reconciler(
        Arc::clone(&feed),
        Arc::clone(&sink),
        Arc::new(FixedUsage),
    );

    // Deleted between enqueue and dequeue: the key resolves to nothing.
    reconciler.enqueue(&ResourceKey::namespaced("ns1", "gone"));
    assert!(reconciler.process_next().await);

    assert_eq!(sink.count(), 0);
    assert!(reconciler.queue().is_empty());
    assert_eq!(reconciler.queue().failure_count("ns1/gone"), 0);
}

#[tokio::test]
async fn gated_pod_is_skipped_without_retry() {
    let feed = MemoryFeed::<PodSnapshot>::new();
    feed.apply(pod_snapshot("pod-p", PodPhase::Pending));
    feed.set_synced(true);

    let sink = CountingSink::new();
    let reconciler = pod_reconciler(
        Arc::clone(&feed),
        Arc::clone(&sink),
        Arc::new(FixedUsage),
    );

    reconciler.enqueue(&ResourceKey::namespaced("ns1", "pod-p"));
    assert!(reconciler.process_next().await);

    assert_eq!(sink.count(), 0);
    assert!(reconciler.queue().is_empty());
}

#[tokio::test]
async fn malformed_key_is_dropped_not_retried() {
    let feed = MemoryFeed::<PodSnapshot>::new();
    feed.set_synced(true);

    let sink = CountingSink::new();
    let reconciler = pod_reconciler(
        Arc::clone(&feed),
        Arc::clone(&sink),
        Arc::new(FixedUsage),
    );

    reconciler.queue().add("a/b/c");
    assert!(reconciler.process_next().await);

    assert_eq!(sink.count(), 0);
    assert!(reconciler.queue().is_empty());
    assert_eq!(reconciler.queue().failure_count("a/b/c"), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_usage_requeues_with_backoff() {
    let feed = MemoryFeed::<PodSnapshot>::new();
    feed.apply(pod_snapshot("pod-a", PodPhase::Running));
    feed.set_synced(true);

    let sink = CountingSink::new();
    let reconciler =
        pod_reconciler(Arc::clone(&feed), Arc::clone(&sink), Arc::new(NoData));

    reconciler.enqueue(&ResourceKey::namespaced("ns1", "pod-a"));
    assert!(reconciler.process_next().await);

    assert_eq!(sink.count(), 0);
    assert_eq!(reconciler.queue().failure_count("ns1/pod-a"), 1);

    // The delayed re-add lands once paused time passes the backoff.
    let requeued = reconciler.queue().get().await;
    assert_eq!(requeued.as_deref(), Some("ns1/pod-a"));
}

#[tokio::test(start_paused = true)]
async fn node_insert_failure_retries_until_persisted() {
    let feed = MemoryFeed::<NodeSnapshot>::new();
    feed.apply(node_snapshot("node-1"));
    feed.set_synced(true);

    let sink = CountingSink::failing_first(1);
    let reconciler = Reconciler::new(
        "nodes",
        Arc::clone(&feed) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        Arc::clone(&sink) as Arc<dyn RecordSink<NodeRecord>>,
        ReconcilerConfig::default(),
    );

    reconciler.enqueue(&ResourceKey::cluster_scoped("node-1"));
    assert!(reconciler.process_next().await);
    assert_eq!(sink.count(), 0);
    assert_eq!(reconciler.queue().failure_count("node-1"), 1);

    // Second pass picks up the backoff re-add and succeeds; success
    // clears the failure history.
    assert!(reconciler.process_next().await);
    assert_eq!(sink.count(), 1);
    assert_eq!(reconciler.queue().failure_count("node-1"), 0);
}

/// Strategy wrapper that re-adds its own key mid-flight, standing in
/// for an update arriving while the object is being reconciled.
struct ReAddOnce {
    queue: std::sync::Mutex<Option<Arc<DedupQueue>>>,
}

#[async_trait]
impl EnrichmentStrategy<NodeSnapshot, NodeRecord> for ReAddOnce {
    async fn enrich(
        &self,
        key: &ResourceKey,
        snapshot: NodeSnapshot,
    ) -> Result<Option<NodeRecord>, ReconcileError> {
        if let Some(queue) = self.queue.lock().unwrap().take() {
            queue.add(&key.to_string());
        }
        NodeStrategy.enrich(key, snapshot).await
    }
}

#[tokio::test]
async fn readd_during_flight_runs_exactly_once_more() {
    let feed = MemoryFeed::<NodeSnapshot>::new();
    feed.apply(node_snapshot("node-1"));
    feed.set_synced(true);

    let strategy = Arc::new(ReAddOnce {
        queue: std::sync::Mutex::new(None),
    });
    let sink = CountingSink::new();
    let reconciler = Reconciler::new(
        "nodes",
        Arc::clone(&feed) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::clone(&strategy) as Arc<dyn EnrichmentStrategy<NodeSnapshot, NodeRecord>>,
        Arc::clone(&sink) as Arc<dyn RecordSink<NodeRecord>>,
        ReconcilerConfig::default(),
    );
    *strategy.queue.lock().unwrap() = Some(Arc::clone(reconciler.queue()));

    reconciler.enqueue(&ResourceKey::cluster_scoped("node-1"));

    // First run re-adds the key mid-flight; done() releases it for
    // exactly one more attempt.
    assert!(reconciler.process_next().await);
    assert_eq!(sink.count(), 1);
    assert_eq!(reconciler.queue().len(), 1);

    assert!(reconciler.process_next().await);
    assert_eq!(sink.count(), 2);
    assert!(reconciler.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_cache_never_syncs() {
    let feed = MemoryFeed::<NodeSnapshot>::new();
    let reconciler = Reconciler::new(
        "nodes",
        Arc::clone(&feed) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        CountingSink::new() as Arc<dyn RecordSink<NodeRecord>>,
        ReconcilerConfig {
            sync_timeout: Duration::from_millis(50),
            ..ReconcilerConfig::default()
        },
    );

    let (_tx, rx) = broadcast::channel(1);
    let err = reconciler.start(rx).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn start_aborts_on_shutdown_during_sync_wait() {
    let feed = MemoryFeed::<NodeSnapshot>::new();
    let reconciler = Reconciler::new(
        "nodes",
        Arc::clone(&feed) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        CountingSink::new() as Arc<dyn RecordSink<NodeRecord>>,
        ReconcilerConfig::default(),
    );

    let (tx, rx) = broadcast::channel(1);
    tx.send(()).unwrap();
    let err = reconciler.start(rx).await.unwrap_err();
    assert!(err.to_string().contains("shutdown"));
}

#[tokio::test(start_paused = true)]
async fn joined_starts_wait_for_sync_concurrently() {
    let config = ReconcilerConfig {
        sync_timeout: Duration::from_secs(20),
        ..ReconcilerConfig::default()
    };

    // One cache syncs late, the other never does.
    let syncs_late = MemoryFeed::<NodeSnapshot>::new();
    let never_syncs = MemoryFeed::<NodeSnapshot>::new();
    {
        let feed = Arc::clone(&syncs_late);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            feed.set_synced(true);
        });
    }

    let first = Reconciler::new(
        "nodes-a",
        Arc::clone(&syncs_late) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        CountingSink::new() as Arc<dyn RecordSink<NodeRecord>>,
        config.clone(),
    );
    let second = Reconciler::new(
        "nodes-b",
        Arc::clone(&never_syncs) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        CountingSink::new() as Arc<dyn RecordSink<NodeRecord>>,
        config,
    );

    let (tx, _) = broadcast::channel(1);
    let started = tokio::time::Instant::now();
    let result = tokio::try_join!(
        first.start(tx.subscribe()),
        second.start(tx.subscribe()),
    );

    // The stalled barrier expires on its own clock: 20s from process
    // start, not 20s after the first reconciler's 15s wait finishes.
    assert!(result.is_err());
    assert_eq!(started.elapsed(), Duration::from_secs(20));

    let _ = tx.send(());
}

#[tokio::test(start_paused = true)]
async fn workers_drain_and_stop_on_shutdown() {
    let feed = MemoryFeed::<NodeSnapshot>::new();
    feed.apply(node_snapshot("node-1"));
    feed.apply(node_snapshot("node-2"));
    feed.set_synced(true);

    let sink = CountingSink::new();
    let reconciler = Reconciler::new(
        "nodes",
        Arc::clone(&feed) as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        Arc::clone(&sink) as Arc<dyn RecordSink<NodeRecord>>,
        ReconcilerConfig::default(),
    );

    reconciler.enqueue(&ResourceKey::cluster_scoped("node-1"));
    reconciler.enqueue(&ResourceKey::cluster_scoped("node-2"));

    let (tx, rx) = broadcast::channel(1);
    let handles = reconciler.start(rx).await.unwrap();

    while sink.count() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tx.send(()).unwrap();
    for handle in handles {
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    assert_eq!(sink.count(), 2);
    assert!(reconciler.queue().is_empty());
}
