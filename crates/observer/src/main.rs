//! Cluster cost observer - Kubernetes resource usage recorder
//!
//! This binary watches pods, nodes, workload owners, and services,
//! reconciles each change into a normalized record, and persists the
//! records for downstream cost attribution.

use anyhow::Result;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use observer_lib::enrich::{NodeStrategy, PodStrategy, ServiceStrategy, WorkloadStrategy};
use observer_lib::feed::{ChangeFeed, FeedEvent, MemoryFeed, WorkloadFeeds};
use observer_lib::models::{
    NodeSnapshot, PodSnapshot, ServiceSnapshot, Snapshot, WorkloadSnapshot,
};
use observer_lib::sink::{
    NodeSink, OwnerSink, PersistenceSink, PodSink, PostgresSink, ServiceSink,
};
use observer_lib::usage::{MetricsServerUsage, PrometheusUsage, UsageQuery};
use observer_lib::{Reconciler, ReconcilerConfig};

mod api;
mod config;
mod feeds;

use config::{ObserverConfig, UsageBackend};

/// Registers an enqueue hook: every apply (including the initial
/// listing) queues the object's key. Deletes never enqueue; a deleted
/// object simply stops resolving.
fn enqueue_on_apply<S, R>(feed: &MemoryFeed<S>, reconciler: &Arc<Reconciler<S, R>>)
where
    S: Snapshot,
    R: Send + Sync + 'static,
{
    let reconciler = Arc::clone(reconciler);
    feed.add_event_handler(Arc::new(move |event: &FeedEvent<S>| {
        if let FeedEvent::Applied(snapshot) = event {
            reconciler.enqueue(&snapshot.key());
        }
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cost-observer");

    let config = ObserverConfig::load()?;
    info!(
        api_port = config.api_port,
        usage_backend = ?config.usage_backend,
        "Observer configured"
    );

    // Record store
    let postgres = PostgresSink::connect(&config.database_url).await?;
    postgres.ensure_schema().await?;
    let sink: Arc<dyn PersistenceSink> = Arc::new(postgres);

    // Usage backend for pod reconciliation
    let usage: Arc<dyn UsageQuery> = match config.usage_backend {
        UsageBackend::Prometheus => Arc::new(PrometheusUsage::new(Url::parse(
            &config.prometheus_url,
        )?)?),
        UsageBackend::MetricsServer => Arc::new(MetricsServerUsage::new(
            Url::parse(&config.metrics_api_url)?,
            config.metrics_api_token.clone(),
        )?),
    };

    let client = Client::try_default().await?;

    // One cache per watched kind
    let pods = MemoryFeed::<PodSnapshot>::new();
    let nodes = MemoryFeed::<NodeSnapshot>::new();
    let services = MemoryFeed::<ServiceSnapshot>::new();
    let daemon_sets = MemoryFeed::<WorkloadSnapshot>::new();
    let deployments = MemoryFeed::<WorkloadSnapshot>::new();
    let stateful_sets = MemoryFeed::<WorkloadSnapshot>::new();
    let replica_sets = MemoryFeed::<WorkloadSnapshot>::new();
    let workloads = WorkloadFeeds::new(
        daemon_sets.clone(),
        deployments.clone(),
        stateful_sets.clone(),
        replica_sets.clone(),
    );

    let engine_config = ReconcilerConfig {
        workers: config.workers,
        sync_timeout: Duration::from_secs(config.sync_timeout_secs),
        ..ReconcilerConfig::default()
    };

    let pod_reconciler = Reconciler::new(
        "pods",
        pods.clone() as Arc<dyn ChangeFeed<PodSnapshot>>,
        Arc::new(PodStrategy::new(
            usage,
            Duration::from_secs(config.usage_window_secs),
        )),
        Arc::new(PodSink(Arc::clone(&sink))),
        engine_config.clone(),
    );
    let node_reconciler = Reconciler::new(
        "nodes",
        nodes.clone() as Arc<dyn ChangeFeed<NodeSnapshot>>,
        Arc::new(NodeStrategy),
        Arc::new(NodeSink(Arc::clone(&sink))),
        engine_config.clone(),
    );
    let workload_reconciler = Reconciler::new(
        "workloads",
        workloads.clone() as Arc<dyn ChangeFeed<WorkloadSnapshot>>,
        Arc::new(WorkloadStrategy),
        Arc::new(OwnerSink(Arc::clone(&sink))),
        engine_config.clone(),
    );
    let service_reconciler = Reconciler::new(
        "services",
        services.clone() as Arc<dyn ChangeFeed<ServiceSnapshot>>,
        Arc::new(ServiceStrategy),
        Arc::new(ServiceSink(Arc::clone(&sink))),
        engine_config,
    );

    enqueue_on_apply(&pods, &pod_reconciler);
    enqueue_on_apply(&nodes, &node_reconciler);
    enqueue_on_apply(&services, &service_reconciler);
    // All four workload kinds funnel into one reconciler; the feed
    // composite resolves the kind at dequeue time.
    for feed in [&daemon_sets, &deployments, &stateful_sets, &replica_sets] {
        enqueue_on_apply(feed, &workload_reconciler);
    }

    feeds::spawn_watch::<Pod, _, _>(client.clone(), pods.clone(), feeds::pod_snapshot);
    feeds::spawn_watch::<Node, _, _>(client.clone(), nodes.clone(), feeds::node_snapshot);
    feeds::spawn_watch::<Service, _, _>(client.clone(), services.clone(), feeds::service_snapshot);
    feeds::spawn_watch::<DaemonSet, _, _>(
        client.clone(),
        daemon_sets.clone(),
        feeds::daemon_set_snapshot,
    );
    feeds::spawn_watch::<Deployment, _, _>(
        client.clone(),
        deployments.clone(),
        feeds::deployment_snapshot,
    );
    feeds::spawn_watch::<StatefulSet, _, _>(
        client.clone(),
        stateful_sets.clone(),
        feeds::stateful_set_snapshot,
    );
    feeds::spawn_watch::<ReplicaSet, _, _>(
        client,
        replica_sets.clone(),
        feeds::replica_set_snapshot,
    );

    // Health and metrics server; readiness mirrors feed sync state
    let app_state = Arc::new(api::AppState {
        probes: vec![
            feed_probe("pods", pods),
            feed_probe("nodes", nodes),
            feed_probe("services", services),
            feed_probe("workloads", workloads),
        ],
    });
    tokio::spawn(api::serve(config.api_port, app_state));

    // Each reconciler waits on its own cache-sync barrier; start them
    // concurrently so no kind blocks behind another's sync.
    let (shutdown_tx, _) = broadcast::channel(1);
    let (pod_handles, node_handles, workload_handles, service_handles) = tokio::try_join!(
        pod_reconciler.start(shutdown_tx.subscribe()),
        node_reconciler.start(shutdown_tx.subscribe()),
        workload_reconciler.start(shutdown_tx.subscribe()),
        service_reconciler.start(shutdown_tx.subscribe()),
    )?;
    let mut handles = Vec::new();
    handles.extend(pod_handles);
    handles.extend(node_handles);
    handles.extend(workload_handles);
    handles.extend(service_handles);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

fn feed_probe<S: Send + Sync + 'static>(
    name: &str,
    feed: Arc<impl ChangeFeed<S> + 'static>,
) -> api::ReadinessProbe {
    api::ReadinessProbe::new(name, Arc::new(move || feed.has_synced()))
}
