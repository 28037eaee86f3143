//! Bridges cluster watches into the in-memory change feeds.
//!
//! One watch task per kind. Applied objects are converted into the
//! library's snapshot types and pushed into a [`MemoryFeed`]; the
//! initial listing (`Restarted`) replaces the cache wholesale and marks
//! the feed synced. Objects that fail conversion (no name yet, half
//! created) are skipped until the next update.

use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::ObjectMeta;
use kube::runtime::watcher;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use observer_lib::feed::MemoryFeed;
use observer_lib::models::{
    NodeSnapshot, OwnerRef, PodPhase, PodSnapshot, ResourceKey, ServiceSnapshot, Snapshot,
    WorkloadKind, WorkloadSnapshot,
};
use observer_lib::usage::quantity::{parse_cpu_cores_ceil, parse_memory_bytes};

/// Spawns a watch task feeding one cache. Runs until the process
/// exits; watch errors are logged and the watcher resumes on its own.
pub fn spawn_watch<K, S, F>(
    client: Client,
    feed: Arc<MemoryFeed<S>>,
    convert: F,
) -> JoinHandle<()>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
    S: Snapshot,
    F: Fn(&K) -> Option<S> + Send + Sync + 'static,
{
    let api: Api<K> = Api::all(client);
    tokio::spawn(async move {
        run_watch(api, feed, convert).await;
    })
}

async fn run_watch<K, S, F>(api: Api<K>, feed: Arc<MemoryFeed<S>>, convert: F)
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
    S: Snapshot,
    F: Fn(&K) -> Option<S> + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let mut stream = std::pin::pin!(watcher(api, watcher::Config::default()));

    loop {
        match stream.try_next().await {
            Ok(Some(watcher::Event::Applied(object))) => {
                if let Some(snapshot) = convert(&object) {
                    feed.apply(snapshot);
                }
            }
            Ok(Some(watcher::Event::Deleted(object))) => {
                if let Some(key) = object_key(&object) {
                    feed.delete(&key);
                }
            }
            Ok(Some(watcher::Event::Restarted(objects))) => {
                let snapshots: Vec<S> = objects.iter().filter_map(&convert).collect();
                debug!(kind = %kind, count = snapshots.len(), "watch restarted, cache replaced");
                feed.replace(snapshots);
                feed.set_synced(true);
            }
            Ok(None) => {
                warn!(kind = %kind, "watch stream ended");
                return;
            }
            Err(err) => {
                warn!(kind = %kind, error = %err, "watch error, will resume");
            }
        }
    }
}

fn object_key<K: kube::Resource<DynamicType = ()>>(object: &K) -> Option<ResourceKey> {
    let name = object.meta().name.clone()?;
    Some(match object.meta().namespace.clone() {
        Some(namespace) => ResourceKey::namespaced(namespace, name),
        None => ResourceKey::cluster_scoped(name),
    })
}

fn meta_labels(meta: &ObjectMeta) -> HashMap<String, String> {
    meta.labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect()
}

fn meta_owners(meta: &ObjectMeta) -> Vec<OwnerRef> {
    meta.owner_references
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|owner| OwnerRef {
            api_version: owner.api_version,
            kind: owner.kind,
            name: owner.name,
            uid: owner.uid,
        })
        .collect()
}

pub fn pod_snapshot(pod: &Pod) -> Option<PodSnapshot> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod.metadata.namespace.clone()?;
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or("");

    Some(PodSnapshot {
        uid: pod.metadata.uid.clone().unwrap_or_default(),
        namespace,
        name,
        phase: PodPhase::parse(phase),
        node_name: pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.clone())
            .unwrap_or_default(),
        labels: meta_labels(&pod.metadata),
        owners: meta_owners(&pod.metadata),
    })
}

pub fn node_snapshot(node: &Node) -> Option<NodeSnapshot> {
    let name = node.metadata.name.clone()?;
    let capacity = node
        .status
        .as_ref()
        .and_then(|status| status.capacity.as_ref());

    Some(NodeSnapshot {
        uid: node.metadata.uid.clone().unwrap_or_default(),
        name,
        created_at: node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|time| time.0),
        memory_bytes: capacity
            .and_then(|c| c.get("memory"))
            .and_then(|quantity| parse_memory_bytes(&quantity.0))
            .unwrap_or(0),
        cpu_cores: capacity
            .and_then(|c| c.get("cpu"))
            .and_then(|quantity| parse_cpu_cores_ceil(&quantity.0))
            .unwrap_or(0),
        labels: meta_labels(&node.metadata),
    })
}

pub fn service_snapshot(service: &Service) -> Option<ServiceSnapshot> {
    let name = service.metadata.name.clone()?;
    let namespace = service.metadata.namespace.clone()?;

    Some(ServiceSnapshot {
        uid: service.metadata.uid.clone().unwrap_or_default(),
        namespace,
        name,
        labels: meta_labels(&service.metadata),
        selector: service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.clone())
            .unwrap_or_default()
            .into_iter()
            .collect(),
    })
}

fn workload_snapshot(kind: WorkloadKind, meta: &ObjectMeta) -> Option<WorkloadSnapshot> {
    let name = meta.name.clone()?;
    let namespace = meta.namespace.clone()?;

    Some(WorkloadSnapshot {
        kind,
        uid: meta.uid.clone().unwrap_or_default(),
        namespace,
        name,
        labels: meta_labels(meta),
        owners: meta_owners(meta),
    })
}

pub fn daemon_set_snapshot(object: &DaemonSet) -> Option<WorkloadSnapshot> {
    workload_snapshot(WorkloadKind::DaemonSet, &object.metadata)
}

pub fn deployment_snapshot(object: &Deployment) -> Option<WorkloadSnapshot> {
    workload_snapshot(WorkloadKind::Deployment, &object.metadata)
}

pub fn stateful_set_snapshot(object: &StatefulSet) -> Option<WorkloadSnapshot> {
    workload_snapshot(WorkloadKind::StatefulSet, &object.metadata)
}

pub fn replica_set_snapshot(object: &ReplicaSet) -> Option<WorkloadSnapshot> {
    workload_snapshot(WorkloadKind::ReplicaSet, &object.metadata)
}
