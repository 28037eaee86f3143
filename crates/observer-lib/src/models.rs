//! Core data models for the cluster cost observer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::labels::AppLabels;

/// Raised when a work-queue token does not parse as `namespace/name`
/// or `name`. A malformed key is dropped, never retried.
#[derive(Debug, Clone, Error)]
#[error("malformed resource key: {0:?}")]
pub struct MalformedKey(pub String);

/// Identifier of a watched object, used as the dedup-queue token.
///
/// The namespace is empty for cluster-scoped kinds (nodes). Equality
/// on the rendered `namespace/name` string is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object (no namespace).
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Parses a queue token back into a key.
    ///
    /// Accepts `name` (cluster-scoped) and `namespace/name`. Anything
    /// else, including an empty name, is malformed.
    pub fn parse(raw: &str) -> Result<Self, MalformedKey> {
        let mut parts = raw.splitn(3, '/');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) if !first.is_empty() => Ok(Self::cluster_scoped(first)),
            (Some(name), None) if !first.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(first, name))
            }
            _ => Err(MalformedKey(raw.to_string())),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Back-pointer from a managed object to the controller that created it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// Picks the owner reference a record is attributed to: the first one
/// in the list with a non-empty name. Objects can carry several owners
/// (e.g. a ReplicaSet owned by a Deployment plus an adoption
/// controller); only the first named one is kept.
pub fn first_owner(owners: &[OwnerRef]) -> Option<&OwnerRef> {
    owners.iter().find(|o| !o.name.is_empty())
}

/// Pod lifecycle phase as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, PodPhase::Running)
    }
}

/// Workload owner kinds, listed in reconciliation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
    ReplicaSet,
}

impl WorkloadKind {
    /// Probe order for workload lookup: the first matching kind wins.
    pub const PRIORITY: [WorkloadKind; 4] = [
        WorkloadKind::DaemonSet,
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::ReplicaSet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::ReplicaSet => "ReplicaSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a watched object as held by a change-feed
/// cache. The engine only ever reads a consistent clone per attempt.
pub trait Snapshot: Clone + Send + Sync + 'static {
    fn key(&self) -> ResourceKey;
}

/// Pod view from the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    pub node_name: String,
    pub labels: HashMap<String, String>,
    pub owners: Vec<OwnerRef>,
}

impl Snapshot for PodSnapshot {
    fn key(&self) -> ResourceKey {
        ResourceKey::namespaced(&self.namespace, &self.name)
    }
}

/// Node view from the change feed. Cluster-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub uid: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Memory capacity in bytes.
    pub memory_bytes: i64,
    /// CPU capacity in whole cores, rounded up.
    pub cpu_cores: i64,
    pub labels: HashMap<String, String>,
}

impl Snapshot for NodeSnapshot {
    fn key(&self) -> ResourceKey {
        ResourceKey::cluster_scoped(&self.name)
    }
}

/// Workload owner view (DaemonSet/Deployment/StatefulSet/ReplicaSet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub kind: WorkloadKind,
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub owners: Vec<OwnerRef>,
}

impl Snapshot for WorkloadSnapshot {
    fn key(&self) -> ResourceKey {
        ResourceKey::namespaced(&self.namespace, &self.name)
    }
}

/// Service view from the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub selector: HashMap<String, String>,
}

impl Snapshot for ServiceSnapshot {
    fn key(&self) -> ResourceKey {
        ResourceKey::namespaced(&self.namespace, &self.name)
    }
}

/// Resource consumption of one pod, summed across its containers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub cpu_milli: i64,
    pub memory_bytes: i64,
    pub sampled_at: DateTime<Utc>,
}

/// Normalized pod record handed to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub record_time: DateTime<Utc>,
    pub node_name: String,
    pub own_uid: String,
    pub owner: Option<OwnerRef>,
    pub labels: String,
    pub app: AppLabels,
    pub usage: UsageSample,
}

/// Normalized node record handed to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub record_time: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub uid: String,
    pub memory_bytes: i64,
    pub cpu_cores: i64,
    pub labels: String,
}

/// Normalized workload-owner record handed to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub name: String,
    pub namespace: String,
    pub record_time: DateTime<Utc>,
    pub own_version: String,
    pub own_kind: WorkloadKind,
    pub own_uid: String,
    pub owner: Option<OwnerRef>,
    pub labels: String,
}

/// Normalized service record handed to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    pub record_time: DateTime<Utc>,
    pub uid: String,
    pub app_label: String,
    pub labels: String,
    pub selector: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parse_namespaced() {
        let key = ResourceKey::parse("ns1/pod-a").unwrap();
        assert_eq!(key.namespace, "ns1");
        assert_eq!(key.name, "pod-a");
        assert_eq!(key.to_string(), "ns1/pod-a");
    }

    #[test]
    fn key_parse_cluster_scoped() {
        let key = ResourceKey::parse("node-1").unwrap();
        assert!(key.namespace.is_empty());
        assert_eq!(key.name, "node-1");
        assert_eq!(key.to_string(), "node-1");
    }

    #[test]
    fn key_parse_rejects_garbage() {
        assert!(ResourceKey::parse("").is_err());
        assert!(ResourceKey::parse("a/b/c").is_err());
        assert!(ResourceKey::parse("ns1/").is_err());
        assert!(ResourceKey::parse("/pod-a").is_err());
    }

    #[test]
    fn key_round_trips_through_display() {
        for raw in ["ns1/pod-a", "node-1"] {
            let key = ResourceKey::parse(raw).unwrap();
            assert_eq!(ResourceKey::parse(&key.to_string()).unwrap(), key);
        }
    }

    #[test]
    fn first_owner_skips_empty_names() {
        let owners = vec![
            OwnerRef {
                name: String::new(),
                ..Default::default()
            },
            OwnerRef {
                api_version: "apps/v1".into(),
                kind: "ReplicaSet".into(),
                name: "rs-1".into(),
                uid: "u-1".into(),
            },
            OwnerRef {
                api_version: "apps/v1".into(),
                kind: "ReplicaSet".into(),
                name: "rs-2".into(),
                uid: "u-2".into(),
            },
        ];

        assert_eq!(first_owner(&owners).unwrap().name, "rs-1");
    }

    #[test]
    fn first_owner_empty_list() {
        assert!(first_owner(&[]).is_none());
    }

    #[test]
    fn workload_priority_order() {
        assert_eq!(WorkloadKind::PRIORITY[0], WorkloadKind::DaemonSet);
        assert_eq!(WorkloadKind::PRIORITY[3], WorkloadKind::ReplicaSet);
    }

    #[test]
    fn pod_phase_parse() {
        assert!(PodPhase::parse("Running").is_running());
        assert!(!PodPhase::parse("Pending").is_running());
        assert_eq!(PodPhase::parse("something-else"), PodPhase::Unknown);
    }
}
