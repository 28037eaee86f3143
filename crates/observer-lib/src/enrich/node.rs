//! Node enrichment: capacity plus the topology/runtime label subset.

use async_trait::async_trait;
use chrono::Utc;

use super::EnrichmentStrategy;
use crate::labels::node_label_summary;
use crate::models::{NodeRecord, NodeSnapshot, ResourceKey};
use crate::reconcile::ReconcileError;

/// No phase gate and no usage query; every node snapshot qualifies.
pub struct NodeStrategy;

#[async_trait]
impl EnrichmentStrategy<NodeSnapshot, NodeRecord> for NodeStrategy {
    async fn enrich(
        &self,
        _key: &ResourceKey,
        snapshot: NodeSnapshot,
    ) -> Result<Option<NodeRecord>, ReconcileError> {
        Ok(Some(NodeRecord {
            name: snapshot.name,
            record_time: Utc::now(),
            created_at: snapshot.created_at,
            uid: snapshot.uid,
            memory_bytes: snapshot.memory_bytes,
            cpu_cores: snapshot.cpu_cores,
            labels: node_label_summary(&snapshot.labels),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn capacity_and_label_subset() {
        let mut labels = HashMap::new();
        labels.insert(
            "node.kubernetes.io/instance-type".to_string(),
            "m5.large".to_string(),
        );
        labels.insert("kubernetes.io/os".to_string(), "linux".to_string());
        labels.insert("irrelevant".to_string(), "dropped".to_string());

        let snapshot = NodeSnapshot {
            uid: "node-uid".to_string(),
            name: "node-1".to_string(),
            created_at: None,
            memory_bytes: 16_000_000_000,
            cpu_cores: 4,
            labels,
        };

        let key = ResourceKey::cluster_scoped("node-1");
        let record = NodeStrategy.enrich(&key, snapshot).await.unwrap().unwrap();

        assert_eq!(record.memory_bytes, 16_000_000_000);
        assert_eq!(record.cpu_cores, 4);
        assert_eq!(
            record.labels,
            "node.kubernetes.io/instance-type=m5.large,\
             topology.kubernetes.io/region,\
             topology.kubernetes.io/zone,\
             kubernetes.io/os=linux"
        );
    }
}
