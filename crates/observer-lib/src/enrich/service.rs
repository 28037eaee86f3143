//! Service enrichment: identity, derived app label, and the label and
//! selector summaries.

use async_trait::async_trait;
use chrono::Utc;

use super::EnrichmentStrategy;
use crate::labels::{find_app_label, label_summary};
use crate::models::{ResourceKey, ServiceRecord, ServiceSnapshot};
use crate::reconcile::ReconcileError;

pub struct ServiceStrategy;

#[async_trait]
impl EnrichmentStrategy<ServiceSnapshot, ServiceRecord> for ServiceStrategy {
    async fn enrich(
        &self,
        _key: &ResourceKey,
        snapshot: ServiceSnapshot,
    ) -> Result<Option<ServiceRecord>, ReconcileError> {
        Ok(Some(ServiceRecord {
            name: snapshot.name,
            namespace: snapshot.namespace,
            record_time: Utc::now(),
            uid: snapshot.uid,
            // The app label is derived from the selector: that is what
            // ties the service to the pods it fronts.
            app_label: find_app_label(&snapshot.selector),
            labels: label_summary(&snapshot.labels),
            selector: label_summary(&snapshot.selector),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn selector_drives_app_label() {
        let snapshot = ServiceSnapshot {
            uid: "svc-uid".to_string(),
            namespace: "ns1".to_string(),
            name: "api".to_string(),
            labels: HashMap::from([("team".to_string(), "billing".to_string())]),
            selector: HashMap::from([("app".to_string(), "api".to_string())]),
        };

        let key = ResourceKey::namespaced("ns1", "api");
        let record = ServiceStrategy
            .enrich(&key, snapshot)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.uid, "svc-uid");
        assert_eq!(record.app_label, "api");
        assert_eq!(record.labels, "team=billing");
        assert_eq!(record.selector, "app=api");
    }

    #[tokio::test]
    async fn empty_selector_leaves_app_label_empty() {
        let snapshot = ServiceSnapshot {
            uid: "svc-uid".to_string(),
            namespace: "ns1".to_string(),
            name: "headless".to_string(),
            labels: HashMap::new(),
            selector: HashMap::new(),
        };

        let key = ResourceKey::namespaced("ns1", "headless");
        let record = ServiceStrategy
            .enrich(&key, snapshot)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.app_label, "");
        assert_eq!(record.selector, "");
    }
}
