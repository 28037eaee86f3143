//! Workload-owner enrichment. The kind was already resolved by the
//! feed's priority probe (DaemonSet before Deployment before
//! StatefulSet before ReplicaSet), so this strategy only shapes the
//! record.

use async_trait::async_trait;
use chrono::Utc;

use super::EnrichmentStrategy;
use crate::labels::label_summary;
use crate::models::{first_owner, OwnerRecord, ResourceKey, WorkloadSnapshot};
use crate::reconcile::ReconcileError;

const WORKLOAD_API_VERSION: &str = "apps/v1";

pub struct WorkloadStrategy;

#[async_trait]
impl EnrichmentStrategy<WorkloadSnapshot, OwnerRecord> for WorkloadStrategy {
    async fn enrich(
        &self,
        _key: &ResourceKey,
        snapshot: WorkloadSnapshot,
    ) -> Result<Option<OwnerRecord>, ReconcileError> {
        Ok(Some(OwnerRecord {
            name: snapshot.name,
            namespace: snapshot.namespace,
            record_time: Utc::now(),
            own_version: WORKLOAD_API_VERSION.to_string(),
            own_kind: snapshot.kind,
            own_uid: snapshot.uid,
            owner: first_owner(&snapshot.owners).cloned(),
            labels: label_summary(&snapshot.labels),
        }))
    }
}
