//! Pod enrichment: phase gate, owner resolution, app labels, and the
//! blocking usage query.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::EnrichmentStrategy;
use crate::labels::{label_summary, AppLabels};
use crate::models::{first_owner, PodRecord, PodSnapshot, ResourceKey};
use crate::reconcile::ReconcileError;
use crate::usage::{UsageError, UsageQuery};

pub struct PodStrategy {
    usage: Arc<dyn UsageQuery>,
    /// Aggregation window handed to the usage backend.
    window: Duration,
}

impl PodStrategy {
    pub fn new(usage: Arc<dyn UsageQuery>, window: Duration) -> Self {
        Self { usage, window }
    }
}

#[async_trait]
impl EnrichmentStrategy<PodSnapshot, PodRecord> for PodStrategy {
    async fn enrich(
        &self,
        key: &ResourceKey,
        snapshot: PodSnapshot,
    ) -> Result<Option<PodRecord>, ReconcileError> {
        // Only running pods consume resources worth attributing.
        if !snapshot.phase.is_running() {
            return Ok(None);
        }

        let usage = self
            .usage
            .query_usage(&snapshot.namespace, &snapshot.name, self.window)
            .await
            .map_err(|err| match err {
                UsageError::NotFound { .. } => ReconcileError::NoUsageData { key: key.clone() },
                UsageError::Transient(source) => ReconcileError::UsageQuery {
                    key: key.clone(),
                    source,
                },
            })?;

        Ok(Some(PodRecord {
            name: snapshot.name,
            namespace: snapshot.namespace,
            record_time: Utc::now(),
            node_name: snapshot.node_name,
            own_uid: snapshot.uid,
            owner: first_owner(&snapshot.owners).cloned(),
            labels: label_summary(&snapshot.labels),
            app: AppLabels::from_labels(&snapshot.labels),
            usage,
        }))
    }
}
