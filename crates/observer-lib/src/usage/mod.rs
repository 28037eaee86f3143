//! Usage-query collaborators: point-in-time resource consumption for a
//! named pod, served either by the metrics API (snapshot aggregate) or
//! by a Prometheus-compatible backend (windowed aggregation).

mod metrics_server;
mod prom;
pub mod promql;
pub mod quantity;

pub use metrics_server::MetricsServerUsage;
pub use prom::PrometheusUsage;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::UsageSample;

/// Failure modes of a usage query. Absence of data is distinct from a
/// backend fault but both are retried the same way.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("no usage data for {namespace}/{pod}")]
    NotFound { namespace: String, pod: String },
    #[error("usage backend error: {0}")]
    Transient(#[from] anyhow::Error),
}

/// Bounded-timeout usage lookup, called once per pod reconciliation.
#[async_trait]
pub trait UsageQuery: Send + Sync {
    async fn query_usage(
        &self,
        namespace: &str,
        pod: &str,
        window: Duration,
    ) -> Result<UsageSample, UsageError>;
}

/// Picks the canonical memory figure from the working-set and
/// resident-set readings: the smaller of the two non-zero values, a
/// deliberately conservative choice. `None` when both are zero.
pub fn canonical_memory(working_set: f64, resident_set: f64) -> Option<f64> {
    match (working_set > 0.0, resident_set > 0.0) {
        (true, true) => Some(working_set.min(resident_set)),
        (true, false) => Some(working_set),
        (false, true) => Some(resident_set),
        (false, false) => None,
    }
}
