//! Kind-specific enrichment strategies.
//!
//! A strategy turns one change-feed snapshot into the typed record the
//! persistence sink accepts. The engine calls it after resolving the
//! key; `Ok(None)` means the snapshot does not qualify (lifecycle
//! phase gate) and the attempt settles as a skip.

mod node;
mod pod;
mod service;
mod workload;

pub use node::NodeStrategy;
pub use pod::PodStrategy;
pub use service::ServiceStrategy;
pub use workload::WorkloadStrategy;

use async_trait::async_trait;

use crate::models::ResourceKey;
use crate::reconcile::ReconcileError;

#[async_trait]
pub trait EnrichmentStrategy<S: Send + 'static, R: Send + 'static>: Send + Sync {
    async fn enrich(
        &self,
        key: &ResourceKey,
        snapshot: S,
    ) -> Result<Option<R>, ReconcileError>;
}
