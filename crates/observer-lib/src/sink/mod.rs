//! Persistence sink contract: one insert per record kind, no batching,
//! no cross-record transactions. Any failure is retryable.

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresSink;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{NodeRecord, OwnerRecord, PodRecord, ServiceRecord};

/// A failed sink call. Always retryable through the queue backoff.
#[derive(Debug, Error)]
#[error("persistence failed: {0}")]
pub struct SinkError(#[from] pub anyhow::Error);

/// Durable store accepting enrichment records.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn insert_pod(&self, record: &PodRecord) -> Result<(), SinkError>;
    async fn insert_node(&self, record: &NodeRecord) -> Result<(), SinkError>;
    async fn insert_owner(&self, record: &OwnerRecord) -> Result<(), SinkError>;
    async fn insert_service(&self, record: &ServiceRecord) -> Result<(), SinkError>;
}

/// Single-record-type view over the sink, so the generic engine does
/// not need to know which of the four inserts it drives.
#[async_trait]
pub trait RecordSink<R>: Send + Sync {
    async fn insert(&self, record: &R) -> Result<(), SinkError>;
}

pub struct PodSink(pub Arc<dyn PersistenceSink>);

#[async_trait]
impl RecordSink<PodRecord> for PodSink {
    async fn insert(&self, record: &PodRecord) -> Result<(), SinkError> {
        self.0.insert_pod(record).await
    }
}

pub struct NodeSink(pub Arc<dyn PersistenceSink>);

#[async_trait]
impl RecordSink<NodeRecord> for NodeSink {
    async fn insert(&self, record: &NodeRecord) -> Result<(), SinkError> {
        self.0.insert_node(record).await
    }
}

pub struct OwnerSink(pub Arc<dyn PersistenceSink>);

#[async_trait]
impl RecordSink<OwnerRecord> for OwnerSink {
    async fn insert(&self, record: &OwnerRecord) -> Result<(), SinkError> {
        self.0.insert_owner(record).await
    }
}

pub struct ServiceSink(pub Arc<dyn PersistenceSink>);

#[async_trait]
impl RecordSink<ServiceRecord> for ServiceSink {
    async fn insert(&self, record: &ServiceRecord) -> Result<(), SinkError> {
        self.0.insert_service(record).await
    }
}
