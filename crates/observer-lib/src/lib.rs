//! Core library for the cluster cost observer
//!
//! This crate provides the reconciliation machinery:
//! - Deduplicating, rate-limited work queues
//! - A generic snapshot-to-record reconciler engine
//! - Kind-specific enrichment strategies (pods, nodes, workloads, services)
//! - Usage query backends (Prometheus, metrics-server)
//! - Persistence sinks and Prometheus instrumentation

pub mod enrich;
pub mod feed;
pub mod labels;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod sink;
pub mod usage;

pub use feed::{ChangeFeed, FeedEvent, MemoryFeed, WorkloadFeeds};
pub use metrics::ObserverMetrics;
pub use models::*;
pub use queue::DedupQueue;
pub use reconcile::{Outcome, ReconcileError, Reconciler, ReconcilerConfig};
