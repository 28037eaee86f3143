//! Prometheus-backed usage queries: windowed aggregation over the
//! container metric time series.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::promql::{self, Selector};
use super::{canonical_memory, UsageError, UsageQuery};
use crate::models::UsageSample;

const WORKING_SET_METRIC: &str = "container_memory_working_set_bytes";
const RSS_METRIC: &str = "container_memory_rss";
const CPU_METRIC: &str = "container_cpu_usage_seconds_total";

/// Per-query timeout, shorter than the overall client timeout.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Usage backend over a Prometheus-compatible HTTP API.
pub struct PrometheusUsage {
    client: reqwest::Client,
    query_url: Url,
}

impl PrometheusUsage {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .context("building prometheus http client")?;
        let query_url = base_url
            .join("/api/v1/query")
            .context("building prometheus query url")?;
        Ok(Self { client, query_url })
    }

    async fn query_vector(&self, query: &str) -> Result<Vec<VectorSample>, UsageError> {
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query)])
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .map_err(|err| UsageError::Transient(err.into()))?
            .error_for_status()
            .map_err(|err| UsageError::Transient(err.into()))?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|err| UsageError::Transient(err.into()))?;
        if body.status != "success" {
            return Err(UsageError::Transient(anyhow!(
                "prometheus query status {:?}",
                body.status
            )));
        }
        Ok(body.data.result)
    }
}

#[async_trait]
impl UsageQuery for PrometheusUsage {
    async fn query_usage(
        &self,
        namespace: &str,
        pod: &str,
        window: Duration,
    ) -> Result<UsageSample, UsageError> {
        let working_set = Selector::pod_containers(WORKING_SET_METRIC, namespace, pod);
        let resident_set = Selector::pod_containers(RSS_METRIC, namespace, pod);
        let cpu = Selector::pod_containers(CPU_METRIC, namespace, pod);

        let working_set = self
            .query_vector(&promql::max_avg_over_time(&working_set, window))
            .await?;
        let resident_set = self
            .query_vector(&promql::max_avg_over_time(&resident_set, window))
            .await?;
        let cpu = self
            .query_vector(&promql::windowed_rate(&cpu, window))
            .await?;

        if working_set.is_empty() || resident_set.is_empty() || cpu.is_empty() {
            return Err(UsageError::NotFound {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            });
        }

        let memory_bytes = canonical_memory(first_value(&working_set), first_value(&resident_set))
            .ok_or_else(|| UsageError::NotFound {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            })?;

        Ok(UsageSample {
            cpu_milli: (first_value(&cpu) * 1000.0).round() as i64,
            memory_bytes: memory_bytes.round() as i64,
            sampled_at: Utc::now(),
        })
    }
}

fn first_value(samples: &[VectorSample]) -> f64 {
    samples
        .first()
        .and_then(|sample| sample.value.1.parse().ok())
        .unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

/// One instant-vector sample: `[unix_ts, "value"]` plus labels we
/// never look at.
#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}
