//! Metrics-API usage queries: one point-in-time reading per pod,
//! summed across its containers.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::quantity::{parse_cpu_milli, parse_memory_bytes};
use super::{UsageError, UsageQuery};
use crate::models::UsageSample;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Usage backend over the `metrics.k8s.io` aggregated API.
pub struct MetricsServerUsage {
    client: reqwest::Client,
    base_url: Url,
}

impl MetricsServerUsage {
    pub fn new(base_url: Url, bearer_token: Option<String>) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = bearer_token {
            let value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .context("invalid bearer token")?;
            headers.insert(header::AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("building metrics api client")?;
        Ok(Self { client, base_url })
    }

    /// Appends the metrics API path to the base URL, keeping any path
    /// prefix the base carries (proxy mounts like `https://host/c1`).
    fn pod_metrics_url(&self, namespace: &str, pod: &str) -> Result<Url, UsageError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| UsageError::Transient(anyhow!("metrics api url cannot be a base")))?;
            segments.pop_if_empty().extend([
                "apis",
                "metrics.k8s.io",
                "v1beta1",
                "namespaces",
                namespace,
                "pods",
                pod,
            ]);
        }
        Ok(url)
    }
}

#[async_trait]
impl UsageQuery for MetricsServerUsage {
    async fn query_usage(
        &self,
        namespace: &str,
        pod: &str,
        _window: Duration,
    ) -> Result<UsageSample, UsageError> {
        let url = self.pod_metrics_url(namespace, pod)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| UsageError::Transient(err.into()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(UsageError::NotFound {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|err| UsageError::Transient(err.into()))?;

        let metrics: PodMetrics = response
            .json()
            .await
            .map_err(|err| UsageError::Transient(err.into()))?;

        if metrics.containers.is_empty() {
            return Err(UsageError::NotFound {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
            });
        }
        let (cpu_milli, memory_bytes) = aggregate(&metrics).ok_or_else(|| {
            UsageError::Transient(anyhow!(
                "unparseable container usage for {namespace}/{pod}"
            ))
        })?;

        Ok(UsageSample {
            cpu_milli,
            memory_bytes,
            sampled_at: Utc::now(),
        })
    }
}

/// Sums CPU millicores and memory bytes across the pod's containers.
/// `None` when a quantity fails to parse.
fn aggregate(metrics: &PodMetrics) -> Option<(i64, i64)> {
    let mut cpu_milli = 0;
    let mut memory_bytes = 0;
    for container in &metrics.containers {
        cpu_milli += parse_cpu_milli(&container.usage.cpu)?;
        memory_bytes += parse_memory_bytes(&container.usage.memory)?;
    }
    Some((cpu_milli, memory_bytes))
}

#[derive(Debug, Deserialize)]
struct PodMetrics {
    #[serde(default)]
    containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    usage: ContainerUsage,
}

#[derive(Debug, Deserialize)]
struct ContainerUsage {
    cpu: String,
    memory: String,
}
