//! HTTP API for health checks and Prometheus metrics

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Named readiness check, one per change feed.
pub struct ReadinessProbe {
    pub name: String,
    pub check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ReadinessProbe {
    pub fn new(name: impl Into<String>, check: Arc<dyn Fn() -> bool + Send + Sync>) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub probes: Vec<ReadinessProbe>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    feeds: BTreeMap<String, bool>,
}

/// Liveness: the process is up and serving.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Readiness: 200 once every change feed has completed its initial
/// sync, 503 before that.
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feeds: BTreeMap<String, bool> = state
        .probes
        .iter()
        .map(|probe| (probe.name.clone(), (probe.check)()))
        .collect();
    let ready = feeds.values().all(|synced| *synced);

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(ReadinessResponse { ready, feeds }))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn probe(name: &str, flag: &Arc<AtomicBool>) -> ReadinessProbe {
        let flag = Arc::clone(flag);
        ReadinessProbe::new(name, Arc::new(move || flag.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn readiness_requires_every_feed() {
        let pods = Arc::new(AtomicBool::new(true));
        let nodes = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AppState {
            probes: vec![probe("pods", &pods), probe("nodes", &nodes)],
        });

        let response = readyz(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        nodes.store(true, Ordering::SeqCst);
        let response = readyz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
