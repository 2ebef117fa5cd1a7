//! HTTP server for health and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::metrics::Metrics;
use crate::relay::ListenerState;

/// Live listener state of one direction, as seen by the server
#[derive(Clone)]
pub struct DirectionStatus {
    pub direction: String,
    pub listener: watch::Receiver<ListenerState>,
}

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub directions: Vec<DirectionStatus>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    fn all_listening(&self) -> bool {
        self.directions
            .iter()
            .all(|d| *d.listener.borrow() == ListenerState::Listening)
    }
}

#[derive(Serialize)]
pub struct DirectionHealth {
    pub direction: String,
    pub listener: ListenerState,
    pub relayed: u64,
    pub already_relayed: u64,
    pub failed: u64,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub directions: Vec<DirectionHealth>,
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let directions = state
        .directions
        .iter()
        .map(|d| DirectionHealth {
            direction: d.direction.clone(),
            listener: *d.listener.borrow(),
            relayed: state.metrics.submission_count(&d.direction, "relayed"),
            already_relayed: state
                .metrics
                .already_relayed
                .with_label_values(&[d.direction.as_str()])
                .get(),
            failed: state.metrics.submission_count(&d.direction, "failed"),
        })
        .collect();

    let status = if state.all_listening() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        directions,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe: every live listener holds a subscription
async fn readiness(State(state): State<AppState>) -> Response {
    if state.all_listening() {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY").into_response()
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server for health and metrics
pub async fn start_server(bind_address: &str, port: u16, state: AppState) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Health server listening on {}", addr);
    info!("  /health  - Listener states and relay counters (JSON)");
    info!("  /readyz  - Ready once every live listener is subscribed");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
