//! Health Check and Metrics Endpoint
//!
//! Small HTTP server next to the gRPC port for orchestrators and scrapers.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status with session and broadcast statistics
//! - `GET /healthz` - liveness probe, always `OK`
//! - `GET /readyz` - readiness probe, `READY` once the rate table can quote
//! - `GET /metrics` - Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{BroadcastCoordinator, BroadcastStatsSnapshot, SessionRegistry};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::rates::SimulatedRateSource;

/// Missed refresh intervals tolerated before broadcasting counts as stalled.
const STALL_INTERVALS: u32 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Live streaming sessions.
    pub sessions: usize,
    /// Subscriptions across all sessions.
    pub subscriptions: usize,
    /// Cumulative broadcast statistics.
    pub broadcast: BroadcastStatsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Rates are quoted and broadcast cycles run on schedule.
    Healthy,
    /// Rates are quoted but broadcast cycles have stalled.
    Degraded,
    /// No rates can be quoted.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    interval: Duration,
    registry: Arc<SessionRegistry>,
    coordinator: Arc<BroadcastCoordinator>,
    rates: Arc<SimulatedRateSource>,
}

impl HealthServerState {
    /// Create health state over the running components. `interval` is the
    /// rate refresh cadence, used to detect stalled broadcasting.
    #[must_use]
    pub fn new(
        version: String,
        interval: Duration,
        registry: Arc<SessionRegistry>,
        coordinator: Arc<BroadcastCoordinator>,
        rates: Arc<SimulatedRateSource>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            interval,
            registry,
            coordinator,
            rates,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// stops with an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.rates.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let now = Utc::now();
    let uptime = state.started_at.elapsed();
    let broadcast = state.coordinator.stats();
    let since_last_cycle = broadcast
        .last_cycle_at
        .and_then(|at| (now - at).to_std().ok());

    HealthResponse {
        status: determine_health_status(
            state.rates.is_ready(),
            since_last_cycle,
            uptime,
            state.interval,
        ),
        version: state.version.clone(),
        uptime_secs: uptime.as_secs(),
        current_time: now,
        sessions: state.registry.len(),
        subscriptions: state.registry.subscription_count(),
        broadcast,
    }
}

/// Unhealthy when no rate can be quoted, degraded when no broadcast cycle has
/// completed within the stall window.
fn determine_health_status(
    ready: bool,
    since_last_cycle: Option<Duration>,
    uptime: Duration,
    interval: Duration,
) -> HealthStatus {
    if !ready {
        return HealthStatus::Unhealthy;
    }

    let stall_window = interval.saturating_mul(STALL_INTERVALS);
    let stalled = since_last_cycle.map_or(uptime > stall_window, |age| age > stall_window);

    if stalled {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
