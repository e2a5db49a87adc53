//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, cache/benchmark status reporting, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (quote stream connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteStreamPort;
use crate::application::services::{BenchmarkService, RotationResults, SubscriptionCache};
use crate::domain::benchmark::BenchmarkSnapshot;
use crate::domain::subscription::CacheStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the quote stream is connected.
    pub upstream_connected: bool,
    /// Subscription cache statistics.
    pub cache: CacheStats,
    /// Symbols with a rotation snapshot.
    pub rotation_results: usize,
    /// Current composites.
    pub benchmark: BenchmarkSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected with fresh references.
    Healthy,
    /// Connected, but the benchmark or some subscriptions are degraded.
    Degraded,
    /// Quote stream unavailable.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState<Q>
where
    Q: QuoteStreamPort,
{
    version: String,
    started_at: Instant,
    cache: Arc<SubscriptionCache<Q>>,
    benchmarks: Arc<BenchmarkService<Q>>,
    rotation_results: Arc<RotationResults>,
}

impl<Q> HealthServerState<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        cache: Arc<SubscriptionCache<Q>>,
        benchmarks: Arc<BenchmarkService<Q>>,
        rotation_results: Arc<RotationResults>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            cache,
            benchmarks,
            rotation_results,
        }
    }

    /// Build the `/health` response.
    #[must_use]
    pub fn health(&self) -> HealthResponse {
        let upstream_connected = self.cache.is_upstream_connected();
        let cache = self.cache.stats();
        let benchmark = self.benchmarks.current_benchmark();

        HealthResponse {
            status: determine_health_status(upstream_connected, &benchmark, &cache),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            upstream_connected,
            cache,
            rotation_results: self.rotation_results.len(),
            benchmark,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer<Q>
where
    Q: QuoteStreamPort,
{
    port: u16,
    state: Arc<HealthServerState<Q>>,
    cancel: CancellationToken,
}

impl<Q> HealthServer<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        port: u16,
        state: Arc<HealthServerState<Q>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding.
    pub fn router(state: Arc<HealthServerState<Q>>) -> Router {
        Router::new()
            .route("/health", get(health_handler::<Q>))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler::<Q>))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler<Q>(State(state): State<Arc<HealthServerState<Q>>>) -> impl IntoResponse
where
    Q: QuoteStreamPort + 'static,
{
    let response = state.health();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler<Q>(State(state): State<Arc<HealthServerState<Q>>>) -> impl IntoResponse
where
    Q: QuoteStreamPort + 'static,
{
    if state.cache.is_upstream_connected() {
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

fn determine_health_status(
    upstream_connected: bool,
    benchmark: &BenchmarkSnapshot,
    cache: &CacheStats,
) -> HealthStatus {
    if !upstream_connected {
        HealthStatus::Unhealthy
    } else if benchmark.degraded || cache.degraded > 0 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::benchmark::BenchmarkEngine;
    use crate::domain::streaming::{FreshnessPolicy, Quote};
    use crate::infrastructure::paper_stream::PaperQuoteStream;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(degraded: bool) -> BenchmarkSnapshot {
        BenchmarkSnapshot {
            reference_a_cents: Decimal::ZERO,
            reference_b_cents: Decimal::ZERO,
            t_cents: Decimal::ZERO,
            c_cents: Decimal::ZERO,
            degraded,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn disconnected_is_unhealthy() {
        let status = determine_health_status(false, &snapshot(false), &CacheStats::default());
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn degraded_benchmark_is_degraded() {
        let status = determine_health_status(true, &snapshot(true), &CacheStats::default());
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn missing_first_ticks_are_degraded() {
        let cache = CacheStats {
            degraded: 2,
            ..CacheStats::default()
        };
        let status = determine_health_status(true, &snapshot(false), &cache);
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn connected_with_fresh_references_is_healthy() {
        let status = determine_health_status(true, &snapshot(false), &CacheStats::default());
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn health_response_reflects_services() {
        let stream = Arc::new(PaperQuoteStream::connected());
        let cache = Arc::new(SubscriptionCache::new(
            Arc::clone(&stream),
            4,
            FreshnessPolicy::default(),
        ));
        cache.add_subscription("PFF").await.unwrap();
        cache.add_subscription("TLT").await.unwrap();
        let now = Utc::now();
        cache.on_quote(Quote::new("PFF", now).with_last(dec!(31.60)).with_close(dec!(31.50)));
        cache.on_quote(Quote::new("TLT", now).with_last(dec!(90.05)).with_close(dec!(90.00)));
        let benchmarks = Arc::new(BenchmarkService::new(
            Arc::clone(&cache),
            BenchmarkEngine::default(),
            "PFF",
            "TLT",
        ));
        let state = HealthServerState::new(
            "0.1.0".to_string(),
            cache,
            benchmarks,
            Arc::new(RotationResults::new()),
        );

        let response = state.health();

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.cache.active, 2);
        assert_eq!(response.benchmark.t_cents, dec!(7.5));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["cache"]["capacity"], 4);
    }
}
