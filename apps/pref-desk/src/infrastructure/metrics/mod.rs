//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Subscriptions**: Active upstream slots, evictions, upstream errors
//! - **Quotes**: Pushes applied or dropped by the cache
//! - **Rotation**: Ticks run, skipped, and per-symbol batch failures
//! - **Scoring**: Ranking pass latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Subscription gauges and counters
    describe_gauge!(
        "pref_desk_active_subscriptions",
        "Number of symbols holding an upstream quote subscription"
    );
    describe_counter!(
        "pref_desk_evictions_total",
        "Subscriptions evicted to make room for new symbols"
    );
    describe_counter!(
        "pref_desk_upstream_errors_total",
        "Failed upstream subscribe/unsubscribe calls by operation"
    );

    // Quote counters
    describe_counter!(
        "pref_desk_quotes_total",
        "Quote pushes received by the cache, by outcome"
    );

    // Rotation counters
    describe_counter!(
        "pref_desk_rotation_ticks_total",
        "Rotation ticks by outcome"
    );
    describe_counter!(
        "pref_desk_rotation_failures_total",
        "Symbols whose rotation subscribe failed"
    );

    // Latency histograms
    describe_histogram!(
        "pref_desk_ranking_seconds",
        "Time to score and rank a candidate universe"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Upstream operation labels.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamOp {
    /// `subscribe` call.
    Subscribe,
    /// `unsubscribe` call.
    Unsubscribe,
}

impl UpstreamOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Quote push outcome labels.
#[derive(Debug, Clone, Copy)]
pub enum QuoteOutcome {
    /// Replaced the cached quote.
    Applied,
    /// Older than the cached quote.
    OutOfOrder,
    /// No subscription for the symbol.
    Untracked,
    /// Dropped because the ingest receiver lagged.
    Lagged,
}

impl QuoteOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::OutOfOrder => "out_of_order",
            Self::Untracked => "untracked",
            Self::Lagged => "lagged",
        }
    }
}

/// Rotation tick outcome labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Batch rotated.
    Completed,
    /// Skipped while disconnected.
    Disconnected,
    /// Nothing to rotate.
    Idle,
}

impl TickOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Idle => "idle",
        }
    }
}

/// Update the active subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("pref_desk_active_subscriptions").set(count as f64);
}

/// Record an eviction.
pub fn record_eviction() {
    counter!("pref_desk_evictions_total").increment(1);
}

/// Record a failed upstream call.
pub fn record_upstream_error(op: UpstreamOp) {
    counter!(
        "pref_desk_upstream_errors_total",
        "operation" => op.as_str()
    )
    .increment(1);
}

/// Record quote pushes by outcome.
pub fn record_quotes(outcome: QuoteOutcome, count: u64) {
    counter!(
        "pref_desk_quotes_total",
        "outcome" => outcome.as_str()
    )
    .increment(count);
}

/// Record a rotation tick.
pub fn record_rotation_tick(outcome: TickOutcome) {
    counter!(
        "pref_desk_rotation_ticks_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record symbols that failed to subscribe during rotation.
pub fn record_rotation_failures(count: u64) {
    counter!("pref_desk_rotation_failures_total").increment(count);
}

/// Record a ranking pass duration.
pub fn record_ranking_duration(side: &'static str, duration: Duration) {
    histogram!(
        "pref_desk_ranking_seconds",
        "side" => side
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_op_as_str() {
        assert_eq!(UpstreamOp::Subscribe.as_str(), "subscribe");
        assert_eq!(UpstreamOp::Unsubscribe.as_str(), "unsubscribe");
    }

    #[test]
    fn quote_outcome_as_str() {
        assert_eq!(QuoteOutcome::Applied.as_str(), "applied");
        assert_eq!(QuoteOutcome::OutOfOrder.as_str(), "out_of_order");
        assert_eq!(QuoteOutcome::Untracked.as_str(), "untracked");
        assert_eq!(QuoteOutcome::Lagged.as_str(), "lagged");
    }

    #[test]
    fn tick_outcome_as_str() {
        assert_eq!(TickOutcome::Completed.as_str(), "completed");
        assert_eq!(TickOutcome::Disconnected.as_str(), "disconnected");
        assert_eq!(TickOutcome::Idle.as_str(), "idle");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        set_active_subscriptions(3);
        record_eviction();
        record_upstream_error(UpstreamOp::Subscribe);
        record_quotes(QuoteOutcome::Applied, 2);
        record_rotation_tick(TickOutcome::Idle);
        record_rotation_failures(1);
        record_ranking_duration("buy_to_open", Duration::from_millis(1));
    }
}
