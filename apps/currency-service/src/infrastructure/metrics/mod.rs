//! Prometheus Metrics Module
//!
//! Exposes service metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Live stream sessions
//! - **Subscriptions**: Subscribe outcomes and rejected requests
//! - **Broadcast**: Rate updates delivered or dropped, lookup failures,
//!   cycle duration
//! - **Unary**: `GetRate` outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::error::ErrorCode;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
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
    describe_gauge!(
        "currency_service_sessions",
        "Number of live rate subscription streams"
    );

    describe_counter!(
        "currency_service_subscriptions_total",
        "Subscribe requests by outcome"
    );
    describe_counter!(
        "currency_service_requests_rejected_total",
        "Requests rejected in-band, by reason"
    );

    describe_counter!(
        "currency_service_rate_updates_sent_total",
        "Rate updates queued to clients"
    );
    describe_counter!(
        "currency_service_rate_updates_dropped_total",
        "Rate updates dropped, by reason"
    );
    describe_counter!(
        "currency_service_rate_lookup_failures_total",
        "Rate source failures during broadcast"
    );
    describe_histogram!(
        "currency_service_broadcast_cycle_seconds",
        "Duration of one broadcast cycle"
    );

    describe_counter!(
        "currency_service_unary_requests_total",
        "GetRate requests by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for subscribe requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// Pair added to the session.
    Accepted,
    /// Request rejected in-band.
    Rejected,
}

impl SubscriptionOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Reason label for dropped rate updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The session's outbound queue was full.
    QueueFull,
    /// The client's outbound stream was gone.
    Disconnected,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Update the live session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions(count: usize) {
    gauge!("currency_service_sessions").set(count as f64);
}

/// Record a subscribe request outcome.
pub fn record_subscription(outcome: SubscriptionOutcome) {
    counter!(
        "currency_service_subscriptions_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a request rejected in-band on a stream.
pub fn record_request_rejected(code: ErrorCode) {
    counter!(
        "currency_service_requests_rejected_total",
        "reason" => code.reason()
    )
    .increment(1);
}

/// Record rate updates queued to clients.
pub fn record_updates_sent(count: u64) {
    counter!("currency_service_rate_updates_sent_total").increment(count);
}

/// Record rate updates dropped.
pub fn record_updates_dropped(reason: DropReason, count: u64) {
    counter!(
        "currency_service_rate_updates_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record rate source failures during a broadcast cycle.
pub fn record_lookup_failures(count: u64) {
    counter!("currency_service_rate_lookup_failures_total").increment(count);
}

/// Record broadcast cycle duration.
pub fn record_cycle_duration(duration: Duration) {
    histogram!("currency_service_broadcast_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a unary `GetRate` outcome. `None` means success.
pub fn record_unary_request(error: Option<ErrorCode>) {
    let outcome = error.map_or("ok", |code| code.reason());
    counter!(
        "currency_service_unary_requests_total",
        "outcome" => outcome
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
