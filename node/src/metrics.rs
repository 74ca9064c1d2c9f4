//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated [`prometheus::Registry`] with the
//! `yieldflow` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly: every handle is internally reference counted.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Top-up requests by terminal outcome (`completed`, `invalid_input`,
    /// `insufficient_reputation`, `rate_limited`, `oracle_failure`,
    /// `processor_failure`).
    pub topups_total: IntCounterVec,
    /// Round-trip latency of card processor calls, in seconds.
    pub processor_latency_seconds: Histogram,
    /// Committed ledger events by kind.
    pub ledger_events_total: IntCounterVec,
    /// Accounts known to the ledger.
    pub ledger_accounts: IntGauge,
    /// Relay deliveries by outcome (`delivered`, `failed`).
    pub relay_deliveries_total: IntCounterVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("yieldflow".into()), None)?;

        let topups_total = IntCounterVec::new(
            Opts::new("topups_total", "Top-up requests by terminal outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(topups_total.clone()))?;

        let processor_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "processor_latency_seconds",
                "Card processor round-trip latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
        )?;
        registry.register(Box::new(processor_latency_seconds.clone()))?;

        let ledger_events_total = IntCounterVec::new(
            Opts::new("ledger_events_total", "Committed ledger events by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(ledger_events_total.clone()))?;

        let ledger_accounts = IntGauge::new("ledger_accounts", "Accounts known to the ledger")?;
        registry.register(Box::new(ledger_accounts.clone()))?;

        let relay_deliveries_total = IntCounterVec::new(
            Opts::new("relay_deliveries_total", "Webhook relay deliveries by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(relay_deliveries_total.clone()))?;

        Ok(Self {
            registry,
            topups_total,
            processor_latency_seconds,
            ledger_events_total,
            ledger_accounts,
            relay_deliveries_total,
        })
    }

    pub fn record_topup(&self, outcome: &str) {
        self.topups_total.with_label_values(&[outcome]).inc();
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
