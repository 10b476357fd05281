// Private module declaration
mod server;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Inbound orders (received, unavailable, processing latency)
// - Outbound dispatch events by type
// - Failures by kind, redeliveries, dead-lettered records
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Inbound
    pub orders_received: IntCounter,
    pub orders_unavailable: IntCounter,
    pub processing_duration: Histogram,

    // Outbound
    pub dispatch_events_emitted: IntCounterVec,

    // Failures
    pub processing_failures: IntCounterVec,
    pub redeliveries: IntCounter,
    pub dead_lettered: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_received = IntCounter::new(
            "orders_received_total",
            "Total OrderCreated records received",
        )?;
        registry.register(Box::new(orders_received.clone()))?;

        let orders_unavailable = IntCounter::new(
            "orders_unavailable_total",
            "Orders skipped because the item was out of stock",
        )?;
        registry.register(Box::new(orders_unavailable.clone()))?;

        let processing_duration = Histogram::with_opts(
            HistogramOpts::new("order_processing_duration_seconds", "Order handling duration, redeliveries included")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let dispatch_events_emitted = IntCounterVec::new(
            Opts::new("dispatch_events_emitted_total", "Dispatch events acknowledged by the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(dispatch_events_emitted.clone()))?;

        let processing_failures = IntCounterVec::new(
            Opts::new("order_processing_failures_total", "Failed processing attempts by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(processing_failures.clone()))?;

        let redeliveries = IntCounter::new(
            "order_redeliveries_total",
            "Redelivery attempts after a retryable failure",
        )?;
        registry.register(Box::new(redeliveries.clone()))?;

        let dead_lettered = IntCounterVec::new(
            Opts::new("orders_dead_lettered_total", "Inbound records routed to the dead-letter topic"),
            &["reason"],
        )?;
        registry.register(Box::new(dead_lettered.clone()))?;

        Ok(Self {
            registry,
            orders_received,
            orders_unavailable,
            processing_duration,
            dispatch_events_emitted,
            processing_failures,
            redeliveries,
            dead_lettered,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_emitted(&self, event_type: &str) {
        self.dispatch_events_emitted.with_label_values(&[event_type]).inc();
    }

    pub fn record_failure(&self, kind: &str) {
        self.processing_failures.with_label_values(&[kind]).inc();
    }

    pub fn record_dead_letter(&self, reason: &str) {
        self.dead_lettered.with_label_values(&[reason]).inc();
    }
}
