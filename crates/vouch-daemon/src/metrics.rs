//! Prometheus metrics for the daemon.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `vouch_pool_event_hits_total` | Counter | Event pool reuse hits |
//! | `vouch_pool_event_misses_total` | Counter | Event pool misses (fresh allocations) |
//! | `vouch_ledger_events_processed_total` | Counter | Events written to the ledger |
//! | `vouch_ledger_events_dropped_total` | Counter | Events dropped under backpressure |
//! | `vouch_engine_active_tasks_total` | Gauge | Currently active causal tasks |
//!
//! The registry is per-instance (no process globals), so tests can build as
//! many as they need.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors during metrics setup or encoding.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric failed to register.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Metric output could not be encoded.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Counter set shared by the pool, the worker, and the engine.
///
/// All members use interior mutability; the struct is cheap to share behind
/// an `Arc`.
#[derive(Debug)]
pub struct DaemonMetrics {
    registry: Registry,
    pool_event_hits: IntCounter,
    pool_event_misses: IntCounter,
    ledger_events_processed: IntCounter,
    ledger_events_dropped: IntCounter,
    engine_active_tasks: IntGauge,
}

impl DaemonMetrics {
    /// Creates the registry and registers every series.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::RegistrationFailed`] on a duplicate or
    /// invalid metric definition.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let pool_event_hits = IntCounter::new(
            "vouch_pool_event_hits_total",
            "Total hits on the event pool",
        )?;
        registry.register(Box::new(pool_event_hits.clone()))?;

        let pool_event_misses = IntCounter::new(
            "vouch_pool_event_misses_total",
            "Total misses (allocations) in the event pool",
        )?;
        registry.register(Box::new(pool_event_misses.clone()))?;

        let ledger_events_processed = IntCounter::new(
            "vouch_ledger_events_processed_total",
            "Total events successfully written to the ledger",
        )?;
        registry.register(Box::new(ledger_events_processed.clone()))?;

        let ledger_events_dropped = IntCounter::new(
            "vouch_ledger_events_dropped_total",
            "Total events dropped due to backpressure",
        )?;
        registry.register(Box::new(ledger_events_dropped.clone()))?;

        let engine_active_tasks = IntGauge::new(
            "vouch_engine_active_tasks_total",
            "Number of currently active causal tasks",
        )?;
        registry.register(Box::new(engine_active_tasks.clone()))?;

        Ok(Self {
            registry,
            pool_event_hits,
            pool_event_misses,
            ledger_events_processed,
            ledger_events_dropped,
            engine_active_tasks,
        })
    }

    /// Records an event pool reuse.
    pub fn pool_hit(&self) {
        self.pool_event_hits.inc();
    }

    /// Records an event pool allocation.
    pub fn pool_miss(&self) {
        self.pool_event_misses.inc();
    }

    /// Records one event written to the ledger.
    pub fn event_processed(&self) {
        self.ledger_events_processed.inc();
    }

    /// Records one event dropped under backpressure.
    pub fn event_dropped(&self) {
        self.ledger_events_dropped.inc();
    }

    /// Sets the active-task gauge.
    pub fn set_active_tasks(&self, count: i64) {
        self.engine_active_tasks.set(count);
    }

    /// Current processed-event count.
    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.ledger_events_processed.get()
    }

    /// Current dropped-event count.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.ledger_events_dropped.get()
    }

    /// Current pool hit count.
    #[must_use]
    pub fn pool_hits(&self) -> u64 {
        self.pool_event_hits.get()
    }

    /// Current pool miss count.
    #[must_use]
    pub fn pool_misses(&self) -> u64 {
        self.pool_event_misses.get()
    }

    /// Current active-task gauge value.
    #[must_use]
    pub fn active_tasks(&self) -> i64 {
        self.engine_active_tasks.get()
    }

    /// Encodes every series in Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::EncodingFailed`] if encoding fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}
