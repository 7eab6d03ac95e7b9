// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::domain::order::OrderStatus;
use crate::utils::CircuitState;

// Re-export for public API
pub use server::{start_metrics_server, HealthSource};

// ============================================================================
// Metrics Module - Prometheus metrics for the order lifecycle
// ============================================================================
//
// Covers:
// - Order creation and status transitions
// - Batch operation outcomes and persistence latency
// - Notification delivery per transport, retries, circuit breaker state
//
// Everything is registered on one registry scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Lifecycle
    pub orders_created: IntCounter,
    pub status_transitions: IntCounterVec,
    pub batch_operations: IntCounterVec,
    pub persistence_duration: HistogramVec,

    // Notifications
    pub notifications_published: IntCounterVec,
    pub notifications_failed: IntCounterVec,
    pub notifications_dropped: IntCounterVec,
    pub retry_attempts_total: IntCounterVec,
    pub circuit_breaker_state: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let status_transitions = IntCounterVec::new(
            Opts::new("order_status_transitions_total", "Order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        let batch_operations = IntCounterVec::new(
            Opts::new("order_batch_operations_total", "Lifecycle operations by outcome"),
            &["operation", "result"],
        )?;
        registry.register(Box::new(batch_operations.clone()))?;

        let persistence_duration = HistogramVec::new(
            HistogramOpts::new(
                "order_persistence_duration_seconds",
                "Duration of repository calls",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["call"],
        )?;
        registry.register(Box::new(persistence_duration.clone()))?;

        let notifications_published = IntCounterVec::new(
            Opts::new(
                "notifications_published_total",
                "Notifications delivered to a transport",
            ),
            &["transport", "event_type"],
        )?;
        registry.register(Box::new(notifications_published.clone()))?;

        let notifications_failed = IntCounterVec::new(
            Opts::new(
                "notifications_failed_total",
                "Notifications dropped after all publish attempts",
            ),
            &["transport", "event_type"],
        )?;
        registry.register(Box::new(notifications_failed.clone()))?;

        let notifications_dropped = IntCounterVec::new(
            Opts::new(
                "notifications_dropped_total",
                "Notifications not queued for external delivery because the queue was full",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(notifications_dropped.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("notification_retry_attempts_total", "Publish retries by transport"),
            &["transport"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["transport"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            status_transitions,
            batch_operations,
            persistence_duration,
            notifications_published,
            notifications_failed,
            notifications_dropped,
            retry_attempts_total,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: OrderStatus, to: OrderStatus) {
        self.status_transitions
            .with_label_values(&[from.name(), to.name()])
            .inc();
    }

    pub fn record_operation(&self, operation: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.batch_operations.with_label_values(&[operation, result]).inc();
    }

    pub fn observe_persistence(&self, call: &str, duration_secs: f64) {
        self.persistence_duration
            .with_label_values(&[call])
            .observe(duration_secs);
    }

    pub fn record_publish(&self, transport: &str, event_type: &str, success: bool) {
        if success {
            self.notifications_published
                .with_label_values(&[transport, event_type])
                .inc();
        } else {
            self.notifications_failed
                .with_label_values(&[transport, event_type])
                .inc();
        }
    }

    pub fn record_dropped(&self, event_type: &str) {
        self.notifications_dropped.with_label_values(&[event_type]).inc();
    }

    pub fn record_retry_attempt(&self, transport: &str) {
        self.retry_attempts_total.with_label_values(&[transport]).inc();
    }

    pub fn update_circuit_breaker_state(&self, transport: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[transport])
            .set(state.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &Metrics, name: &str) -> Vec<f64> {
        metrics
            .registry()
            .gather()
            .iter()
            .find(|m| m.name() == name)
            .map(|family| {
                family
                    .metric
                    .iter()
                    .map(|m| m.counter.value.unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.orders_created.inc();
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_transition_by_status_name() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition(OrderStatus::Accepted, OrderStatus::AwaitingPrint);
        metrics.record_transition(OrderStatus::Accepted, OrderStatus::AwaitingPrint);
        metrics.record_transition(OrderStatus::Printed, OrderStatus::Cancelled);

        let values = counter_value(&metrics, "order_status_transitions_total");
        assert_eq!(values.len(), 2);
        assert_eq!(values.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn test_record_publish_splits_success_and_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_publish("redis", "OrderChanged", true);
        metrics.record_publish("redis", "OrderChanged", false);
        metrics.record_publish("kafka", "LowStock", false);

        assert_eq!(counter_value(&metrics, "notifications_published_total"), vec![1.0]);
        assert_eq!(counter_value(&metrics, "notifications_failed_total").len(), 2);
    }

    #[test]
    fn test_circuit_breaker_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state("kafka", CircuitState::Open);

        let gathered = metrics.registry().gather();
        let state = gathered
            .iter()
            .find(|m| m.name() == "circuit_breaker_state")
            .unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
