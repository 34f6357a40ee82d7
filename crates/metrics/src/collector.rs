use std::time::Duration;

use notify_guard_ratelimit::{CircuitSnapshot, CircuitState};
use notify_guard_types::Channel;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::metrics::*;

/// Metrics collector for notify-guard admission and delivery
pub struct MetricsCollector {
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Self {
        let registry = Registry::new();
        Self { registry }
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADMISSION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record one admission decision; `scope` is the denying bucket or "none"
    pub fn record_admission(&self, decision: &str, scope: &str) {
        ADMISSIONS.with_label_values(&[decision, scope]).inc();
    }

    pub fn record_fail_open(&self, reason: &str) {
        FAIL_OPEN.with_label_values(&[reason]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DELIVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_delivery(&self, outcome: &str, channel: Channel, latency: Duration) {
        self.record_delivery_labels(outcome, channel.as_str(), latency.as_secs_f64() * 1000.0);
    }

    /// Label-level entry point used by the tracing layer
    pub(crate) fn record_delivery_labels(&self, outcome: &str, channel: &str, latency_ms: f64) {
        DELIVERIES.with_label_values(&[outcome, channel]).inc();
        DELIVERY_LATENCY
            .with_label_values(&[channel])
            .observe(latency_ms);
    }

    pub fn record_retry_attempt_failed(&self, provider_id: &str) {
        RETRY_ATTEMPTS_FAILED.with_label_values(&[provider_id]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CIRCUIT BREAKER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_circuit_opened(&self, provider_id: &str) {
        CIRCUIT_OPENED.with_label_values(&[provider_id]).inc();
        CIRCUIT_OPEN.with_label_values(&[provider_id]).set(1);
    }

    /// Refresh the open/closed gauges from breaker snapshots
    pub fn sync_circuits(&self, snapshots: &[CircuitSnapshot]) {
        for snapshot in snapshots {
            let open = match snapshot.state {
                CircuitState::Open => 1,
                CircuitState::Closed => 0,
            };
            CIRCUIT_OPEN
                .with_label_values(&[snapshot.provider_id.as_str()])
                .set(open);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut metric_families = prometheus::gather();
        metric_families.extend(self.registry.gather());
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
    #[error("registry error: {0}")]
    RegistryError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.export_metrics().is_ok());
    }

    #[test]
    fn test_record_admission_metrics() {
        let collector = MetricsCollector::new();

        collector.record_admission("allowed", "none");
        collector.record_admission("denied", "user");
        collector.record_fail_open("no_config");

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("notify_guard_admissions_total"));
        assert!(metrics.contains("scope=\"user\""));
        assert!(metrics.contains("notify_guard_fail_open_total"));
    }

    #[test]
    fn test_record_delivery_metrics() {
        let collector = MetricsCollector::new();

        collector.record_delivery("delivered", Channel::Email, Duration::from_millis(120));
        collector.record_retry_attempt_failed("ses");

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("notify_guard_deliveries_total"));
        assert!(metrics.contains("channel=\"email\""));
        assert!(metrics.contains("notify_guard_delivery_latency_ms"));
        assert!(metrics.contains("notify_guard_retry_attempts_failed_total"));
    }

    #[test]
    fn test_circuit_gauge_follows_snapshots() {
        let collector = MetricsCollector::new();

        collector.record_circuit_opened("gauge-test-provider");
        assert_eq!(
            CIRCUIT_OPEN
                .with_label_values(&["gauge-test-provider"])
                .get(),
            1
        );

        collector.sync_circuits(&[CircuitSnapshot {
            provider_id: "gauge-test-provider".to_string(),
            state: CircuitState::Closed,
            consecutive_failures: 5,
            open_until_ms: None,
        }]);
        assert_eq!(
            CIRCUIT_OPEN
                .with_label_values(&["gauge-test-provider"])
                .get(),
            0
        );
    }
}
