use std::sync::Arc;
use tracing::{field::Field, field::Visit, Event, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

/// Initialize tracing with metrics integration.
///
/// `default_filter` applies when `RUST_LOG` is unset.
pub fn init_tracing_with_metrics(
    collector: Arc<MetricsCollector>,
    default_filter: &str,
) -> Result<(), TracingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .json();

    let metrics_layer = MetricsLayer::new(collector);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(metrics_layer)
        .try_init()
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    Ok(())
}

/// Tracing layer that turns `metric = "..."` events into Prometheus updates.
///
/// The rate limiter and orchestrator never touch Prometheus directly; they
/// emit events and this layer counts them.
pub struct MetricsLayer {
    collector: Arc<MetricsCollector>,
}

impl MetricsLayer {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MetricsVisitor::default();
        event.record(&mut visitor);

        let Some(metric) = visitor.metric.as_deref() else {
            return;
        };

        match metric {
            "admission" => self.collector.record_admission(
                label(&visitor.decision),
                label(&visitor.scope),
            ),
            "fail_open" => self.collector.record_fail_open(label(&visitor.reason)),
            "delivery" => self.collector.record_delivery_labels(
                label(&visitor.outcome),
                label(&visitor.channel),
                visitor.latency_ms.unwrap_or(0) as f64,
            ),
            "retry_attempt_failed" => self
                .collector
                .record_retry_attempt_failed(label(&visitor.provider_id)),
            "circuit_opened" => self
                .collector
                .record_circuit_opened(label(&visitor.provider_id)),
            _ => {}
        }
    }
}

/// Visitor to extract metrics-relevant fields from events
#[derive(Debug, Default)]
struct MetricsVisitor {
    metric: Option<String>,
    decision: Option<String>,
    scope: Option<String>,
    reason: Option<String>,
    outcome: Option<String>,
    channel: Option<String>,
    provider_id: Option<String>,
    latency_ms: Option<u64>,
}

fn label(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("unknown")
}

impl MetricsVisitor {
    fn slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "metric" => Some(&mut self.metric),
            "decision" => Some(&mut self.decision),
            "scope" => Some(&mut self.scope),
            "reason" => Some(&mut self.reason),
            "outcome" => Some(&mut self.outcome),
            "channel" => Some(&mut self.channel),
            "provider_id" => Some(&mut self.provider_id),
            _ => None,
        }
    }
}

impl Visit for MetricsVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if let Some(slot) = self.slot(field.name()) {
            *slot = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let Some(slot) = self.slot(field.name()) {
            *slot = Some(value.to_string());
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "latency_ms" {
            self.latency_ms = Some(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "latency_ms" {
            self.latency_ms = Some(value.max(0) as u64);
        }
    }
}

/// Correlation ID for tracking one send across admission and delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the correlation ID as a string
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one dispatch
#[derive(Debug, Clone)]
pub struct DispatchSpan {
    pub correlation_id: CorrelationId,
    pub notification_id: String,
    pub tenant_id: Option<String>,
    pub channel: String,
}

impl DispatchSpan {
    pub fn new(
        notification_id: impl Into<String>,
        tenant_id: Option<&str>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            notification_id: notification_id.into(),
            tenant_id: tenant_id.map(str::to_string),
            channel: channel.into(),
        }
    }

    /// The span to attach to the dispatch future with `Instrument`
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "dispatch",
            correlation_id = %self.correlation_id,
            notification_id = %self.notification_id,
            tenant_id = self.tenant_id.as_deref().unwrap_or("global"),
            channel = %self.channel,
        )
    }
}

/// Logs an error together with the notification it belongs to
pub trait ErrorContext {
    fn with_notification_id(self, notification_id: &str) -> Self;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_notification_id(self, notification_id: &str) -> Self {
        self.map_err(|e| {
            tracing::error!(
                notification_id = %notification_id,
                error = %e,
                "error occurred"
            );
            e
        })
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
