//! Metrics and monitoring for notify-guard
//!
//! The rate limiter and delivery orchestrator report through `tracing`
//! events carrying a `metric` field. `MetricsLayer` turns those into
//! Prometheus counters, so library crates stay free of a metrics dependency.
//!
//! # Features
//!
//! - Prometheus metrics exposition
//! - HTTP endpoint for metrics scraping and provider breaker state
//! - Tracing integration with correlation IDs
//! - Error context enrichment
//!
//! # Example
//!
//! ```no_run
//! use notify_guard_metrics::{init_tracing_with_metrics, MetricsCollector, MetricsServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let collector = Arc::new(MetricsCollector::new());
//!     init_tracing_with_metrics(collector.clone(), "info").unwrap();
//!
//!     let server = MetricsServer::new(collector, "0.0.0.0:9090".to_string());
//!     server.serve().await.unwrap();
//! }
//! ```

pub mod collector;
pub mod http;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use http::{MetricsServer, MetricsServerError};
pub use self::tracing::{
    init_tracing_with_metrics, CorrelationId, DispatchSpan, ErrorContext, MetricsLayer,
    TracingError,
};
