use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use notify_guard_ratelimit::{CircuitBreakerRegistry, CircuitSnapshot};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::collector::MetricsCollector;

#[derive(Clone)]
struct ServerState {
    collector: Arc<MetricsCollector>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
}

/// HTTP server for metrics, health and breaker state
pub struct MetricsServer {
    collector: Arc<MetricsCollector>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    addr: String,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(collector: Arc<MetricsCollector>, addr: String) -> Self {
        Self {
            collector,
            breakers: None,
            addr,
        }
    }

    /// Expose provider breakers on `/circuits` and the circuit gauges
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/circuits", get(circuits_handler))
            .with_state(ServerState {
                collector: self.collector.clone(),
                breakers: self.breakers.clone(),
            })
    }

    /// Start the metrics HTTP server
    pub async fn serve(self) -> Result<(), MetricsServerError> {
        let app = self.router();

        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| MetricsServerError::BindError(e.to_string()))?;

        tracing::info!("Metrics server listening on {}", self.addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| MetricsServerError::ServerError(e.to_string()))?;

        Ok(())
    }
}

/// Handler for /metrics endpoint
/// Returns Prometheus-formatted metrics
async fn metrics_handler(State(state): State<ServerState>) -> Result<Response, MetricsHandlerError> {
    if let Some(breakers) = &state.breakers {
        state.collector.sync_circuits(&breakers.snapshot());
    }

    let metrics = state
        .collector
        .export_metrics()
        .map_err(|e| MetricsHandlerError::ExportError(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
        .into_response())
}

/// Handler for /health endpoint
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn circuits_handler(State(state): State<ServerState>) -> Json<Vec<CircuitSnapshot>> {
    let snapshots = state
        .breakers
        .as_ref()
        .map(|breakers| breakers.snapshot())
        .unwrap_or_default();
    Json(snapshots)
}

/// Metrics server error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("failed to bind to address: {0}")]
    BindError(String),
    #[error("server error: {0}")]
    ServerError(String),
}

/// Metrics handler error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsHandlerError {
    #[error("failed to export metrics: {0}")]
    ExportError(String),
}

impl IntoResponse for MetricsHandlerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            MetricsHandlerError::ExportError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let collector = Arc::new(MetricsCollector::new());
        let server = MetricsServer::new(collector, "127.0.0.1:0".to_string());

        assert_eq!(server.addr, "127.0.0.1:0");
        assert!(server.breakers.is_none());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = MetricsServer::new(Arc::new(MetricsCollector::new()), "127.0.0.1:0".into());

        let response = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_circuits_endpoint_lists_breakers() {
        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let breaker = breakers.breaker_for("http-test-provider");
        breaker.record_failure();

        let server = MetricsServer::new(Arc::new(MetricsCollector::new()), "127.0.0.1:0".into())
            .with_breakers(breakers);

        let response = server
            .router()
            .oneshot(Request::builder().uri("/circuits").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["provider_id"], "http-test-provider");
        assert_eq!(json[0]["state"], "closed");
        assert_eq!(json[0]["consecutive_failures"], 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_text() {
        let collector = Arc::new(MetricsCollector::new());
        collector.record_admission("allowed", "none");
        let server = MetricsServer::new(collector, "127.0.0.1:0".into());

        let response = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("notify_guard_admissions_total"));
    }
}
