use chrono::Utc;
use notify_guard_ratelimit::{
    AdmissionDecision, AdmissionRequest, CircuitBreakerRegistry, GateError, RateLimitRejection,
    RateLimitingGate,
};
use notify_guard_types::{Channel, DeliveryResult, SendRequest};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::policy::RetryPolicyResolver;
use crate::provider::{DeliveryFailure, ProviderRegistry};
use crate::reporting::{CostTracker, DeliveryAuditSink, DeliveryRecord, InMemoryAuditSink, InMemoryCostTracker};
use crate::retry::{RetryOrchestrator, RetryOutcome};

/// What happened to one send request
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered {
        provider_id: String,
        provider_message_id: Option<String>,
        attempts: u32,
    },
    RateLimited(RateLimitRejection),
    RetryExhausted {
        provider_id: String,
        attempts: u32,
        last_error: String,
    },
    PermanentFailure {
        provider_id: String,
        attempts: u32,
        error: String,
    },
    CircuitOpen {
        provider_id: String,
        attempts: u32,
    },
    Cancelled {
        provider_id: String,
        attempts: u32,
    },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::RateLimited(_) => "rate_limited",
            DispatchOutcome::RetryExhausted { .. } => "retry_exhausted",
            DispatchOutcome::PermanentFailure { .. } => "permanent_failure",
            DispatchOutcome::CircuitOpen { .. } => "circuit_open",
            DispatchOutcome::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("admission failed: {0}")]
    Gate(#[from] GateError),

    #[error("no provider registered for channel {0}")]
    NoProvider(Channel),
}

/// Runs one send end to end: admission, retry policy resolution, retried
/// provider call behind that provider's breaker, then audit and cost reports.
pub struct NotificationDispatcher {
    gate: Arc<RateLimitingGate>,
    policies: RetryPolicyResolver,
    orchestrator: RetryOrchestrator,
    breakers: Arc<CircuitBreakerRegistry>,
    providers: ProviderRegistry,
    audit: Arc<dyn DeliveryAuditSink>,
    costs: Arc<dyn CostTracker>,
}

impl NotificationDispatcher {
    pub fn new(
        gate: Arc<RateLimitingGate>,
        policies: RetryPolicyResolver,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            gate,
            policies,
            orchestrator: RetryOrchestrator::default(),
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            providers,
            audit: Arc::new(InMemoryAuditSink::new()),
            costs: Arc::new(InMemoryCostTracker::new()),
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: RetryOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn DeliveryAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_costs(mut self, costs: Arc<dyn CostTracker>) -> Self {
        self.costs = costs;
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub async fn dispatch(
        &self,
        request: SendRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        // Unroutable sends must not spend tokens
        let provider = self
            .providers
            .get(request.channel)
            .ok_or(DispatchError::NoProvider(request.channel))?;

        let admission = self.gate.admit(&AdmissionRequest::from(&request)).await?;
        if let AdmissionDecision::Denied(rejection) = admission {
            let outcome = DispatchOutcome::RateLimited(rejection);
            self.report(&request, &outcome, None).await;
            return Ok(outcome);
        }

        let provider_id = provider.provider_id().to_string();
        let policy = self
            .policies
            .resolve_or_default(&request.service_origin, request.channel.as_str())
            .await;
        let breaker = self.breakers.breaker_for(&provider_id);

        let started = Instant::now();
        let delivery = &request.delivery;
        let result = self
            .orchestrator
            .execute_with_retry_classified(
                |_attempt| {
                    let provider = provider.clone();
                    async move {
                        let result: DeliveryResult = provider.send(delivery).await;
                        if result.success {
                            Ok(result)
                        } else {
                            Err(DeliveryFailure::from(result))
                        }
                    }
                },
                &policy,
                breaker.as_ref(),
                cancel,
                |failure: &DeliveryFailure| failure.permanent,
            )
            .await;
        let latency = started.elapsed();

        let outcome = match result {
            RetryOutcome::Success { value, attempts } => DispatchOutcome::Delivered {
                provider_id: provider_id.clone(),
                provider_message_id: value.provider_message_id,
                attempts,
            },
            RetryOutcome::RetryExhausted {
                attempts,
                last_error,
            } => DispatchOutcome::RetryExhausted {
                provider_id: provider_id.clone(),
                attempts,
                last_error: last_error.to_string(),
            },
            RetryOutcome::PermanentFailure { attempts, error } => {
                DispatchOutcome::PermanentFailure {
                    provider_id: provider_id.clone(),
                    attempts,
                    error: error.message,
                }
            }
            RetryOutcome::CircuitOpen { attempts } => DispatchOutcome::CircuitOpen {
                provider_id: provider_id.clone(),
                attempts,
            },
            RetryOutcome::Cancelled { attempts } => DispatchOutcome::Cancelled {
                provider_id: provider_id.clone(),
                attempts,
            },
        };

        info!(
            metric = "delivery",
            outcome = outcome.label(),
            channel = request.channel.as_str(),
            provider_id = %provider_id,
            notification_id = %request.delivery.notification_id,
            latency_ms = latency.as_millis() as u64,
            "dispatch finished"
        );

        self.report(&request, &outcome, Some(&provider_id)).await;
        Ok(outcome)
    }

    async fn report(&self, request: &SendRequest, outcome: &DispatchOutcome, provider_id: Option<&str>) {
        let (attempts, provider_message_id, error) = match outcome {
            DispatchOutcome::Delivered {
                attempts,
                provider_message_id,
                ..
            } => (*attempts, provider_message_id.clone(), None),
            DispatchOutcome::RateLimited(rejection) => (0, None, Some(rejection.message())),
            DispatchOutcome::RetryExhausted {
                attempts,
                last_error,
                ..
            } => (*attempts, None, Some(last_error.clone())),
            DispatchOutcome::PermanentFailure {
                attempts, error, ..
            } => (*attempts, None, Some(error.clone())),
            DispatchOutcome::CircuitOpen { attempts, .. } => {
                (*attempts, None, Some("circuit open".to_string()))
            }
            DispatchOutcome::Cancelled { attempts, .. } => {
                (*attempts, None, Some("cancelled".to_string()))
            }
        };

        let record = DeliveryRecord {
            notification_id: request.delivery.notification_id.clone(),
            tenant_id: request.tenant_id.clone(),
            service_origin: request.service_origin.clone(),
            channel: request.channel,
            provider_id: provider_id.map(str::to_string),
            provider_message_id,
            outcome: outcome.label().to_string(),
            attempts,
            error,
            recorded_at: Utc::now(),
        };

        match outcome {
            DispatchOutcome::RetryExhausted { .. } => {
                warn!(
                    notification_id = %record.notification_id,
                    attempts,
                    "retries exhausted, dead-lettering"
                );
                self.audit.record_delivery(record.clone()).await;
                self.audit.dead_letter(record).await;
            }
            DispatchOutcome::Delivered { provider_id, .. } => {
                self.audit.record_delivery(record).await;
                self.costs
                    .record_delivery_cost(&request.service_origin, request.channel, provider_id)
                    .await;
            }
            _ => self.audit.record_delivery(record).await,
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("gate", &self.gate)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}
