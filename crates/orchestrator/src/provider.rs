use async_trait::async_trait;
use notify_guard_types::{Channel, DeliveryRequest, DeliveryResult};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outbound gateway for one channel (an SMS, email or push provider)
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn provider_id(&self) -> &str;

    fn channel(&self) -> Channel;

    async fn send(&self, request: &DeliveryRequest) -> DeliveryResult;
}

/// A non-success [`DeliveryResult`] in error form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider_id}: {message}")]
pub struct DeliveryFailure {
    pub provider_id: String,
    pub message: String,
    /// Retrying cannot help
    pub permanent: bool,
}

impl From<DeliveryResult> for DeliveryFailure {
    fn from(result: DeliveryResult) -> Self {
        Self {
            provider_id: result.provider_id,
            message: result
                .error_message
                .unwrap_or_else(|| "provider reported failure".to_string()),
            permanent: result.permanent,
        }
    }
}

/// One gateway per channel
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn ProviderGateway>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its own channel, replacing any previous one
    pub fn register(mut self, provider: Arc<dyn ProviderGateway>) -> Self {
        self.providers.insert(provider.channel(), provider);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ProviderGateway>> {
        self.providers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<_> = self.providers.keys().copied().collect();
        channels.sort_by_key(|c| c.as_str());
        channels
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self
            .providers
            .values()
            .map(|p| p.provider_id().to_string())
            .collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &ids)
            .finish()
    }
}

/// Stand-in provider with a configurable failure rate, used by the simulator
#[derive(Debug)]
pub struct SimulatedProvider {
    provider_id: String,
    channel: Channel,
    failure_rate: f64,
    latency: Duration,
    sent: AtomicU64,
}

impl SimulatedProvider {
    pub fn new(provider_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            provider_id: provider_id.into(),
            channel,
            failure_rate: 0.0,
            latency: Duration::ZERO,
            sent: AtomicU64::new(0),
        }
    }

    /// Fraction of sends, in `[0, 1]`, that fail transiently
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sends attempted so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Default simulated gateway for each channel
    pub fn registry(failure_rate: f64) -> ProviderRegistry {
        Channel::ALL
            .iter()
            .fold(ProviderRegistry::new(), |registry, channel| {
                let provider_id = match channel {
                    Channel::Sms => "sim-sms",
                    Channel::Email => "sim-email",
                    Channel::Push => "sim-push",
                };
                registry.register(Arc::new(
                    SimulatedProvider::new(provider_id, *channel).with_failure_rate(failure_rate),
                ))
            })
    }
}

#[async_trait]
impl ProviderGateway for SimulatedProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, request: &DeliveryRequest) -> DeliveryResult {
        let sequence = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let roll: f64 = rand::thread_rng().gen();
        if roll < self.failure_rate {
            DeliveryResult::failed(&self.provider_id, "simulated provider error")
        } else {
            DeliveryResult::delivered(
                &self.provider_id,
                format!("{}-{}-{}", self.provider_id, request.notification_id, sequence),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_result() {
        let failure = DeliveryFailure::from(DeliveryResult::rejected("twilio", "invalid number"));
        assert!(failure.permanent);
        assert_eq!(failure.to_string(), "twilio: invalid number");

        let mut result = DeliveryResult::failed("ses", "x");
        result.error_message = None;
        assert_eq!(
            DeliveryFailure::from(result).message,
            "provider reported failure"
        );
    }

    #[tokio::test]
    async fn test_simulated_provider_rates() {
        let request = DeliveryRequest::new("n-1", "+15550100", "hello");

        let always_ok = SimulatedProvider::new("sim", Channel::Sms);
        for _ in 0..10 {
            assert!(always_ok.send(&request).await.success);
        }
        assert_eq!(always_ok.sent(), 10);

        let always_fails = SimulatedProvider::new("sim", Channel::Sms).with_failure_rate(1.0);
        let result = always_fails.send(&request).await;
        assert!(!result.success);
        assert!(!result.permanent);
    }

    #[test]
    fn test_registry_covers_every_channel() {
        let registry = SimulatedProvider::registry(0.0);
        assert_eq!(registry.channels().len(), 3);
        assert_eq!(
            registry.get(Channel::Email).unwrap().provider_id(),
            "sim-email"
        );
    }
}
