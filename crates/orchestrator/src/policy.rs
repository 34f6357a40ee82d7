use notify_guard_store::{ConfigStore, StoreError};
use notify_guard_types::{RetryPolicy, WILDCARD};
use std::sync::Arc;
use tracing::{debug, warn};

/// Finds the most specific retry policy for a (service origin, channel) pair.
///
/// Lookup order, first match wins:
/// 1. `(service, channel)`
/// 2. `(*, channel)`
/// 3. `(service, *)`
/// 4. `(*, *)`
#[derive(Clone)]
pub struct RetryPolicyResolver {
    store: Arc<dyn ConfigStore>,
}

impl RetryPolicyResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RetryPolicy>, StoreError> {
        for (service, chan) in Self::candidates(service_origin, channel) {
            if let Some(policy) = self.store.get_retry_policy(service, chan).await? {
                debug!(matched = %policy.key(), service_origin, channel, "resolved retry policy");
                return Ok(Some(policy));
            }
        }
        Ok(None)
    }

    /// Resolve, falling back to the built-in `(*, *)` policy when nothing
    /// matches or the store cannot be read
    pub async fn resolve_or_default(&self, service_origin: &str, channel: &str) -> RetryPolicy {
        match self.resolve(service_origin, channel).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                debug!(service_origin, channel, "no retry policy configured, using default");
                RetryPolicy::default()
            }
            Err(err) => {
                warn!(
                    error = %err,
                    service_origin,
                    channel,
                    "retry policy lookup failed, using default"
                );
                RetryPolicy::default()
            }
        }
    }

    fn candidates<'a>(service_origin: &'a str, channel: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut chain = vec![
            (service_origin, channel),
            (WILDCARD, channel),
            (service_origin, WILDCARD),
            (WILDCARD, WILDCARD),
        ];
        // Keep first occurrences only (e.g. when the caller already passed `*`)
        let mut seen = Vec::with_capacity(chain.len());
        chain.retain(|pair| {
            if seen.contains(pair) {
                false
            } else {
                seen.push(*pair);
                true
            }
        });
        chain
    }
}

impl std::fmt::Debug for RetryPolicyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyResolver").finish_non_exhaustive()
    }
}
