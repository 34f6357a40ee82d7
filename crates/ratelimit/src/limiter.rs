use notify_guard_types::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::token_store::{BucketParams, TokenStore, TokenStoreError};

/// Outcome of one bucket check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
    /// The store could not be reached; the request is let through
    FailedOpen,
}

impl BucketDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, BucketDecision::Denied { .. })
    }
}

fn tenant_segment(tenant_id: Option<&str>) -> &str {
    tenant_id.unwrap_or("global")
}

/// `ratelimit:{tenant|global}:user:{user}:{channel}`
pub fn user_bucket_key(tenant_id: Option<&str>, user_id: &str, channel: &str) -> String {
    format!(
        "ratelimit:{}:user:{}:{}",
        tenant_segment(tenant_id),
        user_id,
        channel
    )
}

/// `ratelimit:{tenant|global}:service:{service}:{channel}`
pub fn service_bucket_key(tenant_id: Option<&str>, service_origin: &str, channel: &str) -> String {
    format!(
        "ratelimit:{}:service:{}:{}",
        tenant_segment(tenant_id),
        service_origin,
        channel
    )
}

/// Per-user bucket: refills `per_user_max` per window, capped at `per_user_max_cap`
pub fn user_bucket_params(config: &RateLimitConfig) -> BucketParams {
    BucketParams::per_window(config.per_user_max, config.per_user_window_seconds)
        .with_burst(config.burst_size)
        .with_hard_ceiling(config.per_user_max_cap)
}

/// Per-service bucket: refills `per_service_max` per window, capped at `per_service_max_cap`
pub fn service_bucket_params(config: &RateLimitConfig) -> BucketParams {
    BucketParams::per_window(config.per_service_max, config.per_service_window_seconds)
        .with_burst(config.burst_size)
        .with_hard_ceiling(config.per_service_max_cap)
}

/// Token-bucket limiter over a shared [`TokenStore`]
pub struct TokenBucketLimiter {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Atomically refill, check and consume one token.
    ///
    /// Store failures fail open.
    pub async fn check_and_consume(&self, key: &str, params: &BucketParams) -> BucketDecision {
        let now_ms = self.clock.now_ms();

        match self.store.check_and_consume(key, params, now_ms).await {
            Ok(outcome) if outcome.allowed => {
                let remaining = outcome.state.tokens.max(0.0).floor() as u32;
                debug!(key, remaining, "token consumed");
                BucketDecision::Allowed { remaining }
            }
            Ok(outcome) => {
                let wait_ms = params.millis_until_token(Some(&outcome.state), now_ms);
                let retry_after = Duration::from_millis(wait_ms.max(0) as u64);
                debug!(key, retry_after_ms = wait_ms, "bucket empty");
                BucketDecision::Denied { retry_after }
            }
            Err(err) => {
                warn!(
                    metric = "fail_open",
                    reason = "store_unavailable",
                    key,
                    error = %err,
                    "token store unavailable, failing open"
                );
                BucketDecision::FailedOpen
            }
        }
    }

    /// Tokens available right now, without consuming
    pub async fn remaining(&self, key: &str, params: &BucketParams) -> Result<u32, TokenStoreError> {
        let now_ms = self.clock.now_ms();
        let state = self.store.peek(key, now_ms).await?;
        Ok(params.refilled_tokens(state.as_ref(), now_ms).max(0.0).floor() as u32)
    }

    /// Time until at least one token is available
    pub async fn time_until_token(
        &self,
        key: &str,
        params: &BucketParams,
    ) -> Result<Duration, TokenStoreError> {
        let now_ms = self.clock.now_ms();
        let state = self.store.peek(key, now_ms).await?;
        let wait_ms = params.millis_until_token(state.as_ref(), now_ms);
        Ok(Duration::from_millis(wait_ms.max(0) as u64))
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
