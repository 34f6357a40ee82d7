use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// BUCKET MODEL
// ═══════════════════════════════════════════════════════════════════════════

/// Shape of one token bucket, derived from a rate-limit row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    /// Tokens refilled per window
    pub max_capacity: u32,
    pub refill_per_second: f64,
    /// Headroom above `max_capacity`
    pub burst: u32,
    /// Bucket state expires this long after the last consume
    pub window_seconds: u64,
    /// Hard cap that burst cannot push past
    pub hard_ceiling: Option<u32>,
}

impl BucketParams {
    /// Refill `max_capacity` tokens every `window_seconds`
    pub fn per_window(max_capacity: u32, window_seconds: u64) -> Self {
        let refill_per_second = if window_seconds == 0 {
            0.0
        } else {
            f64::from(max_capacity) / window_seconds as f64
        };

        Self {
            max_capacity,
            refill_per_second,
            burst: 0,
            window_seconds,
            hard_ceiling: None,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_hard_ceiling(mut self, ceiling: u32) -> Self {
        self.hard_ceiling = Some(ceiling);
        self
    }

    /// Most tokens the bucket can ever hold; new buckets start here
    pub fn ceiling(&self) -> u32 {
        let with_burst = self.max_capacity.saturating_add(self.burst);
        match self.hard_ceiling {
            Some(cap) => with_burst.min(cap),
            None => with_burst,
        }
    }

    /// Tokens available at `now_ms` given a stored state, without consuming
    pub fn refilled_tokens(&self, state: Option<&BucketState>, now_ms: i64) -> f64 {
        let ceiling = f64::from(self.ceiling());
        let Some(state) = state else {
            return ceiling;
        };

        let elapsed_secs = now_ms.saturating_sub(state.last_refill_ms).max(0) as f64 / 1000.0;
        // Epsilon keeps exact multiples (e.g. 12s at 5/60 per second) from flooring short
        let added = (elapsed_secs * self.refill_per_second + 1e-9).floor();
        (state.tokens + added).min(ceiling)
    }

    /// Milliseconds from `now_ms` until at least one token is available
    pub fn millis_until_token(&self, state: Option<&BucketState>, now_ms: i64) -> i64 {
        let Some(state) = state else {
            return if self.ceiling() >= 1 { 0 } else { self.window_millis() };
        };
        if self.refilled_tokens(Some(state), now_ms) >= 1.0 {
            return 0;
        }
        if self.refill_per_second <= 0.0 {
            return self.window_millis();
        }

        let needed = (1.0 - state.tokens).max(0.0).ceil();
        let wait_ms = (needed / self.refill_per_second * 1000.0 - 1e-6).ceil() as i64;
        state
            .last_refill_ms
            .saturating_add(wait_ms)
            .saturating_sub(now_ms)
            .max(0)
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Persisted bucket state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: i64,
}

/// Result of one atomic check-and-consume.
///
/// On success `state` is the state written back. On denial it is the state as
/// stored, before refill, so callers can compute when the next token lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    pub state: BucketState,
}

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected token store reply: {0}")]
    InvalidReply(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Shared key-value store holding token-bucket state.
///
/// `check_and_consume` must be atomic across every process sharing the store.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn check_and_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: i64,
    ) -> Result<ConsumeOutcome, TokenStoreError>;

    /// Read the stored state without refilling or consuming
    async fn peek(&self, key: &str, now_ms: i64) -> Result<Option<BucketState>, TokenStoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (single process)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: BucketState,
    expires_at_ms: i64,
}

/// Process-local token store. Atomic within the process via a mutex; TTLs are
/// applied lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    buckets: Mutex<HashMap<String, StoredBucket>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets (for testing)
    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .map(|buckets| buckets.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredBucket>>, TokenStoreError> {
        self.buckets
            .lock()
            .map_err(|_| TokenStoreError::Unavailable("token store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn check_and_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: i64,
    ) -> Result<ConsumeOutcome, TokenStoreError> {
        let mut buckets = self.lock()?;

        let stored = buckets
            .get(key)
            .filter(|bucket| bucket.expires_at_ms > now_ms)
            .map(|bucket| bucket.state);

        let tokens = params.refilled_tokens(stored.as_ref(), now_ms);
        if tokens >= 1.0 {
            let state = BucketState {
                tokens: tokens - 1.0,
                last_refill_ms: now_ms,
            };
            let ttl_ms = i64::try_from(params.window_seconds.saturating_mul(1000))
                .unwrap_or(i64::MAX);
            buckets.insert(
                key.to_string(),
                StoredBucket {
                    state,
                    expires_at_ms: now_ms.saturating_add(ttl_ms),
                },
            );
            return Ok(ConsumeOutcome {
                allowed: true,
                state,
            });
        }

        let state = stored.unwrap_or(BucketState {
            tokens,
            last_refill_ms: now_ms,
        });
        Ok(ConsumeOutcome {
            allowed: false,
            state,
        })
    }

    async fn peek(&self, key: &str, now_ms: i64) -> Result<Option<BucketState>, TokenStoreError> {
        let buckets = self.lock()?;
        Ok(buckets
            .get(key)
            .filter(|bucket| bucket.expires_at_ms > now_ms)
            .map(|bucket| bucket.state))
    }
}
