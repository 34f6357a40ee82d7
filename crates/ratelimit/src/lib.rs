//! Admission control and provider protection for notify-guard
//!
//! - `RateLimitingGate`: resolves the applicable rate-limit row and checks the
//!   per-user and per-service token buckets before a send proceeds
//! - `TokenBucketLimiter`: atomic check-and-consume over a `TokenStore`
//!   (in-memory or a Redis Lua script)
//! - `RateLimitConfigResolver`: wildcard fallback lookup of rate-limit rows
//! - `CircuitBreaker`: per-provider failure gate, with a registry
//! - `BackoffCalculator`: exponential retry delay with jitter

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod gate;
pub mod limiter;
pub mod redis_store;
pub mod resolver;
pub mod response;
pub mod token_store;

pub use backoff::BackoffCalculator;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
    InMemoryCircuitBreaker,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use gate::{
    AdmissionDecision, AdmissionRecorder, AdmissionRequest, GateConfig, GateError,
    NoopAdmissionRecorder, RateLimitingGate, UnlimitedReason, DEFAULT_ADMIN_SCOPE,
};
pub use limiter::{
    service_bucket_key, service_bucket_params, user_bucket_key, user_bucket_params,
    BucketDecision, TokenBucketLimiter,
};
pub use redis_store::{RedisTokenStore, RedisTokenStoreConfig};
pub use resolver::{RateLimitConfigResolver, ResolveError};
pub use response::{BucketScope, RateLimitRejection, RATE_LIMIT_EXCEEDED};
pub use token_store::{
    BucketParams, BucketState, ConsumeOutcome, InMemoryTokenStore, TokenStore, TokenStoreError,
};
