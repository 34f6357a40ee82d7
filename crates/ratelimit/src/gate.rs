use async_trait::async_trait;
use notify_guard_store::StoreError;
use notify_guard_types::{ConfigRowError, RateLimitConfig, SendRequest};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::limiter::{
    service_bucket_key, service_bucket_params, user_bucket_key, user_bucket_params,
    BucketDecision, TokenBucketLimiter,
};
use crate::resolver::{RateLimitConfigResolver, ResolveError};
use crate::response::{BucketScope, RateLimitRejection};
use crate::token_store::{BucketParams, TokenStoreError};

pub const DEFAULT_ADMIN_SCOPE: &str = "notifications:admin";

// ═══════════════════════════════════════════════════════════════════════════
// REQUEST / DECISION TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionRequest {
    pub tenant_id: Option<String>,
    pub user_id: String,
    pub service_origin: String,
    pub channel: String,
    /// Scope the caller presented after upstream verification
    pub elevated_scope: Option<String>,
}

impl AdmissionRequest {
    pub fn new(
        tenant_id: Option<&str>,
        user_id: impl Into<String>,
        service_origin: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.map(str::to_string),
            user_id: user_id.into(),
            service_origin: service_origin.into(),
            channel: channel.into(),
            elevated_scope: None,
        }
    }

    pub fn with_elevated_scope(mut self, scope: impl Into<String>) -> Self {
        self.elevated_scope = Some(scope.into());
        self
    }
}

impl From<&SendRequest> for AdmissionRequest {
    fn from(request: &SendRequest) -> Self {
        Self {
            tenant_id: request.tenant_id.clone(),
            user_id: request.user_id.clone(),
            service_origin: request.service_origin.clone(),
            channel: request.channel.as_str().to_string(),
            elevated_scope: request.elevated_scope.clone(),
        }
    }
}

/// Why a request was let through without a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlimitedReason {
    NoConfig,
    Disabled,
    StoreUnavailable,
}

impl UnlimitedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlimitedReason::NoConfig => "no_config",
            UnlimitedReason::Disabled => "disabled",
            UnlimitedReason::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Both buckets had a token; `limit`/`remaining` describe the tighter one
    Allowed { limit: u32, remaining: u32 },
    Unlimited { reason: UnlimitedReason },
    /// Admin override, no buckets touched
    Bypassed,
    Denied(RateLimitRejection),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AdmissionDecision::Denied(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdmissionDecision::Allowed { .. } => "allowed",
            AdmissionDecision::Unlimited { .. } => "unlimited",
            AdmissionDecision::Bypassed => "bypassed",
            AdmissionDecision::Denied(_) => "denied",
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("malformed rate-limit configuration: {0}")]
    InvalidConfig(#[from] ConfigRowError),

    #[error("configuration store error: {0}")]
    ConfigStore(#[from] StoreError),

    #[error("token store error: {0}")]
    TokenStore(#[from] TokenStoreError),
}

/// Receives every admission decision, including overrides
#[async_trait]
pub trait AdmissionRecorder: Send + Sync {
    async fn record_admission(&self, request: &AdmissionRequest, decision: &AdmissionDecision);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdmissionRecorder;

#[async_trait]
impl AdmissionRecorder for NoopAdmissionRecorder {
    async fn record_admission(&self, _request: &AdmissionRequest, _decision: &AdmissionDecision) {}
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Scope that skips quota checks; `None` disables overrides
    pub admin_scope: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            admin_scope: Some(DEFAULT_ADMIN_SCOPE.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GATE
// ═══════════════════════════════════════════════════════════════════════════

enum Resolved {
    Limited(RateLimitConfig),
    Unlimited(UnlimitedReason),
}

struct BucketPlan {
    scope: BucketScope,
    key: String,
    params: BucketParams,
}

/// Entry point for send admission: resolves configuration, then checks the
/// per-user bucket and the per-service bucket. Both must pass.
pub struct RateLimitingGate {
    resolver: RateLimitConfigResolver,
    limiter: TokenBucketLimiter,
    recorder: Arc<dyn AdmissionRecorder>,
    config: GateConfig,
}

impl RateLimitingGate {
    pub fn new(resolver: RateLimitConfigResolver, limiter: TokenBucketLimiter) -> Self {
        Self {
            resolver,
            limiter,
            recorder: Arc::new(NoopAdmissionRecorder),
            config: GateConfig::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn AdmissionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Decide whether a send may proceed, consuming tokens when it may
    pub async fn admit(&self, request: &AdmissionRequest) -> Result<AdmissionDecision, GateError> {
        let decision = self.decide(request).await?;
        let scope = match &decision {
            AdmissionDecision::Denied(rejection) => rejection.scope.as_str(),
            _ => "none",
        };

        info!(
            metric = "admission",
            decision = decision.label(),
            scope,
            tenant_id = request.tenant_id.as_deref().unwrap_or("global"),
            service_origin = %request.service_origin,
            channel = %request.channel,
            "admission decided"
        );
        self.recorder.record_admission(request, &decision).await;

        Ok(decision)
    }

    /// Boolean form of [`admit`](Self::admit)
    pub async fn is_allowed(
        &self,
        tenant_id: Option<&str>,
        user_id: &str,
        service_origin: &str,
        channel: &str,
    ) -> Result<bool, GateError> {
        let request = AdmissionRequest::new(tenant_id, user_id, service_origin, channel);
        Ok(self.admit(&request).await?.is_allowed())
    }

    /// Smallest remaining token count across both buckets, without consuming.
    /// `None` when no limit applies.
    pub async fn get_remaining_capacity(
        &self,
        tenant_id: Option<&str>,
        user_id: &str,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<u32>, GateError> {
        let config = match self.resolve_strict(tenant_id, service_origin, channel).await? {
            Resolved::Limited(config) => config,
            Resolved::Unlimited(_) => return Ok(None),
        };

        let mut remaining = u32::MAX;
        for plan in Self::plans(&config, tenant_id, user_id, service_origin, channel) {
            remaining = remaining.min(self.limiter.remaining(&plan.key, &plan.params).await?);
        }
        Ok(Some(remaining))
    }

    /// Longest wait until both buckets have a token. Zero when a request
    /// would pass now or no limit applies.
    pub async fn get_time_until_reset(
        &self,
        tenant_id: Option<&str>,
        user_id: &str,
        service_origin: &str,
        channel: &str,
    ) -> Result<Duration, GateError> {
        let config = match self.resolve_strict(tenant_id, service_origin, channel).await? {
            Resolved::Limited(config) => config,
            Resolved::Unlimited(_) => return Ok(Duration::ZERO),
        };

        let mut longest = Duration::ZERO;
        for plan in Self::plans(&config, tenant_id, user_id, service_origin, channel) {
            longest = longest.max(self.limiter.time_until_token(&plan.key, &plan.params).await?);
        }
        Ok(longest)
    }

    async fn decide(&self, request: &AdmissionRequest) -> Result<AdmissionDecision, GateError> {
        if self.is_override(request) {
            info!(
                tenant_id = request.tenant_id.as_deref().unwrap_or("global"),
                user_id = %request.user_id,
                service_origin = %request.service_origin,
                channel = %request.channel,
                "admin override, skipping rate limits"
            );
            return Ok(AdmissionDecision::Bypassed);
        }

        let tenant_id = request.tenant_id.as_deref();
        let config = match self
            .resolve_failing_open(tenant_id, &request.service_origin, &request.channel)
            .await?
        {
            Resolved::Limited(config) => config,
            Resolved::Unlimited(reason) => return Ok(AdmissionDecision::Unlimited { reason }),
        };

        let mut tightest: Option<(u32, u32)> = None;
        for plan in Self::plans(
            &config,
            tenant_id,
            &request.user_id,
            &request.service_origin,
            &request.channel,
        ) {
            match self.limiter.check_and_consume(&plan.key, &plan.params).await {
                BucketDecision::Allowed { remaining } => {
                    let limit = plan.params.ceiling();
                    if tightest.map_or(true, |(_, r)| remaining < r) {
                        tightest = Some((limit, remaining));
                    }
                }
                // A user-bucket denial skips the service bucket entirely
                BucketDecision::Denied { retry_after } => {
                    return Ok(AdmissionDecision::Denied(self.rejection(
                        plan.scope,
                        plan.params.ceiling(),
                        retry_after,
                    )));
                }
                BucketDecision::FailedOpen => {}
            }
        }

        Ok(match tightest {
            Some((limit, remaining)) => AdmissionDecision::Allowed { limit, remaining },
            None => AdmissionDecision::Unlimited {
                reason: UnlimitedReason::StoreUnavailable,
            },
        })
    }

    fn is_override(&self, request: &AdmissionRequest) -> bool {
        match (&self.config.admin_scope, &request.elevated_scope) {
            (Some(admin), Some(presented)) => admin == presented,
            _ => false,
        }
    }

    fn rejection(&self, scope: BucketScope, limit: u32, retry_after: Duration) -> RateLimitRejection {
        let now_ms = self.limiter.clock().now_ms();
        let retry_ms = i64::try_from(retry_after.as_millis()).unwrap_or(i64::MAX);
        let reset_ms = now_ms.saturating_add(retry_ms);
        // Round up to the next whole second
        let reset_at = reset_ms.saturating_add(999).div_euclid(1000);

        RateLimitRejection {
            scope,
            limit,
            remaining: 0,
            retry_after,
            reset_at,
        }
    }

    fn plans(
        config: &RateLimitConfig,
        tenant_id: Option<&str>,
        user_id: &str,
        service_origin: &str,
        channel: &str,
    ) -> [BucketPlan; 2] {
        [
            BucketPlan {
                scope: BucketScope::User,
                key: user_bucket_key(tenant_id, user_id, channel),
                params: user_bucket_params(config),
            },
            BucketPlan {
                scope: BucketScope::Service,
                key: service_bucket_key(tenant_id, service_origin, channel),
                params: service_bucket_params(config),
            },
        ]
    }

    /// Admission path: a store outage or a missing row means no limit
    async fn resolve_failing_open(
        &self,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Result<Resolved, GateError> {
        match self.resolver.resolve(tenant_id, service_origin, channel).await {
            Ok(resolved) => Ok(Self::classify(resolved, tenant_id, service_origin, channel)),
            Err(ResolveError::Store(err)) => {
                warn!(
                    metric = "fail_open",
                    reason = UnlimitedReason::StoreUnavailable.as_str(),
                    error = %err,
                    service_origin,
                    channel,
                    "configuration store unavailable, failing open"
                );
                Ok(Resolved::Unlimited(UnlimitedReason::StoreUnavailable))
            }
            Err(ResolveError::Invalid(err)) => Err(GateError::InvalidConfig(err)),
        }
    }

    /// Observability path: store errors surface to the caller
    async fn resolve_strict(
        &self,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Result<Resolved, GateError> {
        match self.resolver.resolve(tenant_id, service_origin, channel).await {
            Ok(resolved) => Ok(Self::classify(resolved, tenant_id, service_origin, channel)),
            Err(ResolveError::Store(err)) => Err(GateError::ConfigStore(err)),
            Err(ResolveError::Invalid(err)) => Err(GateError::InvalidConfig(err)),
        }
    }

    fn classify(
        resolved: Option<RateLimitConfig>,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Resolved {
        match resolved {
            Some(config) if config.enabled => Resolved::Limited(config),
            Some(config) => {
                tracing::debug!(matched = %config.key(), "rate limiting disabled for row");
                Resolved::Unlimited(UnlimitedReason::Disabled)
            }
            None => {
                warn!(
                    metric = "fail_open",
                    reason = UnlimitedReason::NoConfig.as_str(),
                    tenant_id = tenant_id.unwrap_or("global"),
                    service_origin,
                    channel,
                    "no rate-limit configuration found, failing open"
                );
                Resolved::Unlimited(UnlimitedReason::NoConfig)
            }
        }
    }
}

impl std::fmt::Debug for RateLimitingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitingGate")
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
