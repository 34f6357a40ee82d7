use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ConfigRowError, WILDCARD};

/// Identifies a rate-limit configuration row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitKey {
    /// `None` is the global (all tenants) row
    pub tenant_id: Option<String>,
    pub service_origin: String,
    pub channel: String,
}

impl RateLimitKey {
    pub fn new(
        tenant_id: Option<&str>,
        service_origin: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.map(str::to_string),
            service_origin: service_origin.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id.as_deref().unwrap_or("global"),
            self.service_origin,
            self.channel
        )
    }
}

/// Rate-limit configuration for a (tenant, service origin, channel) tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Owning tenant, `None` for global rows
    pub tenant_id: Option<String>,

    /// Service origin or `*`
    pub service_origin: String,

    /// Channel name or `*`
    pub channel: String,

    /// Per-user refill window
    pub per_user_window_seconds: u64,

    /// Tokens refilled per user window
    pub per_user_max: u32,

    /// Hard ceiling of the per-user bucket
    pub per_user_max_cap: u32,

    /// Per-service refill window
    pub per_service_window_seconds: u64,

    /// Tokens refilled per service window
    pub per_service_max: u32,

    /// Hard ceiling of the per-service bucket
    pub per_service_max_cap: u32,

    /// Extra headroom above the refill maximum
    pub burst_size: u32,

    pub enabled: bool,
}

impl RateLimitConfig {
    /// Global row (applies to every tenant without a more specific row)
    pub fn global(service_origin: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            service_origin: service_origin.into(),
            channel: channel.into(),
            per_user_window_seconds: 60,
            per_user_max: 10,
            per_user_max_cap: 10,
            per_service_window_seconds: 60,
            per_service_max: 1000,
            per_service_max_cap: 1000,
            burst_size: 0,
            enabled: true,
        }
    }

    /// Tenant-scoped row
    pub fn for_tenant(
        tenant_id: impl Into<String>,
        service_origin: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::global(service_origin, channel)
        }
    }

    /// Sets the per-user refill rate; raises the cap if it would fall below `max`
    pub fn with_per_user(mut self, max: u32, window_seconds: u64) -> Self {
        self.per_user_max = max;
        self.per_user_window_seconds = window_seconds;
        self.per_user_max_cap = self.per_user_max_cap.max(max);
        self
    }

    pub fn with_per_user_cap(mut self, cap: u32) -> Self {
        self.per_user_max_cap = cap;
        self
    }

    /// Sets the per-service refill rate; raises the cap if it would fall below `max`
    pub fn with_per_service(mut self, max: u32, window_seconds: u64) -> Self {
        self.per_service_max = max;
        self.per_service_window_seconds = window_seconds;
        self.per_service_max_cap = self.per_service_max_cap.max(max);
        self
    }

    pub fn with_per_service_cap(mut self, cap: u32) -> Self {
        self.per_service_max_cap = cap;
        self
    }

    pub fn with_burst(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn key(&self) -> RateLimitKey {
        RateLimitKey {
            tenant_id: self.tenant_id.clone(),
            service_origin: self.service_origin.clone(),
            channel: self.channel.clone(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// Check the row invariants before it is stored or used
    pub fn validate(&self) -> Result<(), ConfigRowError> {
        if self.service_origin.is_empty() {
            return Err(ConfigRowError::EmptyField("service_origin"));
        }
        if self.channel.is_empty() {
            return Err(ConfigRowError::EmptyField("channel"));
        }
        if matches!(self.tenant_id.as_deref(), Some("")) {
            return Err(ConfigRowError::EmptyField("tenant_id"));
        }
        if self.per_user_window_seconds == 0 {
            return Err(ConfigRowError::ZeroWindow("per_user_window_seconds"));
        }
        if self.per_service_window_seconds == 0 {
            return Err(ConfigRowError::ZeroWindow("per_service_window_seconds"));
        }
        if self.per_user_max_cap < self.per_user_max {
            return Err(ConfigRowError::CapBelowMax {
                scope: "per_user",
                cap: self.per_user_max_cap,
                max: self.per_user_max,
            });
        }
        if self.per_service_max_cap < self.per_service_max {
            return Err(ConfigRowError::CapBelowMax {
                scope: "per_service",
                cap: self.per_service_max_cap,
                max: self.per_service_max,
            });
        }
        Ok(())
    }
}

/// Identifies a retry policy row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetryPolicyKey {
    pub service_origin: String,
    pub channel: String,
}

impl RetryPolicyKey {
    pub fn new(service_origin: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            service_origin: service_origin.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for RetryPolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_origin, self.channel)
    }
}

/// Retry behaviour for deliveries of a (service origin, channel) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub service_origin: String,
    pub channel: String,

    /// Total attempts including the first one
    pub max_attempts: u32,

    pub base_delay_seconds: f64,

    pub backoff_factor: f64,

    /// Upper bound of the uniform random jitter added to each delay
    pub jitter_ms: u64,

    /// Per-attempt timeout
    pub timeout_seconds: f64,

    pub enabled: bool,
}

impl RetryPolicy {
    pub fn new(service_origin: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            service_origin: service_origin.into(),
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base_delay_seconds: f64, backoff_factor: f64) -> Self {
        self.base_delay_seconds = base_delay_seconds;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn key(&self) -> RetryPolicyKey {
        RetryPolicyKey::new(self.service_origin.clone(), self.channel.clone())
    }

    /// Attempts the orchestrator will make; a disabled policy still makes one
    pub fn effective_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConfigRowError> {
        if self.service_origin.is_empty() {
            return Err(ConfigRowError::EmptyField("service_origin"));
        }
        if self.channel.is_empty() {
            return Err(ConfigRowError::EmptyField("channel"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigRowError::ZeroMaxAttempts);
        }
        if !self.base_delay_seconds.is_finite() || self.base_delay_seconds < 0.0 {
            return Err(ConfigRowError::InvalidNumber {
                field: "base_delay_seconds",
                value: self.base_delay_seconds,
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Err(ConfigRowError::InvalidNumber {
                field: "backoff_factor",
                value: self.backoff_factor,
            });
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ConfigRowError::InvalidNumber {
                field: "timeout_seconds",
                value: self.timeout_seconds,
            });
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    /// The `(*, *)` policy used when nothing more specific is configured
    fn default() -> Self {
        Self {
            service_origin: WILDCARD.to_string(),
            channel: WILDCARD.to_string(),
            max_attempts: 3,
            base_delay_seconds: 2.0,
            backoff_factor: 2.0,
            jitter_ms: 500,
            timeout_seconds: 30.0,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_builders_keep_cap_invariant() {
        let config = RateLimitConfig::for_tenant("tenant-a", "orders", "sms")
            .with_per_user(5, 60)
            .with_per_user_cap(7)
            .with_burst(2);

        assert_eq!(config.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(config.per_user_max, 5);
        assert_eq!(config.per_user_max_cap, 7);
        assert!(config.validate().is_ok());

        // Raising max past the existing cap drags the cap along
        let raised = RateLimitConfig::global("*", "sms").with_per_user(50, 60);
        assert_eq!(raised.per_user_max_cap, 50);
    }

    #[test]
    fn test_rate_limit_config_rejects_cap_below_max() {
        let config = RateLimitConfig::global("orders", "sms")
            .with_per_user(5, 60)
            .with_per_user_cap(3);

        assert!(matches!(
            config.validate(),
            Err(ConfigRowError::CapBelowMax { scope: "per_user", .. })
        ));
    }

    #[test]
    fn test_rate_limit_config_rejects_zero_window() {
        let mut config = RateLimitConfig::global("orders", "sms");
        config.per_service_window_seconds = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigRowError::ZeroWindow("per_service_window_seconds"))
        ));
    }

    #[test]
    fn test_retry_policy_effective_attempts() {
        let policy = RetryPolicy::new("auth", "sms").with_max_attempts(4);
        assert_eq!(policy.effective_attempts(), 4);
        assert_eq!(policy.clone().disabled().effective_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default()
            .with_timeout_seconds(0.0)
            .validate()
            .is_err());
        assert!(RetryPolicy::default()
            .with_backoff(1.0, f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_key_display() {
        let config = RateLimitConfig::global("*", "push");
        assert_eq!(config.key().to_string(), "global/*/push");

        let policy = RetryPolicy::new("billing", "email");
        assert_eq!(policy.key().to_string(), "billing/email");
    }
}
