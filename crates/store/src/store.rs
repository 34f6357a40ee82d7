use async_trait::async_trait;
use notify_guard_types::{ConfigRowError, RateLimitConfig, RateLimitKey, RetryPolicy, RetryPolicyKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid configuration row: {0}")]
    InvalidRow(#[from] ConfigRowError),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Relational configuration store holding rate-limit and retry policy rows.
///
/// Lookups are exact matches on the row key; wildcard fallback is the
/// resolvers' job. Writes come from the admin surface and from seeding.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Get the rate-limit row with exactly this key
    async fn get_rate_limit_config(
        &self,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RateLimitConfig>, StoreError>;

    /// Get the retry policy row with exactly this key
    async fn get_retry_policy(
        &self,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RetryPolicy>, StoreError>;

    /// Insert or replace a rate-limit row
    async fn upsert_rate_limit_config(&self, config: &RateLimitConfig) -> Result<(), StoreError>;

    /// Insert or replace a retry policy row
    async fn upsert_retry_policy(&self, policy: &RetryPolicy) -> Result<(), StoreError>;

    /// Remove a rate-limit row, returning whether it existed
    async fn delete_rate_limit_config(&self, key: &RateLimitKey) -> Result<bool, StoreError>;

    /// Remove a retry policy row, returning whether it existed
    async fn delete_retry_policy(&self, key: &RetryPolicyKey) -> Result<bool, StoreError>;

    async fn list_rate_limit_configs(&self) -> Result<Vec<RateLimitConfig>, StoreError>;

    async fn list_retry_policies(&self) -> Result<Vec<RetryPolicy>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing and single-process deployments)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
pub struct InMemoryConfigStore {
    rate_limits: Arc<RwLock<HashMap<RateLimitKey, RateLimitConfig>>>,
    retry_policies: Arc<RwLock<HashMap<RetryPolicyKey, RetryPolicy>>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rate-limit rows (for testing)
    pub fn rate_limit_count(&self) -> usize {
        self.rate_limits.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Number of retry policy rows (for testing)
    pub fn retry_policy_count(&self) -> usize {
        self.retry_policies.read().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_rate_limit_config(
        &self,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RateLimitConfig>, StoreError> {
        let key = RateLimitKey::new(tenant_id, service_origin, channel);
        let rows = self.rate_limits.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.get(&key).cloned())
    }

    async fn get_retry_policy(
        &self,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RetryPolicy>, StoreError> {
        let key = RetryPolicyKey::new(service_origin, channel);
        let rows = self
            .retry_policies
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.get(&key).cloned())
    }

    async fn upsert_rate_limit_config(&self, config: &RateLimitConfig) -> Result<(), StoreError> {
        config.validate()?;
        let mut rows = self.rate_limits.write().map_err(|_| StoreError::LockPoisoned)?;
        rows.insert(config.key(), config.clone());
        Ok(())
    }

    async fn upsert_retry_policy(&self, policy: &RetryPolicy) -> Result<(), StoreError> {
        policy.validate()?;
        let mut rows = self
            .retry_policies
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        rows.insert(policy.key(), policy.clone());
        Ok(())
    }

    async fn delete_rate_limit_config(&self, key: &RateLimitKey) -> Result<bool, StoreError> {
        let mut rows = self.rate_limits.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.remove(key).is_some())
    }

    async fn delete_retry_policy(&self, key: &RetryPolicyKey) -> Result<bool, StoreError> {
        let mut rows = self
            .retry_policies
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.remove(key).is_some())
    }

    async fn list_rate_limit_configs(&self) -> Result<Vec<RateLimitConfig>, StoreError> {
        let rows = self.rate_limits.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut configs: Vec<_> = rows.values().cloned().collect();
        configs.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        Ok(configs)
    }

    async fn list_retry_policies(&self) -> Result<Vec<RetryPolicy>, StoreError> {
        let rows = self
            .retry_policies
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut policies: Vec<_> = rows.values().cloned().collect();
        policies.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        Ok(policies)
    }
}
