use notify_guard_store::{ConfigStore, StoreError};
use notify_guard_types::{ConfigRowError, RateLimitConfig, WILDCARD};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("configuration store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed rate-limit configuration: {0}")]
    Invalid(#[from] ConfigRowError),
}

/// Finds the most specific rate-limit row for a send.
///
/// Lookup order, first match wins:
/// 1. `(tenant, service, channel)`
/// 2. `(tenant, *, channel)`
/// 3. `(global, service, channel)`
/// 4. `(global, *, channel)`
#[derive(Clone)]
pub struct RateLimitConfigResolver {
    store: Arc<dyn ConfigStore>,
}

impl RateLimitConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Returns `Ok(None)` when nothing matches; callers treat that as unlimited
    pub async fn resolve(
        &self,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RateLimitConfig>, ResolveError> {
        for (tenant, service) in Self::candidates(tenant_id, service_origin) {
            if let Some(config) = self
                .store
                .get_rate_limit_config(tenant, service, channel)
                .await?
            {
                config.validate()?;
                debug!(
                    matched = %config.key(),
                    requested_tenant = tenant_id.unwrap_or("global"),
                    service_origin,
                    channel,
                    "resolved rate-limit config"
                );
                return Ok(Some(config));
            }
        }

        Ok(None)
    }

    fn candidates<'a>(
        tenant_id: Option<&'a str>,
        service_origin: &'a str,
    ) -> Vec<(Option<&'a str>, &'a str)> {
        let mut chain = Vec::with_capacity(4);
        if let Some(tenant) = tenant_id {
            chain.push((Some(tenant), service_origin));
            chain.push((Some(tenant), WILDCARD));
        }
        chain.push((None, service_origin));
        chain.push((None, WILDCARD));
        chain.dedup();
        chain
    }
}

impl std::fmt::Debug for RateLimitConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfigResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_guard_store::InMemoryConfigStore;

    async fn store_with(configs: &[RateLimitConfig]) -> Arc<InMemoryConfigStore> {
        let store = Arc::new(InMemoryConfigStore::new());
        for config in configs {
            store.upsert_rate_limit_config(config).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_hierarchical_resolution() {
        let specific = RateLimitConfig::for_tenant("tenantA", "orders", "sms").with_per_user(3, 60);
        let fallback = RateLimitConfig::global(WILDCARD, "sms").with_per_user(20, 60);
        let store = store_with(&[specific.clone(), fallback.clone()]).await;
        let resolver = RateLimitConfigResolver::new(store);

        let resolved = resolver
            .resolve(Some("tenantA"), "orders", "sms")
            .await
            .unwrap();
        assert_eq!(resolved, Some(specific));

        let resolved = resolver
            .resolve(Some("tenantB"), "orders", "sms")
            .await
            .unwrap();
        assert_eq!(resolved, Some(fallback));
    }

    #[tokio::test]
    async fn test_chain_order() {
        let tenant_wildcard = RateLimitConfig::for_tenant("t1", WILDCARD, "email");
        let global_service = RateLimitConfig::global("billing", "email");
        let global_wildcard = RateLimitConfig::global(WILDCARD, "email");
        let store = store_with(&[
            tenant_wildcard.clone(),
            global_service.clone(),
            global_wildcard.clone(),
        ])
        .await;
        let resolver = RateLimitConfigResolver::new(store);

        // Tenant wildcard beats global service match
        assert_eq!(
            resolver.resolve(Some("t1"), "billing", "email").await.unwrap(),
            Some(tenant_wildcard)
        );
        assert_eq!(
            resolver.resolve(Some("t2"), "billing", "email").await.unwrap(),
            Some(global_service)
        );
        assert_eq!(
            resolver.resolve(None, "orders", "email").await.unwrap(),
            Some(global_wildcard)
        );
    }

    #[tokio::test]
    async fn test_missing_config_resolves_to_none() {
        let store = store_with(&[RateLimitConfig::global(WILDCARD, "sms")]).await;
        let resolver = RateLimitConfigResolver::new(store);

        assert!(resolver
            .resolve(Some("tenantX"), "orders", "push")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_disabled_row_is_still_returned() {
        let disabled = RateLimitConfig::global("orders", "sms").disabled();
        let store = store_with(&[disabled.clone(), RateLimitConfig::global(WILDCARD, "sms")]).await;
        let resolver = RateLimitConfigResolver::new(store);

        // The match stops the chain; the gate decides what disabled means
        let resolved = resolver.resolve(None, "orders", "sms").await.unwrap();
        assert_eq!(resolved, Some(disabled));
    }

    #[test]
    fn test_candidates_without_tenant() {
        let chain = RateLimitConfigResolver::candidates(None, "orders");
        assert_eq!(chain, vec![(None, "orders"), (None, WILDCARD)]);

        let chain = RateLimitConfigResolver::candidates(None, WILDCARD);
        assert_eq!(chain, vec![(None, WILDCARD)]);
    }
}
