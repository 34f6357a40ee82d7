use notify_guard_types::{Channel, RateLimitConfig, RetryPolicy, WILDCARD};
use tracing::info;

use crate::store::{ConfigStore, StoreError};

/// Global `(*, channel)` rows applied when no tenant or service row matches
pub fn default_rate_limit_configs() -> Vec<RateLimitConfig> {
    Channel::ALL
        .iter()
        .map(|channel| {
            let base = RateLimitConfig::global(WILDCARD, channel.as_str());
            match channel {
                Channel::Sms => base.with_per_user(10, 3600).with_per_service(1000, 3600),
                Channel::Email => base
                    .with_per_user(50, 3600)
                    .with_per_service(10_000, 3600)
                    .with_burst(10)
                    .with_per_user_cap(60),
                Channel::Push => base
                    .with_per_user(100, 3600)
                    .with_per_service(50_000, 3600)
                    .with_burst(20)
                    .with_per_user_cap(120),
            }
        })
        .collect()
}

/// The global `(*, *)` retry policy
pub fn default_retry_policies() -> Vec<RetryPolicy> {
    vec![RetryPolicy::default()]
}

/// Insert the default rows that are not already present.
///
/// Existing rows are left untouched so operator edits survive restarts.
/// Returns the number of rows inserted.
pub async fn seed_defaults(store: &dyn ConfigStore) -> Result<usize, StoreError> {
    let mut inserted = 0;

    for config in default_rate_limit_configs() {
        let existing = store
            .get_rate_limit_config(
                config.tenant_id.as_deref(),
                &config.service_origin,
                &config.channel,
            )
            .await?;
        if existing.is_none() {
            store.upsert_rate_limit_config(&config).await?;
            inserted += 1;
        }
    }

    for policy in default_retry_policies() {
        if store
            .get_retry_policy(&policy.service_origin, &policy.channel)
            .await?
            .is_none()
        {
            store.upsert_retry_policy(&policy).await?;
            inserted += 1;
        }
    }

    info!(inserted, "seeded default configuration rows");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryConfigStore;

    #[test]
    fn test_defaults_are_valid() {
        for config in default_rate_limit_configs() {
            assert!(config.validate().is_ok(), "{}", config.key());
            assert!(config.is_global());
        }
        for policy in default_retry_policies() {
            assert!(policy.validate().is_ok());
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = InMemoryConfigStore::new();

        let first = seed_defaults(&store).await.unwrap();
        assert_eq!(first, 4);

        let second = seed_defaults(&store).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.rate_limit_count(), 3);
        assert_eq!(store.retry_policy_count(), 1);
    }

    #[tokio::test]
    async fn test_seed_preserves_operator_edits() {
        let store = InMemoryConfigStore::new();
        let edited = RateLimitConfig::global(WILDCARD, "sms").with_per_user(1, 60);
        store.upsert_rate_limit_config(&edited).await.unwrap();

        seed_defaults(&store).await.unwrap();

        let row = store
            .get_rate_limit_config(None, WILDCARD, "sms")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.per_user_max, 1);
    }
}
