use async_trait::async_trait;
use notify_guard_types::{RateLimitConfig, RateLimitKey, RetryPolicy, RetryPolicyKey};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::store::{ConfigStore, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// Column value standing in for the global (NULL) tenant so the primary key
/// can cover it
const GLOBAL_TENANT_KEY: &str = "";

pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    /// Connect to a database URL such as `sqlite://notify-guard.db?mode=rwc`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every pooled connection would otherwise get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(include_str!("../migrations/001_create_rate_limit_configs.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        sqlx::query(include_str!("../migrations/002_create_retry_policies.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        debug!("configuration store migrations applied");
        Ok(())
    }

    fn row_to_rate_limit_config(row: &SqliteRow) -> RateLimitConfig {
        let tenant_key: String = row.get("tenant_key");

        RateLimitConfig {
            tenant_id: (tenant_key != GLOBAL_TENANT_KEY).then_some(tenant_key),
            service_origin: row.get("service_origin"),
            channel: row.get("channel"),
            per_user_window_seconds: row.get::<i64, _>("per_user_window_seconds") as u64,
            per_user_max: row.get::<i64, _>("per_user_max") as u32,
            per_user_max_cap: row.get::<i64, _>("per_user_max_cap") as u32,
            per_service_window_seconds: row.get::<i64, _>("per_service_window_seconds") as u64,
            per_service_max: row.get::<i64, _>("per_service_max") as u32,
            per_service_max_cap: row.get::<i64, _>("per_service_max_cap") as u32,
            burst_size: row.get::<i64, _>("burst_size") as u32,
            enabled: row.get::<i64, _>("enabled") != 0,
        }
    }

    fn row_to_retry_policy(row: &SqliteRow) -> RetryPolicy {
        RetryPolicy {
            service_origin: row.get("service_origin"),
            channel: row.get("channel"),
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            base_delay_seconds: row.get("base_delay_seconds"),
            backoff_factor: row.get("backoff_factor"),
            jitter_ms: row.get::<i64, _>("jitter_ms") as u64,
            timeout_seconds: row.get("timeout_seconds"),
            enabled: row.get::<i64, _>("enabled") != 0,
        }
    }
}

fn tenant_key(tenant_id: Option<&str>) -> &str {
    tenant_id.unwrap_or(GLOBAL_TENANT_KEY)
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get_rate_limit_config(
        &self,
        tenant_id: Option<&str>,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RateLimitConfig>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM rate_limit_configs
            WHERE tenant_key = ? AND service_origin = ? AND channel = ?
            "#,
        )
        .bind(tenant_key(tenant_id))
        .bind(service_origin)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_rate_limit_config))
    }

    async fn get_retry_policy(
        &self,
        service_origin: &str,
        channel: &str,
    ) -> Result<Option<RetryPolicy>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM retry_policies
            WHERE service_origin = ? AND channel = ?
            "#,
        )
        .bind(service_origin)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_retry_policy))
    }

    async fn upsert_rate_limit_config(&self, config: &RateLimitConfig) -> Result<(), StoreError> {
        config.validate()?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO rate_limit_configs (
                tenant_key, service_origin, channel,
                per_user_window_seconds, per_user_max, per_user_max_cap,
                per_service_window_seconds, per_service_max, per_service_max_cap,
                burst_size, enabled, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_key, service_origin, channel) DO UPDATE SET
                per_user_window_seconds = excluded.per_user_window_seconds,
                per_user_max = excluded.per_user_max,
                per_user_max_cap = excluded.per_user_max_cap,
                per_service_window_seconds = excluded.per_service_window_seconds,
                per_service_max = excluded.per_service_max,
                per_service_max_cap = excluded.per_service_max_cap,
                burst_size = excluded.burst_size,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_key(config.tenant_id.as_deref()))
        .bind(&config.service_origin)
        .bind(&config.channel)
        .bind(config.per_user_window_seconds as i64)
        .bind(config.per_user_max as i64)
        .bind(config.per_user_max_cap as i64)
        .bind(config.per_service_window_seconds as i64)
        .bind(config.per_service_max as i64)
        .bind(config.per_service_max_cap as i64)
        .bind(config.burst_size as i64)
        .bind(config.enabled as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn upsert_retry_policy(&self, policy: &RetryPolicy) -> Result<(), StoreError> {
        policy.validate()?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO retry_policies (
                service_origin, channel, max_attempts, base_delay_seconds,
                backoff_factor, jitter_ms, timeout_seconds, enabled, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (service_origin, channel) DO UPDATE SET
                max_attempts = excluded.max_attempts,
                base_delay_seconds = excluded.base_delay_seconds,
                backoff_factor = excluded.backoff_factor,
                jitter_ms = excluded.jitter_ms,
                timeout_seconds = excluded.timeout_seconds,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&policy.service_origin)
        .bind(&policy.channel)
        .bind(policy.max_attempts as i64)
        .bind(policy.base_delay_seconds)
        .bind(policy.backoff_factor)
        .bind(policy.jitter_ms as i64)
        .bind(policy.timeout_seconds)
        .bind(policy.enabled as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn delete_rate_limit_config(&self, key: &RateLimitKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limit_configs
            WHERE tenant_key = ? AND service_origin = ? AND channel = ?
            "#,
        )
        .bind(tenant_key(key.tenant_id.as_deref()))
        .bind(&key.service_origin)
        .bind(&key.channel)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_retry_policy(&self, key: &RetryPolicyKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM retry_policies
            WHERE service_origin = ? AND channel = ?
            "#,
        )
        .bind(&key.service_origin)
        .bind(&key.channel)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_rate_limit_configs(&self) -> Result<Vec<RateLimitConfig>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM rate_limit_configs
            ORDER BY tenant_key, service_origin, channel
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_rate_limit_config).collect())
    }

    async fn list_retry_policies(&self) -> Result<Vec<RetryPolicy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM retry_policies
            ORDER BY service_origin, channel
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_retry_policy).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_config() -> RateLimitConfig {
        RateLimitConfig::for_tenant("tenant-a", "orders", "sms")
            .with_per_user(5, 60)
            .with_per_user_cap(7)
            .with_burst(2)
    }

    #[tokio::test]
    async fn test_sqlite_rate_limit_round_trip() {
        let store = SqliteConfigStore::in_memory().await.unwrap();
        let config = tenant_config();

        store.upsert_rate_limit_config(&config).await.unwrap();

        let retrieved = store
            .get_rate_limit_config(Some("tenant-a"), "orders", "sms")
            .await
            .unwrap();
        assert_eq!(retrieved, Some(config));
    }

    #[tokio::test]
    async fn test_sqlite_global_row_maps_back_to_none() {
        let store = SqliteConfigStore::in_memory().await.unwrap();
        let config = RateLimitConfig::global("*", "sms").with_per_user(1, 60);

        store.upsert_rate_limit_config(&config).await.unwrap();

        let retrieved = store
            .get_rate_limit_config(None, "*", "sms")
            .await
            .unwrap()
            .unwrap();
        assert!(retrieved.tenant_id.is_none());
        assert_eq!(retrieved, config);
    }

    #[tokio::test]
    async fn test_sqlite_upsert_keeps_single_row_per_key() {
        let store = SqliteConfigStore::in_memory().await.unwrap();

        store.upsert_rate_limit_config(&tenant_config()).await.unwrap();
        store
            .upsert_rate_limit_config(&tenant_config().disabled())
            .await
            .unwrap();

        let rows = store.list_rate_limit_configs().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].enabled);
    }

    #[tokio::test]
    async fn test_sqlite_rejects_invalid_row() {
        let store = SqliteConfigStore::in_memory().await.unwrap();
        let invalid = tenant_config().with_per_user_cap(1);

        let result = store.upsert_rate_limit_config(&invalid).await;
        assert!(matches!(result, Err(StoreError::InvalidRow(_))));
    }

    #[tokio::test]
    async fn test_sqlite_retry_policy_round_trip() {
        let store = SqliteConfigStore::in_memory().await.unwrap();
        let policy = RetryPolicy::new("auth", "sms")
            .with_max_attempts(4)
            .with_backoff(1.5, 3.0)
            .with_jitter_ms(250)
            .with_timeout_seconds(12.5);

        store.upsert_retry_policy(&policy).await.unwrap();

        let retrieved = store.get_retry_policy("auth", "sms").await.unwrap();
        assert_eq!(retrieved, Some(policy));
        assert!(store.get_retry_policy("auth", "email").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_delete() {
        let store = SqliteConfigStore::in_memory().await.unwrap();
        let config = tenant_config();
        store.upsert_rate_limit_config(&config).await.unwrap();

        assert!(store.delete_rate_limit_config(&config.key()).await.unwrap());
        assert!(!store.delete_rate_limit_config(&config.key()).await.unwrap());
        assert!(store.list_rate_limit_configs().await.unwrap().is_empty());
    }
}
