use notify_guard_config::AppConfig;
use notify_guard_orchestrator::{
    InMemoryAuditSink, InMemoryCostTracker, NotificationDispatcher, ProviderRegistry,
    RetryOrchestrator, RetryPolicyResolver,
};
use notify_guard_ratelimit::{
    BackoffCalculator, CircuitBreakerConfig, CircuitBreakerRegistry, Clock, GateConfig,
    InMemoryTokenStore, RateLimitConfigResolver, RateLimitingGate, RedisTokenStore,
    RedisTokenStoreConfig, SystemClock, TokenBucketLimiter, TokenStore,
};
use notify_guard_store::{seed_defaults, ConfigStore, InMemoryConfigStore, SqliteConfigStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration store: {0}")]
    Store(#[from] StoreError),

    #[error("token store: {0}")]
    TokenStore(String),
}

/// A fully wired send path plus handles to its shared parts
pub struct Pipeline {
    pub config_store: Arc<dyn ConfigStore>,
    pub gate: Arc<RateLimitingGate>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub audit: Arc<InMemoryAuditSink>,
    pub costs: Arc<InMemoryCostTracker>,
    pub dispatcher: NotificationDispatcher,
}

impl Pipeline {
    pub async fn from_config(
        config: &AppConfig,
        providers: ProviderRegistry,
    ) -> Result<Self, BootstrapError> {
        Self::from_config_with_clock(config, providers, Arc::new(SystemClock::new())).await
    }

    /// Build with an explicit clock for buckets and breakers
    pub async fn from_config_with_clock(
        config: &AppConfig,
        providers: ProviderRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BootstrapError> {
        let config_store = open_config_store(config).await?;
        if config.database.seed_defaults {
            let inserted = seed_defaults(config_store.as_ref()).await?;
            info!(inserted, "seeded default configuration rows");
        }

        let tokens = open_token_store(config).await?;

        let audit = Arc::new(InMemoryAuditSink::new());
        let costs = Arc::new(InMemoryCostTracker::new());

        let gate = Arc::new(
            RateLimitingGate::new(
                RateLimitConfigResolver::new(config_store.clone()),
                TokenBucketLimiter::new(tokens, clock.clone()),
            )
            .with_recorder(audit.clone())
            .with_config(GateConfig {
                admin_scope: config.gate.effective_admin_scope().map(str::to_string),
            }),
        );

        let breakers = Arc::new(CircuitBreakerRegistry::in_memory(
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                cooldown: Duration::from_secs(config.circuit_breaker.cooldown_secs),
            },
            clock,
        ));

        let mut backoff = BackoffCalculator::new();
        if let Some(max_delay_secs) = config.retry.max_delay_secs {
            backoff = backoff.with_max_delay(Duration::from_secs(max_delay_secs));
        }

        let dispatcher = NotificationDispatcher::new(
            gate.clone(),
            RetryPolicyResolver::new(config_store.clone()),
            providers,
        )
        .with_orchestrator(RetryOrchestrator::new(backoff))
        .with_breakers(breakers.clone())
        .with_audit(audit.clone())
        .with_costs(costs.clone());

        Ok(Self {
            config_store,
            gate,
            breakers,
            audit,
            costs,
            dispatcher,
        })
    }
}

async fn open_config_store(config: &AppConfig) -> Result<Arc<dyn ConfigStore>, BootstrapError> {
    let store: Arc<dyn ConfigStore> = match config.database.url.as_deref() {
        None => Arc::new(InMemoryConfigStore::new()),
        Some(SQLITE_MEMORY_URL) => Arc::new(SqliteConfigStore::in_memory().await?),
        Some(url) => Arc::new(SqliteConfigStore::connect(url).await?),
    };
    Ok(store)
}

async fn open_token_store(config: &AppConfig) -> Result<Arc<dyn TokenStore>, BootstrapError> {
    let Some(url) = config.redis.url.as_deref() else {
        info!("no redis url configured, using in-process token buckets");
        return Ok(Arc::new(InMemoryTokenStore::new()));
    };

    let store = RedisTokenStore::connect_with_config(
        url,
        RedisTokenStoreConfig {
            key_prefix: config.redis.key_prefix.clone(),
        },
    )
    .await
    .map_err(|e| BootstrapError::TokenStore(e.to_string()))?;

    Ok(Arc::new(store))
}
