//! Redis-backed token store.
//!
//! The whole refill/check/consume step runs as one server-side Lua script, so
//! every process sharing the Redis instance sees a serialized token count.
//! Bucket hashes carry a TTL equal to the refill window.
//!
//! Timestamps come from the calling process (`now_ms`), not from Redis, so
//! instances sharing buckets need roughly synchronized clocks. A caller whose
//! clock lags gets no refill credit and never moves `last_refill` backwards;
//! a caller whose clock runs ahead refills early by its skew.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::fmt;

use crate::token_store::{BucketParams, BucketState, ConsumeOutcome, TokenStore, TokenStoreError};

const CHECK_AND_CONSUME: &str = r#"
local ceiling = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local stored = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
local stored_tokens = tonumber(stored[1])
local last_refill = tonumber(stored[2])
if stored_tokens == nil then stored_tokens = ceiling end
if last_refill == nil then last_refill = now end

local elapsed = math.max(0, now - last_refill) / 1000
local tokens = math.min(stored_tokens + math.floor(elapsed * rate + 1e-9), ceiling)

if tokens >= 1 then
  tokens = tokens - 1
  local refilled_at = math.max(now, last_refill)
  redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill', tostring(refilled_at))
  redis.call('EXPIRE', KEYS[1], ttl)
  return {1, tostring(tokens), tostring(refilled_at)}
end

return {0, tostring(stored_tokens), tostring(last_refill)}
"#;

#[derive(Debug, Clone)]
pub struct RedisTokenStoreConfig {
    /// Prepended to every bucket key
    pub key_prefix: String,
}

impl Default for RedisTokenStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "notify-guard:".to_string(),
        }
    }
}

pub struct RedisTokenStore {
    connection: ConnectionManager,
    script: Script,
    config: RedisTokenStoreConfig,
}

impl fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTokenStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisTokenStore {
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisTokenStoreConfig::default()).await
    }

    pub async fn connect_with_config(
        url: &str,
        config: RedisTokenStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            script: Script::new(CHECK_AND_CONSUME),
            config,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

fn parse_number(field: &str, raw: &str) -> Result<f64, TokenStoreError> {
    raw.parse::<f64>()
        .map_err(|_| TokenStoreError::InvalidReply(format!("{field}={raw}")))
}

fn unavailable(err: RedisError) -> TokenStoreError {
    TokenStoreError::Unavailable(err.to_string())
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn check_and_consume(
        &self,
        key: &str,
        params: &BucketParams,
        now_ms: i64,
    ) -> Result<ConsumeOutcome, TokenStoreError> {
        let mut connection = self.connection.clone();
        let ttl_secs = params.window_seconds.max(1);

        let (allowed, tokens, last_refill): (i64, String, String) = self
            .script
            .key(self.key(key))
            .arg(params.ceiling())
            .arg(params.refill_per_second)
            .arg(ttl_secs)
            .arg(now_ms)
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        Ok(ConsumeOutcome {
            allowed: allowed == 1,
            state: BucketState {
                tokens: parse_number("tokens", &tokens)?,
                last_refill_ms: parse_number("last_refill", &last_refill)? as i64,
            },
        })
    }

    async fn peek(&self, key: &str, _now_ms: i64) -> Result<Option<BucketState>, TokenStoreError> {
        let mut connection = self.connection.clone();

        let (tokens, last_refill): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(self.key(key))
            .arg("tokens")
            .arg("last_refill")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        match (tokens, last_refill) {
            (Some(tokens), Some(last_refill)) => Ok(Some(BucketState {
                tokens: parse_number("tokens", &tokens)?,
                last_refill_ms: parse_number("last_refill", &last_refill)? as i64,
            })),
            _ => Ok(None),
        }
    }
}
