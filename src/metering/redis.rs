use std::time::Duration;

use async_trait::async_trait;

use super::store::{CounterKey, CounterOutcome, CounterStore};
use crate::error::{Result, TiergateError};
use crate::plans::Limit;

// ARGV[1] = limit (-1 for unlimited), ARGV[2] = ttl seconds (0 for none).
// Returns {allowed, count}.
const CHECK_AND_INCREMENT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local limit = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
if limit >= 0 and current >= limit then
  return {0, current}
end
local count = redis.call('INCR', KEYS[1])
if count == 1 and ttl > 0 then
  redis.call('EXPIRE', KEYS[1], ttl)
end
return {1, count}
";

/// Counter store backed by Redis.
///
/// The compare and the increment run inside one Lua script, which Redis
/// executes atomically, so concurrent callers across processes cannot
/// overshoot a limit.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: redis::Client,
    script: redis::Script,
    prefix: String,
}

impl RedisCounterStore {
    /// Create a store from a connection URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            TiergateError::configuration(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self {
            client,
            script: redis::Script::new(CHECK_AND_INCREMENT),
            prefix: "tiergate:counter".to_string(),
        })
    }

    /// Namespace keys under `prefix` instead of `tiergate:counter`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn redis_key(&self, key: &CounterKey) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TiergateError::store_unavailable(format!("Failed to get Redis connection: {}", e)))
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn limit_arg(limit: Limit) -> i64 {
    match limit {
        Limit::Unlimited => Limit::UNLIMITED_SENTINEL,
        Limit::Finite(n) => i64::try_from(n).unwrap_or(i64::MAX),
    }
}

fn ttl_arg(ttl_hint: Option<Duration>) -> u64 {
    ttl_hint.map(|d| d.as_secs().max(1)).unwrap_or(0)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        limit: Limit,
        ttl_hint: Option<Duration>,
    ) -> Result<CounterOutcome> {
        let mut conn = self.get_connection().await?;

        let (allowed, count): (i64, i64) = self
            .script
            .key(self.redis_key(key))
            .arg(limit_arg(limit))
            .arg(ttl_arg(ttl_hint))
            .invoke_async(&mut conn)
            .await?;

        let count = u64::try_from(count).unwrap_or(0);
        Ok(if allowed == 1 {
            CounterOutcome::allowed(count)
        } else {
            CounterOutcome::denied(count)
        })
    }

    async fn current_count(&self, key: &CounterKey) -> Result<u64> {
        let mut conn = self.get_connection().await?;

        let value: Option<u64> = redis::cmd("GET")
            .arg(self.redis_key(key))
            .query_async::<Option<u64>>(&mut conn)
            .await?;

        Ok(value.unwrap_or(0))
    }
}
