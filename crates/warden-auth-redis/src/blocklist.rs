//! The Redis [`Blocklist`] implementation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use time::OffsetDateTime;
use warden_auth::AuthError;
use warden_auth::blocklist::{Blocklist, KeyFn, default_key};
use warden_auth::token::{SharedClock, StandardClaims, system_clock};

use crate::{RedisBlocklistConfig, StoreError, StoreResult};

/// Keys fetched per `SCAN` round trip in [`Blocklist::count`].
const SCAN_BATCH: usize = 500;

// =============================================================================
// Redis Blocklist
// =============================================================================

/// A blocklist shared through Redis.
///
/// Entries are `<prefix><key>` with the token's expiry timestamp as value
/// and a TTL equal to the remaining lifetime. Tokens that are already
/// expired are not written.
#[derive(Clone)]
pub struct RedisBlocklist {
    pool: Pool,
    prefix: String,
    timeout: Duration,
    key_fn: Option<KeyFn>,
    clock: SharedClock,
}

impl RedisBlocklist {
    /// Creates the pool and checks that Redis answers.
    ///
    /// # Errors
    ///
    /// Returns the pool, connection or timeout error.
    pub async fn connect(config: &RedisBlocklistConfig) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.wait = Some(config.operation_timeout);
        pool_config.timeouts.create = Some(config.operation_timeout);
        pool_config.timeouts.recycle = Some(config.operation_timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;
        let blocklist = Self::from_pool(pool, config);
        blocklist.ping().await?;

        tracing::info!(prefix = %blocklist.prefix, "redis blocklist connected");
        Ok(blocklist)
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool, config: &RedisBlocklistConfig) -> Self {
        Self {
            pool,
            prefix: config.prefix.clone(),
            timeout: config.operation_timeout,
            key_fn: None,
            clock: system_clock(),
        }
    }

    /// Overrides how entry keys are derived from tokens.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    /// Overrides the clock used to compute entry TTLs.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sends `PING`.
    ///
    /// # Errors
    ///
    /// Returns the pool, command or timeout error.
    pub async fn ping(&self) -> StoreResult<()> {
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn bounded<R>(&self, operation: impl Future<Output = StoreResult<R>>) -> StoreResult<R> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl Blocklist for RedisBlocklist {
    fn key(&self, token: &str, claims: &StandardClaims) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(token, claims),
            None => default_key(token, claims),
        }
    }

    async fn set(&self, id: &str, expires_at: OffsetDateTime) -> Result<(), AuthError> {
        let remaining = (expires_at - self.clock.now()).whole_seconds();
        let Some(ttl) = u64::try_from(remaining).ok().filter(|ttl| *ttl > 0) else {
            tracing::debug!(id, "token already expired, not blocklisted");
            return Ok(());
        };

        let key = self.entry_key(id);
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            conn.set_ex::<_, _, ()>(&key, expires_at.unix_timestamp(), ttl)
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
        .inspect_err(|e| tracing::warn!(key = %key, error = %e, "redis blocklist SET failed"))?;

        tracing::debug!(key = %key, ttl, "token blocklisted");
        Ok(())
    }

    async fn del(&self, id: &str) -> Result<(), AuthError> {
        let key = self.entry_key(id);
        self.bounded(async {
            let mut conn = self.pool.get().await?;
            conn.del::<_, ()>(&key).await?;
            Ok::<_, StoreError>(())
        })
        .await
        .inspect_err(|e| tracing::warn!(key = %key, error = %e, "redis blocklist DEL failed"))?;
        Ok(())
    }

    async fn has(&self, id: &str) -> Result<bool, AuthError> {
        let key = self.entry_key(id);
        let exists = self
            .bounded(async {
                let mut conn = self.pool.get().await?;
                let exists: bool = conn.exists(&key).await?;
                Ok::<_, StoreError>(exists)
            })
            .await
            .inspect_err(|e| tracing::warn!(key = %key, error = %e, "redis blocklist EXISTS failed"))?;
        Ok(exists)
    }

    /// Counts keys under the prefix with `SCAN`.
    ///
    /// The count is approximate while entries are being written or expire.
    async fn count(&self) -> Result<usize, AuthError> {
        let pattern = format!("{}*", self.prefix);
        let total = self
            .bounded(async {
                let mut conn = self.pool.get().await?;
                let mut cursor: u64 = 0;
                let mut total = 0;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    total += keys.len();
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Ok::<_, StoreError>(total)
            })
            .await?;
        Ok(total)
    }
}

impl fmt::Debug for RedisBlocklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBlocklist")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .field("key_fn", &self.key_fn.is_some())
            .finish_non_exhaustive()
    }
}
