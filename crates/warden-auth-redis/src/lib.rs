//! Redis blocklist backend for warden-auth.
//!
//! Revoked tokens are stored as plain keys with a server-side TTL equal to
//! the token's remaining lifetime, so Redis expires entries on its own and
//! no sweep task is needed. Every instance sharing the Redis database sees
//! the same revocations.
//!
//! # Example
//!
//! ```ignore
//! use warden_auth_redis::{RedisBlocklist, RedisBlocklistConfig};
//!
//! let blocklist = RedisBlocklist::connect(&RedisBlocklistConfig {
//!     url: "redis://127.0.0.1:6379".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let auth = Auth::<User>::builder(config)
//!     .blocklist(Arc::new(blocklist))
//!     .build()?;
//! ```

pub mod blocklist;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_auth::AuthError;

pub use blocklist::RedisBlocklist;

/// Default key prefix of blocklist entries.
pub const DEFAULT_PREFIX: &str = "warden:blocklist:";

// =============================================================================
// Configuration
// =============================================================================

/// Redis blocklist configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisBlocklistConfig {
    /// Redis connection URL.
    pub url: String,

    /// Prefix prepended to every entry key.
    pub prefix: String,

    /// Upper bound of every Redis operation, including pool checkout.
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Maximum number of pooled connections.
    pub pool_size: usize,
}

impl Default for RedisBlocklistConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            operation_timeout: Duration::from_secs(5),
            pool_size: 16,
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors of the Redis backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The connection pool could not be created.
    #[error("Pool configuration error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// No connection could be checked out of the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// A Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The operation did not finish within the configured timeout.
    #[error("Redis operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Returns `true` if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::storage(e.to_string())
    }
}

/// Result type for Redis backend operations.
pub type StoreResult<T> = Result<T, StoreError>;
