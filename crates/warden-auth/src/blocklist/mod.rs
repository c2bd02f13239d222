//! Token revocation.
//!
//! A blocklist maps token identifiers to the instant their token expires
//! anyway. Presence before that instant means "revoked". Two backends exist:
//! [`MemoryBlocklist`] in this crate and a Redis backend in
//! `warden-auth-redis`.
//!
//! # Consistency
//!
//! Revocation is best effort, not linearizable: a verification that started
//! before [`Blocklist::set`] returned may still accept the token. The
//! in-memory backend is visible to every verification that starts after
//! `set` returns. A networked backend only promises eventual visibility.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::token::{StandardClaims, VerifiedToken};

pub use memory::{DEFAULT_SWEEP_INTERVAL, MemoryBlocklist, SweepHandle};

/// Derives a blocklist entry key from a token and its claims.
pub type KeyFn = Arc<dyn Fn(&str, &StandardClaims) -> String + Send + Sync>;

/// The default entry key: the `jti`, or the token itself when it has none.
#[must_use]
pub fn default_key(token: &str, claims: &StandardClaims) -> String {
    if claims.id.is_empty() {
        token.to_string()
    } else {
        claims.id.clone()
    }
}

/// Storage for revoked token identifiers.
///
/// Implementations must be safe to share between tasks. Operations are
/// single attempts: retries are the caller's decision.
#[async_trait]
pub trait Blocklist: Send + Sync {
    /// Derives the entry key for a token.
    fn key(&self, token: &str, claims: &StandardClaims) -> String {
        default_key(token, claims)
    }

    /// Marks `id` as revoked until `expires_at`.
    ///
    /// Setting an existing entry again leaves a single entry.
    async fn set(&self, id: &str, expires_at: OffsetDateTime) -> Result<(), AuthError>;

    /// Removes an entry. Removing a missing entry is not an error.
    async fn del(&self, id: &str) -> Result<(), AuthError>;

    /// Returns `true` if `id` is currently listed.
    async fn has(&self, id: &str) -> Result<bool, AuthError>;

    /// Returns the number of listed entries.
    async fn count(&self) -> Result<usize, AuthError>;

    /// Revokes a verified token until its own expiry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the token has no `exp` claim, since the
    /// entry would never become garbage.
    async fn invalidate_token(
        &self,
        token: &str,
        claims: &StandardClaims,
    ) -> Result<(), AuthError> {
        let expires_at = claims
            .expiry
            .ok_or_else(|| AuthError::invalid_argument("token has no expiry to revoke until"))?;
        self.set(&self.key(token, claims), expires_at).await
    }
}

/// Runs the blocklist as a token validator.
///
/// `outcome` is the result of claims validation. An `Expired` outcome drops
/// the token's entry (it can no longer be used anyway) and is returned
/// unchanged. A successful outcome becomes `Blocked` if the token is listed.
///
/// # Errors
///
/// Returns the incoming error, `Blocked`, or the backend's `Storage` error.
pub async fn validate_token(
    blocklist: &dyn Blocklist,
    token: &VerifiedToken,
    outcome: Result<(), AuthError>,
) -> Result<(), AuthError> {
    match outcome {
        Err(AuthError::Expired) => {
            let key = blocklist.key(&token.token, &token.standard_claims);
            if let Err(e) = blocklist.del(&key).await {
                tracing::warn!(error = %e, "failed to drop expired token from blocklist");
            }
            Err(AuthError::Expired)
        }
        Err(e) => Err(e),
        Ok(()) => {
            let key = blocklist.key(&token.token, &token.standard_claims);
            if blocklist.has(&key).await? {
                tracing::debug!(jti = %token.standard_claims.id, "token is blocked");
                Err(AuthError::Blocked)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Header;

    fn verified(id: &str, token: &str) -> VerifiedToken {
        VerifiedToken {
            token: token.to_string(),
            header: Header {
                alg: "HS256".into(),
                typ: None,
                kid: None,
                enc: None,
            },
            payload: b"{}".to_vec(),
            standard_claims: StandardClaims {
                id: id.to_string(),
                expiry: Some(OffsetDateTime::now_utc() + time::Duration::minutes(5)),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_default_key_prefers_jti() {
        let claims = StandardClaims {
            id: "jti-1".into(),
            ..Default::default()
        };
        assert_eq!(default_key("a.b.c", &claims), "jti-1");
        assert_eq!(default_key("a.b.c", &StandardClaims::default()), "a.b.c");
    }

    #[tokio::test]
    async fn test_validator_blocks_listed_token() {
        let blocklist = MemoryBlocklist::new();
        let token = verified("jti-1", "a.b.c");

        assert!(validate_token(&blocklist, &token, Ok(())).await.is_ok());

        blocklist
            .invalidate_token(&token.token, &token.standard_claims)
            .await
            .unwrap();
        assert!(matches!(
            validate_token(&blocklist, &token, Ok(())).await,
            Err(AuthError::Blocked)
        ));
    }

    #[tokio::test]
    async fn test_validator_drops_expired_entry() {
        let blocklist = MemoryBlocklist::new();
        let token = verified("jti-2", "a.b.c");
        blocklist
            .invalidate_token(&token.token, &token.standard_claims)
            .await
            .unwrap();
        assert_eq!(blocklist.count().await.unwrap(), 1);

        let result = validate_token(&blocklist, &token, Err(AuthError::Expired)).await;
        assert!(matches!(result, Err(AuthError::Expired)));
        assert_eq!(blocklist.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validator_passes_other_errors_through() {
        let blocklist = MemoryBlocklist::new();
        let token = verified("jti-3", "a.b.c");
        let result = validate_token(&blocklist, &token, Err(AuthError::NotValidYet)).await;
        assert!(matches!(result, Err(AuthError::NotValidYet)));
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        use tokio_test::block_on;

        let blocklist = MemoryBlocklist::new();
        let token = verified("jti-4", "a.b.c");
        for _ in 0..3 {
            block_on(blocklist.invalidate_token(&token.token, &token.standard_claims)).unwrap();
        }
        assert_eq!(block_on(blocklist.count()).unwrap(), 1);
        assert!(block_on(blocklist.has("jti-4")).unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_requires_expiry() {
        let blocklist = MemoryBlocklist::new();
        let err = blocklist
            .invalidate_token("a.b.c", &StandardClaims::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidArgument { .. }));
        assert_eq!(blocklist.count().await.unwrap(), 0);
    }
}
