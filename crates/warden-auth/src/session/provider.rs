//! Capabilities plugged into [`Auth`](super::Auth).
//!
//! Each capability is injected on its own through the builder; nothing is
//! discovered at runtime.

use async_trait::async_trait;

use crate::AuthResult;
use crate::token::{Claims, StandardClaims, VerifiedToken};

pub use crate::middleware::{DefaultErrorHandler, ErrorHandler};

/// The user value carried in tokens.
pub trait User: Claims + Clone {}

impl<T: Claims + Clone> User for T {}

/// A source of users.
///
/// Providers are chained. For every operation, each provider is tried in
/// registration order until one succeeds; failures of all but the last
/// provider mean "not mine, keep looking", and the last provider's error is
/// the one returned.
#[async_trait]
pub trait Provider<T: User>: Send + Sync {
    /// Resolves credentials to a user.
    async fn signin(&self, username: &str, password: &str) -> AuthResult<T>;

    /// Accepts or rejects a verified token of `user`.
    async fn validate_token(&self, claims: &StandardClaims, user: &T) -> AuthResult<()>;

    /// Invalidates one token of `user`.
    async fn invalidate_token(&self, claims: &StandardClaims, user: &T) -> AuthResult<()>;

    /// Invalidates every token of `user`.
    async fn invalidate_tokens(&self, user: &T) -> AuthResult<()>;
}

/// Builds the user value from a verified token.
///
/// Without a transformer the token payload is decoded into `T` directly.
#[async_trait]
pub trait Transformer<T: User>: Send + Sync {
    /// Converts a verified token into a user.
    async fn transform(&self, token: &VerifiedToken) -> AuthResult<T>;
}

#[async_trait]
impl<T, F> Transformer<T> for F
where
    T: User,
    F: Fn(&VerifiedToken) -> AuthResult<T> + Send + Sync,
{
    async fn transform(&self, token: &VerifiedToken) -> AuthResult<T> {
        self(token)
    }
}

/// Supplies the standard claims of newly issued tokens.
pub trait ClaimsProvider: Send + Sync {
    /// Standard claims of the access token.
    fn access_claims(&self) -> StandardClaims;

    /// Standard claims of the refresh token minted alongside `access`.
    fn refresh_claims(&self, access: &StandardClaims) -> StandardClaims;
}
