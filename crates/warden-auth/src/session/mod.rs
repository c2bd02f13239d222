//! Sign-in, verification, refresh and sign-out over pluggable providers.
//!
//! [`Auth`] turns the token service into a full session lifecycle for a user
//! type `T`:
//!
//! ```text
//! Anonymous --signin--> Authenticated --refresh--> Authenticated (new pair)
//!     ^                       |
//!     +-------signout---------+
//! ```
//!
//! Keys come from [`AuthConfig`]: [`ACCESS_KID`] signs access tokens and the
//! optional [`REFRESH_KID`] enables refresh tokens.
//!
//! # Example
//!
//! ```ignore
//! use warden_auth::session::{Auth, auth_routes, verify_middleware, VerifyState};
//!
//! let auth = Auth::<User>::builder(AuthConfig::generate()?)
//!     .provider(UserStore::new(pool))
//!     .blocklist(Arc::new(MemoryBlocklist::new()))
//!     .build()?;
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(middleware::from_fn_with_state(
//!         VerifyState::from(auth.clone()),
//!         verify_middleware::<User>,
//!     ))
//!     .merge(auth_routes(auth));
//! ```

pub mod cookie;
pub mod handlers;
pub mod provider;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

pub use cookie::CookieCodec;
pub use handlers::{
    RefreshRequest, SigninRequest, VerifyCheck, VerifyState, auth_routes, refresh_handler,
    signin_handler, signout_all_handler, signout_handler, verify_middleware,
};
pub use provider::{ClaimsProvider, DefaultErrorHandler, ErrorHandler, Provider, Transformer, User};

use crate::AuthResult;
use crate::blocklist::Blocklist;
use crate::config::{ACCESS_KID, AuthConfig, REFRESH_KID};
use crate::error::AuthError;
use crate::middleware::bearer_token;
use crate::token::{
    Expectation, SharedClock, Signer, StandardClaims, TokenPair, VerifiedToken, Verifier,
    system_clock,
};

/// Default span name of the session middleware.
pub const DEFAULT_HANDLER_NAME: &str = "warden.auth";

// =============================================================================
// Auth
// =============================================================================

/// The session orchestrator for user type `T`.
///
/// Cheap to clone; clones share providers, keys and the blocklist.
pub struct Auth<T: User> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: User> {
    config: AuthConfig,
    signer: Signer,
    verifier: Verifier,
    cookie: Option<CookieCodec>,
    providers: Vec<Arc<dyn Provider<T>>>,
    transformer: Option<Arc<dyn Transformer<T>>>,
    claims_provider: Option<Arc<dyn ClaimsProvider>>,
    error_handler: Arc<dyn ErrorHandler>,
    refresh_enabled: bool,
}

impl<T: User> Clone for Auth<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn kid(self) -> &'static str {
        match self {
            Self::Access => ACCESS_KID,
            Self::Refresh => REFRESH_KID,
        }
    }
}

impl<T: User> Auth<T> {
    /// Starts building an orchestrator from configuration.
    #[must_use]
    pub fn builder(config: AuthConfig) -> AuthBuilder<T> {
        AuthBuilder::new(config)
    }

    /// The configuration this orchestrator was built from.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// The token signer.
    #[must_use]
    pub fn signer(&self) -> &Signer {
        &self.inner.signer
    }

    /// The token verifier, holding both keys.
    #[must_use]
    pub fn verifier(&self) -> &Verifier {
        &self.inner.verifier
    }

    /// The cookie codec, if the cookie transport is enabled.
    #[must_use]
    pub fn cookie(&self) -> Option<&CookieCodec> {
        self.inner.cookie.as_ref()
    }

    /// The error handler used by the HTTP handlers.
    #[must_use]
    pub fn error_handler(&self) -> &dyn ErrorHandler {
        self.inner.error_handler.as_ref()
    }

    /// Returns `true` if a refresh key is configured.
    #[must_use]
    pub fn refresh_enabled(&self) -> bool {
        self.inner.refresh_enabled
    }

    /// Resolves credentials through the provider chain and issues a token
    /// pair.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without providers, the last provider's error
    /// when no provider accepts the credentials, or a signing error.
    pub async fn signin(&self, username: &str, password: &str) -> AuthResult<TokenPair> {
        let user = run_chain(
            &self.inner.providers,
            "signin",
            |provider| provider.signin(username, password),
            Err(AuthError::configuration("signin: no provider")),
        )
        .await?;

        self.sign(&user)
    }

    /// Issues a token pair for a user.
    ///
    /// Standard claims come from the claims provider, if any; `iat`, `jti`
    /// and the refresh token's origin ID are filled in when left empty.
    ///
    /// # Errors
    ///
    /// Returns the signing error of either token.
    pub fn sign(&self, user: &T) -> AuthResult<TokenPair> {
        let (access, refresh) = match &self.inner.claims_provider {
            Some(provider) => {
                let access = provider.access_claims();
                let refresh = provider.refresh_claims(&access);
                (access, refresh)
            }
            None => (StandardClaims::default(), StandardClaims::default()),
        };

        self.inner.signer.sign_pair(user, access, refresh)
    }

    /// Verifies an access token and resolves its user.
    ///
    /// # Errors
    ///
    /// Returns the verification error, `Unauthenticated` for a token not
    /// signed with the access key, or the last provider's validation error.
    pub async fn verify(&self, token: &str) -> AuthResult<(T, StandardClaims)> {
        let (user, verified) = self.verify_kind(token, TokenKind::Access).await?;
        Ok((user, verified.standard_claims))
    }

    /// Exchanges a refresh token for a brand new token pair.
    ///
    /// Both tokens rotate, so the new refresh token points at the new access
    /// token.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when refresh is disabled, otherwise the
    /// verification or signing error.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        if !self.inner.refresh_enabled {
            return Err(AuthError::configuration(format!(
                "refresh: disabled, no {REFRESH_KID} key configured"
            )));
        }

        let (user, verified) = self.verify_kind(refresh_token, TokenKind::Refresh).await?;
        tracing::debug!(origin = %verified.standard_claims.origin_id, "rotating token pair");
        self.sign(&user)
    }

    /// Signs out the owner of an access token.
    ///
    /// With `all`, providers invalidate every token of the user; otherwise
    /// only this one. With a blocklist configured, the presented token is
    /// also revoked.
    ///
    /// # Errors
    ///
    /// Returns the verification error, the last provider's error, or the
    /// blocklist error.
    pub async fn signout(&self, token: &str, all: bool) -> AuthResult<()> {
        let (user, verified) = self.verify_kind(token, TokenKind::Access).await?;
        let claims = &verified.standard_claims;

        if all {
            run_chain(
                &self.inner.providers,
                "invalidate_tokens",
                |provider| provider.invalidate_tokens(&user),
                Ok(()),
            )
            .await?;
        } else {
            run_chain(
                &self.inner.providers,
                "invalidate_token",
                |provider| provider.invalidate_token(claims, &user),
                Ok(()),
            )
            .await?;
        }

        if self.inner.verifier.blocklist().is_some() {
            if claims.expiry.is_some() {
                self.inner.verifier.invalidate(&verified).await?;
            } else {
                tracing::warn!(jti = %claims.id, "token has no expiry, signed out but not blocklisted");
            }
        }

        Ok(())
    }

    /// Finds the access token of a request.
    ///
    /// Configured headers are tried in order for a `Bearer` token, then the
    /// encrypted cookie.
    #[must_use]
    pub fn extract_access_token(&self, headers: &HeaderMap) -> Option<String> {
        let from_header = self.inner.config.headers.iter().find_map(|name| {
            headers
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_string)
        });

        from_header.or_else(|| {
            self.inner
                .cookie
                .as_ref()
                .and_then(|cookie| cookie.decode(headers))
        })
    }

    async fn verify_kind(&self, token: &str, kind: TokenKind) -> AuthResult<(T, VerifiedToken)> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let refresh = [Expectation::RefreshToken];
        let expectations: &[Expectation] = match kind {
            TokenKind::Access => &[],
            TokenKind::Refresh => &refresh,
        };

        let verified = self.inner.verifier.verify_token(token, expectations).await?;
        if verified.kid() != kind.kid() {
            return Err(AuthError::unauthenticated(format!(
                "token signed with {}, expected {}",
                verified.kid(),
                kind.kid()
            )));
        }

        let user = match &self.inner.transformer {
            Some(transformer) => transformer.transform(&verified).await?,
            None => verified.claims::<T>()?,
        };

        run_chain(
            &self.inner.providers,
            "validate_token",
            |provider| provider.validate_token(&verified.standard_claims, &user),
            Ok(()),
        )
        .await?;

        Ok((user, verified))
    }
}

impl<T: User> fmt::Debug for Auth<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("signer", &self.inner.signer)
            .field("verifier", &self.inner.verifier)
            .field("cookie", &self.inner.cookie)
            .field("providers", &self.inner.providers.len())
            .field("transformer", &self.inner.transformer.is_some())
            .field("claims_provider", &self.inner.claims_provider.is_some())
            .field("refresh_enabled", &self.inner.refresh_enabled)
            .finish()
    }
}

/// Tries each provider in order until one succeeds.
///
/// Errors of all but the last provider are logged and skipped; the last
/// provider's result is returned as-is. Without providers, `empty` is
/// returned.
async fn run_chain<'a, T, R, F, Fut>(
    providers: &'a [Arc<dyn Provider<T>>],
    operation: &'static str,
    call: F,
    empty: AuthResult<R>,
) -> AuthResult<R>
where
    T: User,
    F: Fn(&'a dyn Provider<T>) -> Fut,
    Fut: Future<Output = AuthResult<R>>,
{
    let Some((last, rest)) = providers.split_last() else {
        return empty;
    };

    for (index, provider) in rest.iter().enumerate() {
        match call(provider.as_ref()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(operation, provider = index, error = %e, "provider declined, trying next");
            }
        }
    }

    call(last.as_ref()).await
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Auth`].
pub struct AuthBuilder<T: User> {
    config: AuthConfig,
    providers: Vec<Arc<dyn Provider<T>>>,
    transformer: Option<Arc<dyn Transformer<T>>>,
    claims_provider: Option<Arc<dyn ClaimsProvider>>,
    error_handler: Arc<dyn ErrorHandler>,
    blocklist: Option<Arc<dyn Blocklist>>,
    clock: SharedClock,
    handler_name: String,
}

impl<T: User> AuthBuilder<T> {
    fn new(config: AuthConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            transformer: None,
            claims_provider: None,
            error_handler: Arc::new(DefaultErrorHandler::default()),
            blocklist: None,
            clock: system_clock(),
            handler_name: DEFAULT_HANDLER_NAME.to_string(),
        }
    }

    /// Appends a provider to the chain.
    #[must_use]
    pub fn provider(mut self, provider: impl Provider<T> + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Appends a shared provider to the chain.
    #[must_use]
    pub fn shared_provider(mut self, provider: Arc<dyn Provider<T>>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Sets how users are built from verified tokens.
    #[must_use]
    pub fn transformer(mut self, transformer: impl Transformer<T> + 'static) -> Self {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    /// Sets the source of standard claims for new tokens.
    #[must_use]
    pub fn claims_provider(mut self, claims_provider: impl ClaimsProvider + 'static) -> Self {
        self.claims_provider = Some(Arc::new(claims_provider));
        self
    }

    /// Replaces the [`DefaultErrorHandler`].
    #[must_use]
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    /// Enables revocation through a blocklist.
    #[must_use]
    pub fn blocklist(mut self, blocklist: Arc<dyn Blocklist>) -> Self {
        self.blocklist = Some(blocklist);
        self
    }

    /// Overrides the clock used for signing and validation.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides the span name of the session middleware.
    #[must_use]
    pub fn handler_name(mut self, name: impl Into<String>) -> Self {
        self.handler_name = name.into();
        self
    }

    /// Validates the configuration, loads the keys and builds the
    /// orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid configuration or keys, including
    /// a refresh key that does not outlive the access key, or a blocklist
    /// with an access key that has no `max_age` and no claims provider.
    pub fn build(self) -> AuthResult<Auth<T>> {
        let keys = self.config.load_keys()?;

        let access = keys
            .get(ACCESS_KID)
            .cloned()
            .ok_or_else(|| AuthError::configuration(format!("missing {ACCESS_KID} key")))?;
        let refresh = keys.get(REFRESH_KID).cloned();
        let refresh_enabled = refresh.is_some();

        // without an expiry, signed-out tokens cannot be blocklisted
        if self.blocklist.is_some() && access.max_age().is_none() {
            if self.claims_provider.is_none() {
                return Err(AuthError::configuration(format!(
                    "blocklist requires a max_age on the {ACCESS_KID} key"
                )));
            }
            tracing::warn!(
                "{ACCESS_KID} key has no max_age, tokens are only blocklisted if the claims provider sets exp"
            );
        }

        let signer = match refresh {
            Some(refresh) => Signer::with_refresh(access.clone(), refresh),
            None => Signer::new(access.clone()),
        }
        .map_err(|e| AuthError::configuration(e.to_string()))?
        .with_clock(self.clock.clone());

        let cookie = if self.config.cookie.is_enabled() {
            Some(CookieCodec::new(&self.config.cookie, access.max_age())?)
        } else {
            None
        };

        let mut verifier = Verifier::new(keys)
            .with_leeway(self.config.leeway)
            .with_clock(self.clock)
            .with_handler_name(self.handler_name);
        if let Some(blocklist) = self.blocklist {
            verifier = verifier.with_blocklist(blocklist);
        }

        tracing::debug!(
            providers = self.providers.len(),
            refresh_enabled,
            cookie = cookie.is_some(),
            "auth initialized"
        );

        Ok(Auth {
            inner: Arc::new(Inner {
                config: self.config,
                signer,
                verifier,
                cookie,
                providers: self.providers,
                transformer: self.transformer,
                claims_provider: self.claims_provider,
                error_handler: self.error_handler,
                refresh_enabled,
            }),
        })
    }
}

impl<T: User> fmt::Debug for AuthBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthBuilder")
            .field("providers", &self.providers.len())
            .field("blocklist", &self.blocklist.is_some())
            .field("handler_name", &self.handler_name)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Request User
// =============================================================================

/// The authenticated user of a request, attached by
/// [`verify_middleware`].
#[derive(Debug, Clone)]
pub struct AuthUser<T> {
    /// The resolved user.
    pub user: T,

    /// Standard claims of the access token.
    pub claims: StandardClaims,

    /// The raw access token.
    pub token: String,
}

impl<S, T> FromRequestParts<S> for AuthUser<T>
where
    S: Send + Sync,
    T: Clone + Send + Sync + 'static,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser<T>>()
            .cloned()
            .ok_or_else(|| AuthError::configuration("verify middleware is not installed on this route"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use time::OffsetDateTime;

    use super::*;
    use crate::blocklist::MemoryBlocklist;
    use crate::config::KeyConfig;
    use crate::token::{Claims, FixedClock};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const REFRESH_SECRET: &str = "fedcba9876543210fedcba9876543210";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestUser {
        username: String,
    }

    impl Claims for TestUser {}

    /// Accepts `password == "secret"` for a fixed set of usernames.
    struct Directory {
        users: &'static [&'static str],
        invalidated: Arc<AtomicUsize>,
    }

    impl Directory {
        fn new(users: &'static [&'static str]) -> Self {
            Self {
                users,
                invalidated: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Provider<TestUser> for Directory {
        async fn signin(&self, username: &str, password: &str) -> AuthResult<TestUser> {
            if password == "secret" && self.users.contains(&username) {
                Ok(TestUser {
                    username: username.to_string(),
                })
            } else {
                Err(AuthError::unauthenticated(format!(
                    "{} does not know {username}",
                    self.users.join(",")
                )))
            }
        }

        async fn validate_token(&self, _claims: &StandardClaims, user: &TestUser) -> AuthResult<()> {
            if self.users.contains(&user.username.as_str()) {
                Ok(())
            } else {
                Err(AuthError::unauthenticated("unknown user"))
            }
        }

        async fn invalidate_token(&self, _claims: &StandardClaims, _user: &TestUser) -> AuthResult<()> {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn invalidate_tokens(&self, _user: &TestUser) -> AuthResult<()> {
            self.invalidated.fetch_add(10, Ordering::SeqCst);
            Ok(())
        }
    }

    fn key_config(id: &str, secret: &str, max_age: Duration) -> KeyConfig {
        KeyConfig {
            id: id.to_string(),
            alg: "HS256".to_string(),
            max_age: Some(max_age),
            public: String::new(),
            private: secret.to_string(),
            encryption_key: String::new(),
        }
    }

    fn config(refresh: bool) -> AuthConfig {
        let mut keys = vec![key_config(ACCESS_KID, SECRET, Duration::from_secs(900))];
        if refresh {
            keys.push(key_config(REFRESH_KID, REFRESH_SECRET, Duration::from_secs(3600)));
        }
        AuthConfig {
            keys,
            ..AuthConfig::default()
        }
    }

    fn auth(refresh: bool) -> Auth<TestUser> {
        Auth::builder(config(refresh))
            .provider(Directory::new(&["alice"]))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_signin_verify() {
        let auth = auth(true);
        let pair = auth.signin("alice", "secret").await.unwrap();
        assert!(pair.refresh_token.is_some());

        let (user, claims) = auth.verify(&pair.access_token).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(!claims.id.is_empty());
        assert!(claims.expiry.is_some());
    }

    #[tokio::test]
    async fn test_signin_without_provider() {
        let auth = Auth::<TestUser>::builder(config(false)).build().unwrap();
        let err = auth.signin("alice", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_provider_chain_fallback() {
        let auth = Auth::builder(config(false))
            .provider(Directory::new(&["bob"]))
            .provider(Directory::new(&["alice"]))
            .build()
            .unwrap();
        let pair = auth.signin("alice", "secret").await.unwrap();
        assert!(pair.refresh_token.is_none());
        // validation falls through the first provider too
        let (user, _) = auth.verify(&pair.access_token).await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_provider_chain_last_error_wins() {
        let auth = Auth::builder(config(false))
            .provider(Directory::new(&["bob"]))
            .provider(Directory::new(&["carol"]))
            .build()
            .unwrap();
        let err = auth.signin("alice", "secret").await.unwrap_err();
        assert!(err.to_string().contains("carol does not know alice"));
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair() {
        let auth = auth(true);
        let first = auth.signin("alice", "secret").await.unwrap();
        let first_refresh = first.refresh_token.unwrap();

        let second = auth.refresh(&first_refresh).await.unwrap();
        let second_refresh = second.refresh_token.clone().unwrap();
        assert_ne!(second.access_token, first.access_token);
        assert_ne!(second_refresh, first_refresh);

        let third = auth.refresh(&second_refresh).await.unwrap();
        assert_ne!(third.access_token, second.access_token);

        let origin_of = |token: &str| {
            let verified = crate::token::verify(token, auth.verifier().keys()).unwrap();
            verified.standard_claims.origin_id
        };
        let access_id = |token: &str| {
            let verified = crate::token::verify(token, auth.verifier().keys()).unwrap();
            verified.standard_claims.id
        };
        let third_refresh = third.refresh_token.unwrap();
        assert_ne!(origin_of(&second_refresh), origin_of(&third_refresh));
        assert_eq!(origin_of(&third_refresh), access_id(&third.access_token));
    }

    #[tokio::test]
    async fn test_refresh_disabled() {
        let auth = auth(false);
        let pair = auth.signin("alice", "secret").await.unwrap();
        let err = auth.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_token_kinds_not_interchangeable() {
        let auth = auth(true);
        let pair = auth.signin("alice", "secret").await.unwrap();

        let err = auth.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated { .. }));

        let refresh = pair.refresh_token.unwrap();
        let err = auth.verify(&refresh).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated { .. }));
    }

    #[tokio::test]
    async fn test_signout_blocks_token() {
        let auth = Auth::builder(config(false))
            .provider(Directory::new(&["alice"]))
            .blocklist(Arc::new(MemoryBlocklist::new()))
            .build()
            .unwrap();
        let pair = auth.signin("alice", "secret").await.unwrap();

        auth.signout(&pair.access_token, false).await.unwrap();
        let err = auth.verify(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked));
    }

    #[test]
    fn test_blocklist_requires_access_expiry() {
        let mut config = config(false);
        config.keys[0].max_age = None;

        let err = Auth::<TestUser>::builder(config.clone())
            .blocklist(Arc::new(MemoryBlocklist::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));

        // fine without a blocklist
        assert!(Auth::<TestUser>::builder(config).build().is_ok());
    }

    #[tokio::test]
    async fn test_signout_blocks_token_with_provided_expiry() {
        struct Expiring;

        impl ClaimsProvider for Expiring {
            fn access_claims(&self) -> StandardClaims {
                StandardClaims {
                    expiry: Some(OffsetDateTime::now_utc() + time::Duration::minutes(5)),
                    ..Default::default()
                }
            }

            fn refresh_claims(&self, _access: &StandardClaims) -> StandardClaims {
                StandardClaims::default()
            }
        }

        let mut config = config(false);
        config.keys[0].max_age = None;
        let auth = Auth::builder(config)
            .provider(Directory::new(&["alice"]))
            .claims_provider(Expiring)
            .blocklist(Arc::new(MemoryBlocklist::new()))
            .build()
            .unwrap();

        let pair = auth.signin("alice", "secret").await.unwrap();
        auth.signout(&pair.access_token, false).await.unwrap();
        let err = auth.verify(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked));
    }

    #[tokio::test]
    async fn test_signout_reaches_providers() {
        let directory = Directory::new(&["alice"]);
        let invalidated = Arc::clone(&directory.invalidated);
        let auth = Auth::builder(config(false)).provider(directory).build().unwrap();

        let pair = auth.signin("alice", "secret").await.unwrap();
        auth.signout(&pair.access_token, false).await.unwrap();
        assert_eq!(invalidated.load(Ordering::SeqCst), 1);

        auth.signout(&pair.access_token, true).await.unwrap();
        assert_eq!(invalidated.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_expired_with_fixed_clock() {
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let signing = Auth::builder(config(false))
            .provider(Directory::new(&["alice"]))
            .clock(Arc::new(FixedClock(start)))
            .build()
            .unwrap();
        let pair = signing.signin("alice", "secret").await.unwrap();

        // default leeway is one minute
        let late = start + time::Duration::seconds(900 + 59);
        let verifying = Auth::builder(config(false))
            .provider(Directory::new(&["alice"]))
            .clock(Arc::new(FixedClock(late)))
            .build()
            .unwrap();
        assert!(verifying.verify(&pair.access_token).await.is_ok());

        let too_late = start + time::Duration::seconds(900 + 61);
        let verifying = Auth::builder(config(false))
            .provider(Directory::new(&["alice"]))
            .clock(Arc::new(FixedClock(too_late)))
            .build()
            .unwrap();
        assert!(matches!(
            verifying.verify(&pair.access_token).await.unwrap_err(),
            AuthError::Expired
        ));
    }

    #[tokio::test]
    async fn test_claims_provider() {
        struct Issuer;

        impl ClaimsProvider for Issuer {
            fn access_claims(&self) -> StandardClaims {
                StandardClaims {
                    issuer: "warden".to_string(),
                    ..Default::default()
                }
            }

            fn refresh_claims(&self, access: &StandardClaims) -> StandardClaims {
                StandardClaims {
                    issuer: access.issuer.clone(),
                    subject: "refresh".to_string(),
                    ..Default::default()
                }
            }
        }

        let auth = Auth::builder(config(true))
            .provider(Directory::new(&["alice"]))
            .claims_provider(Issuer)
            .build()
            .unwrap();
        let pair = auth.signin("alice", "secret").await.unwrap();
        let (_, claims) = auth.verify(&pair.access_token).await.unwrap();
        assert_eq!(claims.issuer, "warden");
    }

    #[tokio::test]
    async fn test_transformer() {
        let auth = Auth::builder(config(false))
            .provider(Directory::new(&["ALICE"]))
            .transformer(|token: &VerifiedToken| -> AuthResult<TestUser> {
                let user: TestUser = token.claims()?;
                Ok(TestUser {
                    username: user.username.to_uppercase(),
                })
            })
            .build()
            .unwrap();
        let token = auth
            .sign(&TestUser {
                username: "alice".to_string(),
            })
            .unwrap()
            .access_token;
        let (user, _) = auth.verify(&token).await.unwrap();
        assert_eq!(user.username, "ALICE");
    }

    #[test]
    fn test_build_rejects_missing_access_key() {
        let config = AuthConfig {
            keys: vec![key_config(REFRESH_KID, REFRESH_SECRET, Duration::from_secs(3600))],
            ..AuthConfig::default()
        };
        assert!(Auth::<TestUser>::builder(config).build().is_err());
    }

    #[test]
    fn test_build_rejects_short_refresh() {
        let config = AuthConfig {
            keys: vec![
                key_config(ACCESS_KID, SECRET, Duration::from_secs(3600)),
                key_config(REFRESH_KID, REFRESH_SECRET, Duration::from_secs(3600)),
            ],
            ..AuthConfig::default()
        };
        assert!(Auth::<TestUser>::builder(config).build().is_err());
    }

    #[test]
    fn test_extract_access_token() {
        let auth = auth(false);
        let mut headers = HeaderMap::new();
        headers.insert("x-authorization", "BEARER abc".parse().unwrap());
        assert_eq!(auth.extract_access_token(&headers).as_deref(), Some("abc"));

        headers.insert("authorization", "Basic xyz".parse().unwrap());
        assert_eq!(auth.extract_access_token(&headers).as_deref(), Some("abc"));

        assert!(auth.extract_access_token(&HeaderMap::new()).is_none());
    }
}
