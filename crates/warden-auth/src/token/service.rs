//! Token service: issuing and verifying tokens.
//!
//! [`Signer`] wraps the codec's signing side and knows how to mint an
//! access/refresh [`TokenPair`]. [`Verifier`] runs the full verification
//! pipeline:
//!
//! 1. structure, key and signature ([`codec::verify`](super::codec::verify))
//! 2. time window with leeway
//! 3. caller [`Expectation`]s
//! 4. the blocklist, if configured
//! 5. registered [`TokenValidator`]s, in order
//!
//! Steps 4 and 5 receive the outcome of the steps before them, so a
//! validator may react to an `Expired` token (the blocklist drops its entry).
//!
//! # Usage
//!
//! ```ignore
//! use warden_auth::token::{Algorithm, Key, KeySet, Signer, Verifier};
//!
//! let key = Key::hmac("k1", Algorithm::HS256, secret)?.with_max_age(Duration::from_secs(900));
//! let signer = Signer::new(key.clone())?;
//! let verifier = Verifier::new(KeySet::from(key));
//!
//! let token = signer.sign(&json!({"username": "alice"}))?;
//! let verified = verifier.verify_token(&token, &[]).await?;
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::claims::{Claims, StandardClaims};
use super::codec::{self, VerifiedToken};
use super::key::{Key, KeySet};
use super::validation::{Expectation, SharedClock, system_clock, validate_time};
use crate::AuthResult;
use crate::blocklist::{self, Blocklist};
use crate::error::AuthError;
use crate::middleware::{DefaultErrorHandler, ErrorHandler, Extractor};

/// Default span name of the verification middleware.
pub const DEFAULT_HANDLER_NAME: &str = "warden.jwt";

// ============================================================================
// Token Pair
// ============================================================================

/// An access token and, when refresh is enabled, its refresh token.
///
/// Serializes as `{"access_token": "...", "refresh_token": "..."}`, leaving
/// out `refresh_token` when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// The access token.
    pub access_token: String,

    /// The refresh token, if a refresh key is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

// ============================================================================
// Signer
// ============================================================================

/// Issues tokens with an access key and an optional refresh key.
#[derive(Clone)]
pub struct Signer {
    access: Arc<Key>,
    refresh: Option<Arc<Key>>,
    clock: SharedClock,
}

impl Signer {
    /// Creates a signer for a single key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the key has no private material.
    pub fn new(key: impl Into<Arc<Key>>) -> AuthResult<Self> {
        let access = key.into();
        ensure_can_sign(&access)?;
        Ok(Self {
            access,
            refresh: None,
            clock: system_clock(),
        })
    }

    /// Creates a signer that also issues refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either key cannot sign, either key has no
    /// max-age, or the refresh max-age is not strictly greater than the
    /// access max-age.
    pub fn with_refresh(access: impl Into<Arc<Key>>, refresh: impl Into<Arc<Key>>) -> AuthResult<Self> {
        let access = access.into();
        let refresh = refresh.into();
        ensure_can_sign(&access)?;
        ensure_can_sign(&refresh)?;

        let (Some(access_age), Some(refresh_age)) = (access.max_age(), refresh.max_age()) else {
            return Err(AuthError::invalid_argument(
                "access and refresh keys must both have a max-age",
            ));
        };
        if refresh_age <= access_age {
            return Err(AuthError::invalid_argument(format!(
                "refresh max-age ({refresh_age:?}) must be greater than access max-age ({access_age:?})"
            )));
        }

        Ok(Self {
            access,
            refresh: Some(refresh),
            clock: system_clock(),
        })
    }

    /// Uses a custom clock for issued-at and expiry defaults.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The access key.
    #[must_use]
    pub fn access_key(&self) -> &Key {
        &self.access
    }

    /// The refresh key, if refresh is enabled.
    #[must_use]
    pub fn refresh_key(&self) -> Option<&Key> {
        self.refresh.as_deref()
    }

    /// Signs claims with the access key and default standard claims.
    ///
    /// # Errors
    ///
    /// See [`codec::sign`].
    pub fn sign<C: Serialize + ?Sized>(&self, claims: &C) -> AuthResult<String> {
        self.sign_with(claims, StandardClaims::default())
    }

    /// Signs claims with the access key and explicit standard claims.
    ///
    /// # Errors
    ///
    /// See [`codec::sign`].
    pub fn sign_with<C: Serialize + ?Sized>(
        &self,
        claims: &C,
        standard: StandardClaims,
    ) -> AuthResult<String> {
        codec::sign(claims, standard, &self.access, self.clock.now())
    }

    /// Issues an access token and, if enabled, a refresh token.
    ///
    /// Both carry the same custom claims. Unset `iat` and `jti` are filled
    /// in here so the refresh token can point at the access token: its
    /// `origin_jti` is set to the access `jti` unless already set.
    ///
    /// # Errors
    ///
    /// Returns the first signing error, for either token.
    pub fn sign_pair<C: Serialize + ?Sized>(
        &self,
        claims: &C,
        mut access: StandardClaims,
        mut refresh: StandardClaims,
    ) -> AuthResult<TokenPair> {
        let now = self.clock.now();
        fill_defaults(&mut access, now);

        let access_token = codec::sign(claims, access.clone(), &self.access, now)?;

        let Some(refresh_key) = &self.refresh else {
            return Ok(TokenPair {
                access_token,
                refresh_token: None,
            });
        };

        fill_defaults(&mut refresh, now);
        if refresh.origin_id.is_empty() {
            refresh.origin_id = access.id;
        }
        let refresh_token = codec::sign(claims, refresh, refresh_key, now)?;

        Ok(TokenPair {
            access_token,
            refresh_token: Some(refresh_token),
        })
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("access", &self.access.kid())
            .field("refresh", &self.refresh.as_ref().map(|key| key.kid()))
            .finish()
    }
}

fn ensure_can_sign(key: &Key) -> AuthResult<()> {
    if key.can_sign() {
        Ok(())
    } else {
        Err(AuthError::invalid_argument(format!(
            "key {} has no private material and cannot sign",
            key.kid()
        )))
    }
}

fn fill_defaults(standard: &mut StandardClaims, now: time::OffsetDateTime) {
    if standard.issued_at.is_none() {
        standard.issued_at = Some(now);
    }
    if standard.id.is_empty() {
        standard.id = uuid::Uuid::new_v4().to_string();
    }
}

// ============================================================================
// Token Validators
// ============================================================================

/// An extra verification step run after claims validation.
///
/// `outcome` is the result of every step before this one. Returning it
/// unchanged passes the decision on; returning `Ok(())` for a failed
/// outcome overrides it.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validates a verified token.
    async fn validate_token(&self, token: &VerifiedToken, outcome: AuthResult<()>)
    -> AuthResult<()>;
}

/// A token verified and decoded into custom claims.
#[derive(Debug, Clone)]
pub struct Verified<T> {
    /// Decoded custom claims.
    pub claims: T,
    /// The verified token.
    pub token: VerifiedToken,
}

impl<T> Verified<T> {
    /// Standard claims of the token.
    #[must_use]
    pub fn standard_claims(&self) -> &StandardClaims {
        &self.token.standard_claims
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies tokens against a key set.
///
/// Cheap to clone; everything inside is shared.
#[derive(Clone)]
pub struct Verifier {
    keys: Arc<KeySet>,
    blocklist: Option<Arc<dyn Blocklist>>,
    validators: Vec<Arc<dyn TokenValidator>>,
    extractors: Arc<[Extractor]>,
    expectations: Arc<[Expectation]>,
    leeway: Duration,
    clock: SharedClock,
    handler_name: Cow<'static, str>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Verifier {
    /// Creates a verifier without blocklist, validators or leeway.
    #[must_use]
    pub fn new(keys: impl Into<Arc<KeySet>>) -> Self {
        Self {
            keys: keys.into(),
            blocklist: None,
            validators: Vec::new(),
            extractors: Extractor::defaults().into(),
            expectations: Vec::new().into(),
            leeway: Duration::ZERO,
            clock: system_clock(),
            handler_name: Cow::Borrowed(DEFAULT_HANDLER_NAME),
            error_handler: Arc::new(DefaultErrorHandler::default()),
        }
    }

    /// Consults `blocklist` on every verification and enables
    /// [`invalidate`](Self::invalidate).
    #[must_use]
    pub fn with_blocklist(mut self, blocklist: Arc<dyn Blocklist>) -> Self {
        self.blocklist = Some(blocklist);
        self
    }

    /// Appends a validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Replaces the token extractors used by the middleware.
    #[must_use]
    pub fn with_extractors(mut self, extractors: impl IntoIterator<Item = Extractor>) -> Self {
        self.extractors = extractors.into_iter().collect();
        self
    }

    /// Appends one extractor after the current ones.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        let mut extractors = self.extractors.to_vec();
        extractors.push(extractor);
        self.extractors = extractors.into();
        self
    }

    /// Sets the expectations the middleware checks on every request.
    #[must_use]
    pub fn with_expectations(mut self, expectations: impl IntoIterator<Item = Expectation>) -> Self {
        self.expectations = expectations.into_iter().collect();
        self
    }

    /// Sets the time tolerance for `exp`, `nbf` and `iat`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Uses a custom clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Names the tracing span entered by the middleware.
    #[must_use]
    pub fn with_handler_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.handler_name = name.into();
        self
    }

    /// Replaces the [`DefaultErrorHandler`] answering middleware failures.
    #[must_use]
    pub fn with_error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    /// The key set.
    #[must_use]
    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// The configured blocklist.
    #[must_use]
    pub fn blocklist(&self) -> Option<&Arc<dyn Blocklist>> {
        self.blocklist.as_ref()
    }

    /// Token extractors, in evaluation order.
    #[must_use]
    pub fn extractors(&self) -> &[Extractor] {
        &self.extractors
    }

    /// Expectations checked by the middleware.
    #[must_use]
    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    /// The handler answering middleware failures.
    #[must_use]
    pub fn error_handler(&self) -> &dyn ErrorHandler {
        self.error_handler.as_ref()
    }

    /// Span name for the middleware.
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Runs the full verification pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first failure: a codec error, a time-window error, an
    /// expectation error, `Blocked`, a backend `Storage` error, or whatever
    /// a validator decides.
    pub async fn verify_token(
        &self,
        token: &str,
        expectations: &[Expectation],
    ) -> AuthResult<VerifiedToken> {
        let verified = codec::verify(token, &self.keys)?;

        let mut outcome = validate_time(&verified.standard_claims, self.clock.now(), self.leeway)
            .and_then(|()| {
                expectations
                    .iter()
                    .try_for_each(|expectation| expectation.check(&verified))
            });

        if let Some(blocklist) = &self.blocklist {
            outcome = blocklist::validate_token(blocklist.as_ref(), &verified, outcome).await;
        }

        for validator in &self.validators {
            outcome = validator.validate_token(&verified, outcome).await;
        }

        outcome.map(|()| verified)
    }

    /// Verifies a token and decodes its custom claims.
    ///
    /// # Errors
    ///
    /// See [`verify_token`](Self::verify_token); additionally `TokenForm`
    /// when the payload does not decode into `T`, or the error of
    /// [`Claims::validate`].
    pub async fn authenticate<T: Claims>(
        &self,
        token: &str,
        expectations: &[Expectation],
    ) -> AuthResult<Verified<T>> {
        let token = self.verify_token(token, expectations).await?;
        let claims = token.claims::<T>()?;
        Ok(Verified { claims, token })
    }

    /// Revokes a verified token until its own expiry.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without a blocklist, `InvalidArgument` for a
    /// token without `exp`, or the backend error.
    pub async fn invalidate(&self, token: &VerifiedToken) -> AuthResult<()> {
        let blocklist = self
            .blocklist
            .as_ref()
            .ok_or_else(|| AuthError::configuration("token invalidation requires a blocklist"))?;
        blocklist
            .invalidate_token(&token.token, &token.standard_claims)
            .await
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("keys", &self.keys.len())
            .field("blocklist", &self.blocklist.is_some())
            .field("validators", &self.validators.len())
            .field("extractors", &self.extractors)
            .field("leeway", &self.leeway)
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::OffsetDateTime;

    use super::*;
    use crate::blocklist::MemoryBlocklist;
    use crate::token::algorithm::Algorithm;
    use crate::token::claims::RawClaims;
    use crate::token::validation::FixedClock;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn hmac(kid: &str, max_age: u64) -> Key {
        Key::hmac(kid, Algorithm::HS256, SECRET)
            .unwrap()
            .with_max_age(Duration::from_secs(max_age))
    }

    fn at(ts: i64) -> SharedClock {
        Arc::new(FixedClock(OffsetDateTime::from_unix_timestamp(ts).unwrap()))
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct User {
        username: String,
    }

    impl Claims for User {}

    #[tokio::test]
    async fn test_alice_scenario() {
        let key = hmac("k", 15 * 60);
        let signer = Signer::new(key.clone()).unwrap();
        let blocklist = Arc::new(MemoryBlocklist::new());
        let verifier = Verifier::new(KeySet::from(key)).with_blocklist(blocklist);

        let before = OffsetDateTime::now_utc().unix_timestamp();
        let token = signer.sign(&json!({"username": "alice"})).unwrap();

        let verified = verifier.authenticate::<User>(&token, &[]).await.unwrap();
        assert_eq!(verified.claims.username, "alice");
        let standard = verified.standard_claims();
        let iat = standard.issued_at.unwrap().unix_timestamp();
        assert!(iat >= before);
        assert_eq!(standard.expiry.unwrap().unix_timestamp(), iat + 15 * 60);

        verifier.invalidate(&verified.token).await.unwrap();
        let err = verifier.verify_token(&token, &[]).await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked));
    }

    #[tokio::test]
    async fn test_expiry_boundary_through_verifier() {
        let key = hmac("k", 60);
        let signer = Signer::new(key.clone()).unwrap().with_clock(at(1_000));
        let token = signer.sign(&json!({})).unwrap();
        // exp = 1060

        let verifier = Verifier::new(KeySet::from(key));
        assert!(verifier.clone().with_clock(at(1_059)).verify_token(&token, &[]).await.is_ok());
        assert!(matches!(
            verifier.clone().with_clock(at(1_061)).verify_token(&token, &[]).await,
            Err(AuthError::Expired)
        ));
        assert!(
            verifier
                .with_clock(at(1_061))
                .with_leeway(Duration::from_secs(2))
                .verify_token(&token, &[])
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_expired_token_leaves_blocklist() {
        let key = hmac("k", 60);
        let signer = Signer::new(key.clone()).unwrap().with_clock(at(1_000));
        let token = signer.sign(&json!({})).unwrap();

        let blocklist = Arc::new(MemoryBlocklist::new());
        let verifier = Verifier::new(KeySet::from(key))
            .with_blocklist(blocklist.clone())
            .with_clock(at(1_010));
        let verified = verifier.verify_token(&token, &[]).await.unwrap();
        verifier.invalidate(&verified).await.unwrap();
        assert_eq!(blocklist.count().await.unwrap(), 1);

        let later = verifier.with_clock(at(2_000));
        assert!(matches!(later.verify_token(&token, &[]).await, Err(AuthError::Expired)));
        assert_eq!(blocklist.count().await.unwrap(), 0);
    }

    #[test]
    fn test_refresh_max_age_must_exceed_access() {
        let err = Signer::with_refresh(hmac("a", 3600), hmac("r", 3600)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidArgument { .. }));

        let err = Signer::with_refresh(hmac("a", 3600), hmac("r", 60)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidArgument { .. }));

        let no_age = Key::hmac("r", Algorithm::HS256, SECRET).unwrap();
        assert!(Signer::with_refresh(hmac("a", 3600), no_age).is_err());

        assert!(Signer::with_refresh(hmac("a", 3600), hmac("r", 7200)).is_ok());
    }

    #[test]
    fn test_verify_only_key_rejected() {
        let (_, public_pem) = crate::token::key::generate_ec_pem().unwrap();
        let key = Key::from_pem("ec", Algorithm::ES384, None, Some(&public_pem)).unwrap();
        assert!(matches!(
            Signer::new(key),
            Err(AuthError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_sign_pair_links_origin() {
        let access = hmac("a", 60);
        let refresh = hmac("r", 3600);
        let signer = Signer::with_refresh(access.clone(), refresh.clone()).unwrap();
        let verifier = Verifier::new(KeySet::new([access, refresh]).unwrap());

        let pair = signer
            .sign_pair(
                &json!({"username": "alice"}),
                StandardClaims::default(),
                StandardClaims::default(),
            )
            .unwrap();
        let refresh_token = pair.refresh_token.unwrap();

        let access = verifier.verify_token(&pair.access_token, &[]).await.unwrap();
        let refresh = verifier
            .verify_token(&refresh_token, &[Expectation::RefreshToken])
            .await
            .unwrap();

        assert_eq!(access.kid(), "a");
        assert_eq!(refresh.kid(), "r");
        assert_eq!(refresh.standard_claims.origin_id, access.standard_claims.id);
        assert_ne!(refresh.standard_claims.id, access.standard_claims.id);
        assert!(matches!(
            verifier
                .verify_token(&pair.access_token, &[Expectation::RefreshToken])
                .await,
            Err(AuthError::Unauthenticated { .. })
        ));
    }

    #[test]
    fn test_sign_pair_keeps_explicit_origin() {
        let signer = Signer::with_refresh(hmac("a", 60), hmac("r", 3600)).unwrap();
        let refresh_std = StandardClaims {
            origin_id: "original".into(),
            ..Default::default()
        };
        let pair = signer
            .sign_pair(&json!({}), StandardClaims::default(), refresh_std)
            .unwrap();
        let keys = KeySet::from(hmac("r", 3600));
        let refresh = codec::verify(pair.refresh_token.as_deref().unwrap(), &keys).unwrap();
        assert_eq!(refresh.standard_claims.origin_id, "original");
    }

    #[test]
    fn test_sign_pair_without_refresh_key() {
        let signer = Signer::new(hmac("a", 60)).unwrap();
        let pair = signer
            .sign_pair(&json!({}), StandardClaims::default(), StandardClaims::default())
            .unwrap();
        assert!(pair.refresh_token.is_none());
        let body = serde_json::to_value(&pair).unwrap();
        assert!(body.get("refresh_token").is_none());
    }

    #[test]
    fn test_sign_pair_rejects_non_object_claims() {
        let signer = Signer::with_refresh(hmac("a", 60), hmac("r", 3600)).unwrap();
        assert!(signer
            .sign_pair(&json!(42), StandardClaims::default(), StandardClaims::default())
            .is_err());
    }

    struct DenyAdmins;

    #[async_trait]
    impl TokenValidator for DenyAdmins {
        async fn validate_token(
            &self,
            token: &VerifiedToken,
            outcome: AuthResult<()>,
        ) -> AuthResult<()> {
            outcome?;
            let claims: RawClaims = token.claims()?;
            if claims.get("role").and_then(|v| v.as_str()) == Some("admin") {
                return Err(AuthError::unauthenticated("admins use another door"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_custom_validator_runs_last() {
        let key = hmac("k", 60);
        let signer = Signer::new(key.clone()).unwrap();
        let verifier = Verifier::new(KeySet::from(key)).with_validator(Arc::new(DenyAdmins));

        let user = signer.sign(&json!({"role": "user"})).unwrap();
        let admin = signer.sign(&json!({"role": "admin"})).unwrap();
        assert!(verifier.verify_token(&user, &[]).await.is_ok());
        assert!(matches!(
            verifier.verify_token(&admin, &[]).await,
            Err(AuthError::Unauthenticated { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalidate_without_blocklist() {
        let key = hmac("k", 60);
        let token = Signer::new(key.clone()).unwrap().sign(&json!({})).unwrap();
        let verifier = Verifier::new(KeySet::from(key));
        let verified = verifier.verify_token(&token, &[]).await.unwrap();
        assert!(matches!(
            verifier.invalidate(&verified).await,
            Err(AuthError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_expectations_run_in_pipeline() {
        let key = hmac("k", 60);
        let signer = Signer::new(key.clone()).unwrap();
        let token = signer
            .sign_with(
                &json!({}),
                StandardClaims {
                    issuer: "warden".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let verifier = Verifier::new(KeySet::from(key));
        assert!(verifier
            .verify_token(&token, &[Expectation::Issuer("warden".into())])
            .await
            .is_ok());
        assert!(matches!(
            verifier
                .verify_token(&token, &[Expectation::Issuer("other".into())])
                .await,
            Err(AuthError::Unexpected { .. })
        ));
    }
}
