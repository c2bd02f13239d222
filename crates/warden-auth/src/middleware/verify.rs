//! Token verification middleware.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use warden_auth::middleware::token_middleware;
//! use warden_auth::token::{RawClaims, Verified};
//!
//! async fn me(Verified { claims, .. }: Verified<RawClaims>) -> String {
//!     format!("{claims:?}")
//! }
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(middleware::from_fn_with_state(verifier, token_middleware::<RawClaims>));
//! ```

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use super::error::reject;
use super::extract::extract_token;
use crate::AuthResult;
use crate::error::AuthError;
use crate::token::{Claims, Verified, VerifiedToken, Verifier};

/// Verifies the request token and attaches the result to the request.
///
/// On success the request extensions carry a [`VerifiedToken`], a
/// [`Verified<T>`] and a [`Logout`] handle. On failure the request stops
/// here and the verifier's [`ErrorHandler`](super::ErrorHandler) answers.
pub async fn token_middleware<T>(
    State(verifier): State<Verifier>,
    request: Request,
    next: Next,
) -> Response
where
    T: Claims + Clone,
{
    let span = tracing::debug_span!("token_middleware", handler = %verifier.handler_name());

    async move {
        let (token, mut request) = match extract_token(verifier.extractors(), request).await {
            Ok(extracted) => extracted,
            Err(e) => return reject(verifier.error_handler(), &e),
        };

        let Some(token) = token else {
            tracing::debug!("no token in request");
            return verifier.error_handler().unauthenticated(&AuthError::Missing);
        };

        match verifier
            .authenticate::<T>(&token, verifier.expectations())
            .await
        {
            Ok(verified) => {
                tracing::debug!(kid = %verified.token.kid(), jti = %verified.standard_claims().id, "token verified");
                let extensions = request.extensions_mut();
                extensions.insert(verified.token.clone());
                extensions.insert(Logout {
                    verifier: verifier.clone(),
                    token: verified.token.clone(),
                });
                extensions.insert(verified);
                next.run(request).await
            }
            Err(e) => {
                tracing::debug!(error = %e, "token verification failed");
                reject(verifier.error_handler(), &e)
            }
        }
    }
    .instrument(span)
    .await
}

// =============================================================================
// Logout
// =============================================================================

/// Revokes the token of the current request.
#[derive(Debug, Clone)]
pub struct Logout {
    verifier: Verifier,
    token: VerifiedToken,
}

impl Logout {
    /// Adds the current token to the blocklist.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the verifier has no blocklist, or the
    /// backend error.
    pub async fn logout(&self) -> AuthResult<()> {
        self.verifier.invalidate(&self.token).await
    }

    /// The token this handle revokes.
    #[must_use]
    pub fn token(&self) -> &VerifiedToken {
        &self.token
    }
}

// =============================================================================
// Extractors
// =============================================================================

fn not_installed() -> AuthError {
    AuthError::configuration("token middleware is not installed on this route")
}

impl<S, T> FromRequestParts<S> for Verified<T>
where
    S: Send + Sync,
    T: Clone + Send + Sync + 'static,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Verified<T>>()
            .cloned()
            .ok_or_else(not_installed)
    }
}

impl<S> FromRequestParts<S> for Logout
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Logout>()
            .cloned()
            .ok_or_else(not_installed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        Router, body::Body, http::StatusCode, middleware, response::IntoResponse, routing::get,
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::blocklist::MemoryBlocklist;
    use crate::middleware::{DefaultErrorHandler, Extractor};
    use crate::token::{Algorithm, Key, KeySet, RawClaims, Signer};

    fn key() -> Key {
        Key::hmac("k", Algorithm::HS256, b"0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_max_age(Duration::from_secs(600))
    }

    async fn whoami(Verified { claims, .. }: Verified<RawClaims>) -> String {
        claims
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    async fn logout(logout: Logout) -> Result<&'static str, AuthError> {
        logout.logout().await?;
        Ok("bye")
    }

    fn app(verifier: Verifier) -> Router {
        Router::new()
            .route("/me", get(whoami))
            .route("/logout", get(logout))
            .layer(middleware::from_fn_with_state(
                verifier,
                token_middleware::<RawClaims>,
            ))
    }

    fn get_with_token(uri: &str, token: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_token() {
        let app = app(Verifier::new(KeySet::from(key())));
        let response = app
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let token = Signer::new(key()).unwrap().sign(&json!({"username": "alice"})).unwrap();
        let app = app(Verifier::new(KeySet::from(key())));

        let response = app.oneshot(get_with_token("/me", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn test_logout_blocks_token() {
        let token = Signer::new(key()).unwrap().sign(&json!({"username": "alice"})).unwrap();
        let verifier = Verifier::new(KeySet::from(key()))
            .with_blocklist(Arc::new(MemoryBlocklist::new()));
        let app = app(verifier);

        let response = app.clone().oneshot(get_with_token("/logout", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_with_token("/me", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_custom_extractor_chain() {
        let token = Signer::new(key()).unwrap().sign(&json!({"username": "bob"})).unwrap();
        let verifier = Verifier::new(KeySet::from(key()))
            .with_extractors([Extractor::BearerHeader("X-Token".into())]);
        let app = app(verifier);

        let request = Request::builder()
            .uri("/me")
            .header("X-Token", format!("bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // the default query extractor is gone
        let request = Request::builder()
            .uri(format!("/me?token={token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    struct Teapot;

    impl crate::middleware::ErrorHandler for Teapot {
        fn unauthenticated(&self, error: &AuthError) -> Response {
            (StatusCode::IM_A_TEAPOT, format!("denied: {error}")).into_response()
        }

        fn invalid_argument(&self, error: &AuthError) -> Response {
            (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()).into_response()
        }
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_custom_error_handler() {
        let verifier = Verifier::new(KeySet::from(key())).with_error_handler(Teapot);
        let app = app(verifier);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(body_text(response).await, "denied: Token is missing");

        let response = app.oneshot(get_with_token("/me", "not.a.token")).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(body_text(response).await.starts_with("denied: "));
    }

    #[tokio::test]
    async fn test_exposing_error_handler_reveals_reason() {
        let signer = Signer::new(key()).unwrap();
        let past = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
        let standard = crate::token::StandardClaims {
            expiry: Some(past),
            ..Default::default()
        };
        let token = signer.sign_with(&json!({"username": "alice"}), standard).unwrap();
        let verifier =
            Verifier::new(KeySet::from(key())).with_error_handler(DefaultErrorHandler::exposing());

        let response = app(verifier).oneshot(get_with_token("/me", &token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["message"], "Token expired");
    }
}
