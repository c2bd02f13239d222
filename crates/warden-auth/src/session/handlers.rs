//! Axum handlers and middleware for [`Auth`].
//!
//! | Route              | Handler                 | Body                               |
//! |--------------------|-------------------------|------------------------------------|
//! | `POST /signin`     | [`signin_handler`]      | `{username \| email, password}`    |
//! | `POST /refresh`    | [`refresh_handler`]     | `{refresh_token}`                  |
//! | `POST /signout`    | [`signout_handler`]     | none, access token from the request|
//! | `POST /signout/all`| [`signout_all_handler`] | none, access token from the request|
//!
//! Sign-in and refresh answer `{access_token, refresh_token?}`.

use std::fmt;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use tracing::Instrument;

use super::{Auth, AuthUser, User};
use crate::AuthResult;
use crate::error::AuthError;
use crate::middleware::is_json;
use crate::token::TokenPair;

/// Sign-in request body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SigninRequest {
    /// Username; falls back to `email` when empty.
    pub username: String,

    /// Email, used as the username when `username` is empty.
    pub email: String,

    /// Password.
    pub password: String,
}

impl SigninRequest {
    /// The login name: `username`, or `email` if it is empty.
    #[must_use]
    pub fn login(&self) -> &str {
        if self.username.is_empty() {
            &self.email
        } else {
            &self.username
        }
    }

    fn from_form(body: &[u8]) -> Self {
        let mut request = Self::default();
        for (name, value) in url::form_urlencoded::parse(body) {
            match name.as_ref() {
                "username" => request.username = value.into_owned(),
                "email" => request.email = value.into_owned(),
                "password" => request.password = value.into_owned(),
                _ => {}
            }
        }
        request
    }
}

/// Refresh request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    /// The refresh token to exchange.
    #[serde(default)]
    pub refresh_token: String,
}

/// Mounts the sign-in, refresh and sign-out handlers.
#[must_use]
pub fn auth_routes<T: User>(auth: Auth<T>) -> Router {
    Router::new()
        .route("/signin", post(signin_handler::<T>))
        .route("/refresh", post(refresh_handler::<T>))
        .route("/signout", post(signout_handler::<T>))
        .route("/signout/all", post(signout_all_handler::<T>))
        .with_state(auth)
}

// =============================================================================
// Handlers
// =============================================================================

/// Signs a user in from a JSON, form-encoded or multipart body.
pub async fn signin_handler<T: User>(State(auth): State<Auth<T>>, request: Request) -> Response {
    let request = match read_signin(request).await {
        Ok(request) => request,
        Err(e) => return auth.error_handler().invalid_argument(&e),
    };

    match auth.signin(request.login(), &request.password).await {
        Ok(pair) => {
            tracing::info!(username = %request.login(), "signed in");
            pair_response(&auth, pair)
        }
        Err(e) => {
            let mut response = auth.error_handler().unauthenticated(&e);
            remove_cookie(&auth, &mut response);
            response
        }
    }
}

/// Exchanges a refresh token for a new token pair.
pub async fn refresh_handler<T: User>(State(auth): State<Auth<T>>, body: Bytes) -> Response {
    let request: RefreshRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let e = AuthError::invalid_argument(format!("refresh request: {e}"));
            return auth.error_handler().invalid_argument(&e);
        }
    };

    match auth.refresh(&request.refresh_token).await {
        Ok(pair) => pair_response(&auth, pair),
        Err(e) => auth.error_handler().unauthenticated(&e),
    }
}

/// Signs out the current token.
pub async fn signout_handler<T: User>(State(auth): State<Auth<T>>, headers: HeaderMap) -> Response {
    signout(&auth, &headers, false).await
}

/// Signs out every session of the current user.
pub async fn signout_all_handler<T: User>(
    State(auth): State<Auth<T>>,
    headers: HeaderMap,
) -> Response {
    signout(&auth, &headers, true).await
}

async fn signout<T: User>(auth: &Auth<T>, headers: &HeaderMap, all: bool) -> Response {
    let Some(token) = auth.extract_access_token(headers) else {
        return auth.error_handler().unauthenticated(&AuthError::Missing);
    };

    if let Err(e) = auth.signout(&token, all).await {
        return auth.error_handler().unauthenticated(&e);
    }

    tracing::info!(all, "signed out");
    let mut response = StatusCode::NO_CONTENT.into_response();
    remove_cookie(auth, &mut response);
    response
}

async fn read_signin(request: Request) -> AuthResult<SigninRequest> {
    if content_type(request.headers()).starts_with("multipart/form-data") {
        return read_multipart_signin(request).await;
    }

    let headers = request.headers().clone();
    let body = Bytes::from_request(request, &())
        .await
        .map_err(invalid_signin)?;
    parse_signin(&headers, &body)
}

async fn read_multipart_signin(request: Request) -> AuthResult<SigninRequest> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(invalid_signin)?;

    let mut signin = SigninRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid_signin)? {
        let slot = match field.name() {
            Some("username") => &mut signin.username,
            Some("email") => &mut signin.email,
            Some("password") => &mut signin.password,
            _ => continue,
        };
        *slot = field.text().await.map_err(invalid_signin)?;
    }
    Ok(signin)
}

fn invalid_signin(e: impl fmt::Display) -> AuthError {
    AuthError::invalid_argument(format!("signin request: {e}"))
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn parse_signin(headers: &HeaderMap, body: &[u8]) -> AuthResult<SigninRequest> {
    let content_type = content_type(headers);

    if content_type.starts_with("application/x-www-form-urlencoded") {
        return Ok(SigninRequest::from_form(body));
    }
    if !content_type.is_empty() && !is_json(headers) {
        tracing::debug!(content_type, "sign-in body is not declared as JSON, parsing anyway");
    }

    serde_json::from_slice(body).map_err(invalid_signin)
}

fn pair_response<T: User>(auth: &Auth<T>, pair: TokenPair) -> Response {
    let cookie = auth.cookie().map(|cookie| cookie.encode(&pair.access_token));
    let mut response = Json(pair).into_response();
    match cookie {
        Some(Ok(value)) => append_cookie(&mut response, value),
        Some(Err(e)) => tracing::error!(error = %e, "failed to set auth cookie"),
        None => {}
    }
    response
}

fn remove_cookie<T: User>(auth: &Auth<T>, response: &mut Response) {
    match auth.cookie().map(super::CookieCodec::removal) {
        Some(Ok(value)) => append_cookie(response, value),
        Some(Err(e)) => tracing::error!(error = %e, "failed to remove auth cookie"),
        None => {}
    }
}

fn append_cookie(response: &mut Response, value: HeaderValue) {
    response.headers_mut().append(header::SET_COOKIE, value);
}

// =============================================================================
// Verify Middleware
// =============================================================================

/// An extra check run on the user after verification succeeds.
pub type VerifyCheck<T> = Arc<dyn Fn(&T) -> AuthResult<()> + Send + Sync>;

/// State of [`verify_middleware`]: the orchestrator and extra checks.
pub struct VerifyState<T: User> {
    auth: Auth<T>,
    checks: Vec<VerifyCheck<T>>,
}

impl<T: User> VerifyState<T> {
    /// Creates the state without extra checks.
    #[must_use]
    pub fn new(auth: Auth<T>) -> Self {
        Self {
            auth,
            checks: Vec::new(),
        }
    }

    /// Adds a check; checks run in order and the first error rejects.
    #[must_use]
    pub fn check(mut self, check: impl Fn(&T) -> AuthResult<()> + Send + Sync + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }
}

impl<T: User> Clone for VerifyState<T> {
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            checks: self.checks.clone(),
        }
    }
}

impl<T: User> From<Auth<T>> for VerifyState<T> {
    fn from(auth: Auth<T>) -> Self {
        Self::new(auth)
    }
}

impl<T: User> fmt::Debug for VerifyState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyState")
            .field("auth", &self.auth)
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// Verifies the access token and attaches [`AuthUser<T>`] to the request.
///
/// Any failure answers through the error handler's `unauthenticated`.
pub async fn verify_middleware<T: User>(
    State(state): State<VerifyState<T>>,
    mut request: Request,
    next: Next,
) -> Response {
    let span = tracing::debug_span!(
        "verify_middleware",
        handler = %state.auth.verifier().handler_name()
    );

    async move {
        let auth = &state.auth;
        let Some(token) = auth.extract_access_token(request.headers()) else {
            return auth.error_handler().unauthenticated(&AuthError::Missing);
        };

        let (user, claims) = match auth.verify(&token).await {
            Ok(verified) => verified,
            Err(e) => return auth.error_handler().unauthenticated(&e),
        };

        for check in &state.checks {
            if let Err(e) = check(&user) {
                return auth.error_handler().unauthenticated(&e);
            }
        }

        tracing::debug!(jti = %claims.id, "request authenticated");
        request.extensions_mut().insert(AuthUser {
            user,
            claims,
            token,
        });
        next.run(request).await
    }
    .instrument(span)
    .await
}
