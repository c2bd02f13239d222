//! Error responses for authentication failures.
//!
//! Private error details never reach the client by default: the response
//! carries a generic message for the status, and the real error is logged.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AuthError;

/// JSON body of an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,

    /// Human-readable message.
    pub message: String,
}

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        error_response(&self, false)
    }
}

/// Builds the HTTP response for an error, with the status derived from its
/// kind.
///
/// With `expose`, the message is the error's own text; otherwise it is a
/// generic text for the status.
#[must_use]
pub fn error_response(error: &AuthError, expose: bool) -> Response {
    status_response(status_for(error), error, expose)
}

/// Builds the HTTP response for an error with an explicit status.
#[must_use]
pub fn status_response(status: StatusCode, error: &AuthError, expose: bool) -> Response {
    if error.is_server_error() {
        tracing::error!(error = %error, category = %error.category(), "authentication failed");
    } else {
        tracing::debug!(error = %error, category = %error.category(), "authentication rejected");
    }

    let (code, generic) = describe(status);
    let message = if expose {
        error.to_string()
    } else {
        generic.to_string()
    };

    let mut headers = HeaderMap::new();
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"warden\", error=\"invalid_token\""),
        );
    }

    (status, headers, Json(ErrorBody { error: code, message })).into_response()
}

// =============================================================================
// Error Handlers
// =============================================================================

/// Turns authentication failures into responses.
///
/// Used by [`token_middleware`](super::token_middleware) and by the
/// orchestrator handlers.
pub trait ErrorHandler: Send + Sync {
    /// Response for failed authentication.
    fn unauthenticated(&self, error: &AuthError) -> Response;

    /// Response for a malformed request.
    fn invalid_argument(&self, error: &AuthError) -> Response;
}

/// Answers 401 and 400 with a generic JSON body.
///
/// The private error is only logged, unless built with
/// [`exposing`](Self::exposing).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler {
    expose: bool,
}

impl DefaultErrorHandler {
    /// A handler that puts the error message in the response body.
    #[must_use]
    pub fn exposing() -> Self {
        Self { expose: true }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn unauthenticated(&self, error: &AuthError) -> Response {
        status_response(StatusCode::UNAUTHORIZED, error, self.expose)
    }

    fn invalid_argument(&self, error: &AuthError) -> Response {
        status_response(StatusCode::BAD_REQUEST, error, self.expose)
    }
}

/// Answers through `handler`, picking `invalid_argument` for malformed
/// requests and `unauthenticated` for everything else.
#[must_use]
pub fn reject(handler: &dyn ErrorHandler, error: &AuthError) -> Response {
    match error {
        AuthError::InvalidArgument { .. } => handler.invalid_argument(error),
        _ => handler.unauthenticated(error),
    }
}

/// Maps an error kind to its HTTP status.
#[must_use]
pub fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        _ if error.is_server_error() => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    }
}

/// Returns (error code, generic message) for a status.
fn describe(status: StatusCode) -> (&'static str, &'static str) {
    match status {
        StatusCode::BAD_REQUEST => ("invalid_request", "Invalid request"),
        StatusCode::UNAUTHORIZED => ("unauthenticated", "Unauthenticated"),
        s if s.is_server_error() => ("server_error", "Internal server error"),
        _ => ("error", "Request failed"),
    }
}

// =============================================================================
// Tests
// =============================================================================
