//! Raw token extraction from requests.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, header, request::Parts};
use serde_json::Value;

use crate::AuthResult;
use crate::error::AuthError;

/// Largest JSON body buffered for [`Extractor::JsonField`].
pub const MAX_JSON_BODY: usize = 64 * 1024;

/// A place to look for the raw token.
///
/// Extractors are evaluated in order; the first one that yields a non-empty
/// value wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extractor {
    /// `<name>: Bearer <token>`, scheme case-insensitive.
    BearerHeader(String),
    /// `?<name>=<token>`.
    Query(String),
    /// A string field of an `application/json` body.
    JsonField(String),
}

impl Extractor {
    /// The `Authorization` bearer header, then the `token` query parameter.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::BearerHeader(header::AUTHORIZATION.as_str().to_string()),
            Self::Query("token".to_string()),
        ]
    }

    fn extract(&self, parts: &Parts, json: Option<&Value>) -> Option<String> {
        let token = match self {
            Self::BearerHeader(name) => parts
                .headers
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_string),
            Self::Query(name) => parts.uri.query().and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.into_owned())
            }),
            Self::JsonField(name) => json
                .and_then(|body| body.get(name))
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        token.filter(|token| !token.trim().is_empty())
    }
}

/// Parses `Bearer <token>` with a case-insensitive scheme.
#[must_use]
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Returns `true` for `application/json` (with or without parameters).
#[must_use]
pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Runs the extractors over a request.
///
/// The body is only buffered when a [`Extractor::JsonField`] is configured
/// and the request is JSON; the returned request carries the same body.
///
/// # Errors
///
/// Returns `InvalidArgument` if the body cannot be read.
pub async fn extract_token(
    extractors: &[Extractor],
    request: Request,
) -> AuthResult<(Option<String>, Request)> {
    let (parts, body) = request.into_parts();

    let wants_body = extractors
        .iter()
        .any(|extractor| matches!(extractor, Extractor::JsonField(_)));

    let (json, body) = if wants_body && is_json(&parts.headers) {
        let bytes = axum::body::to_bytes(body, MAX_JSON_BODY)
            .await
            .map_err(|e| AuthError::invalid_argument(format!("request body: {e}")))?;
        let json = serde_json::from_slice::<Value>(&bytes).ok();
        (json, Body::from(bytes))
    } else {
        (None, body)
    };

    let token = extractors
        .iter()
        .find_map(|extractor| extractor.extract(&parts, json.as_ref()));

    Ok((token, Request::from_parts(parts, body)))
}
