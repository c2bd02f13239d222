//! Encrypted cookie transport of the access token.

use std::fmt;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use cookie::{Cookie, CookieJar, Key, SameSite};

use crate::AuthResult;
use crate::config::CookieConfig;
use crate::error::AuthError;

/// Encrypts, decrypts and removes the access token cookie.
///
/// Values are sealed with the private jar of the `cookie` crate
/// (AES-256-GCM), so the client can neither read nor forge them.
#[derive(Clone)]
pub struct CookieCodec {
    name: String,
    secure: bool,
    max_age: Option<Duration>,
    key: Key,
}

impl CookieCodec {
    /// Creates the codec from configuration.
    ///
    /// `max_age` is the lifetime of the access token.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the key is missing or too short.
    pub fn new(config: &CookieConfig, max_age: Option<Duration>) -> AuthResult<Self> {
        let bytes = config.key_bytes()?;
        let key = Key::try_from(bytes.as_slice())
            .map_err(|e| AuthError::configuration(format!("cookie key: {e}")))?;
        Ok(Self {
            name: config.name.clone(),
            secure: config.secure,
            max_age,
            key,
        })
    }

    /// The cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the `Set-Cookie` value carrying `token`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the sealed cookie is not a valid header value.
    pub fn encode(&self, token: &str) -> AuthResult<HeaderValue> {
        let mut builder = Cookie::build((self.name.clone(), token.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure);
        if let Some(max_age) = self.max_age {
            let secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            builder = builder.max_age(cookie::time::Duration::seconds(secs));
        }

        let mut jar = CookieJar::new();
        jar.private_mut(&self.key).add(builder.build());
        let sealed = jar
            .get(&self.name)
            .ok_or_else(|| AuthError::internal("sealed cookie missing from jar"))?;

        header_value(&sealed.encoded().to_string())
    }

    /// Finds and decrypts the token in the request's `Cookie` headers.
    ///
    /// A cookie that fails to decrypt is treated as absent.
    #[must_use]
    pub fn decode(&self, headers: &HeaderMap) -> Option<String> {
        let mut jar = CookieJar::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for cookie in Cookie::split_parse_encoded(value.to_string()).flatten() {
                jar.add_original(cookie.into_owned());
            }
        }

        let cookie = jar.private(&self.key).get(&self.name);
        if cookie.is_none() && jar.get(&self.name).is_some() {
            tracing::debug!(cookie = %self.name, "auth cookie failed to decrypt");
        }
        cookie
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    }

    /// Builds the `Set-Cookie` value that removes the cookie.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the cookie is not a valid header value.
    pub fn removal(&self) -> AuthResult<HeaderValue> {
        let mut cookie = Cookie::build((self.name.clone(), ""))
            .path("/")
            .http_only(true)
            .build();
        cookie.make_removal();
        header_value(&cookie.to_string())
    }
}

impl fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieCodec")
            .field("name", &self.name)
            .field("secure", &self.secure)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> AuthResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AuthError::internal(format!("cookie header: {e}")))
}
