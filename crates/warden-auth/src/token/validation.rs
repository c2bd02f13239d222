//! Claims validation.
//!
//! Time checks run first, in a fixed order (expiry, not-before,
//! issued-at), then the caller's [`Expectation`]s in the order given.
//! All comparisons are done on whole seconds and the leeway widens every
//! window in both directions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use super::claims::{Audience, RawClaims, RequiredClaims, StandardClaims, is_zero_value};
use super::codec::VerifiedToken;
use crate::error::AuthError;

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> OffsetDateTime;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The system clock, truncated to whole seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        now.replace_nanosecond(0).unwrap_or(now)
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Returns a shared handle to the system clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

// ============================================================================
// Expected values
// ============================================================================

/// Expected standard claim values. Empty fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected {
    /// Expected `iss`.
    pub issuer: String,
    /// Expected `sub`.
    pub subject: String,
    /// Audience values that must all be present in `aud`.
    pub audience: Audience,
    /// Expected `jti`.
    pub id: String,
}

/// A check applied to a verified token after the time checks pass.
#[derive(Debug, Clone)]
pub enum Expectation {
    /// All non-empty fields must match.
    Expected(Expected),
    /// `iss` must equal the value.
    Issuer(String),
    /// `sub` must equal the value.
    Subject(String),
    /// `aud` must contain all the values.
    Audience(Audience),
    /// `jti` must equal the value.
    Id(String),
    /// The named payload fields must be present and non-zero.
    Required(&'static [&'static str]),
    /// The token must be a refresh token (carry an origin ID).
    RefreshToken,
}

impl Expectation {
    /// Builds the required-field check for a claims type.
    #[must_use]
    pub fn required<T: RequiredClaims>() -> Self {
        Self::Required(T::REQUIRED)
    }

    /// Applies this expectation to a verified token.
    ///
    /// # Errors
    ///
    /// Returns `Unexpected` for a mismatching claim, `MissingKey` for an
    /// absent required field and `Unauthenticated` for a non-refresh token
    /// where a refresh token is expected.
    pub fn check(&self, token: &VerifiedToken) -> Result<(), AuthError> {
        let claims = &token.standard_claims;
        match self {
            Self::Expected(expected) => check_expected(claims, expected),
            Self::Issuer(issuer) => check_equal("iss", &claims.issuer, issuer),
            Self::Subject(subject) => check_equal("sub", &claims.subject, subject),
            Self::Audience(audience) => check_audience(claims, audience),
            Self::Id(id) => check_equal("jti", &claims.id, id),
            Self::Required(fields) => check_required(&token.payload, fields),
            Self::RefreshToken => {
                if claims.origin_id.is_empty() {
                    Err(AuthError::unauthenticated("expected a refresh token"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn check_equal(field: &str, actual: &str, expected: &str) -> Result<(), AuthError> {
    if expected.is_empty() || actual == expected {
        Ok(())
    } else {
        Err(AuthError::unexpected(field))
    }
}

fn check_audience(claims: &StandardClaims, expected: &Audience) -> Result<(), AuthError> {
    if claims.audience.contains_all(expected) {
        Ok(())
    } else {
        Err(AuthError::unexpected("aud"))
    }
}

fn check_expected(claims: &StandardClaims, expected: &Expected) -> Result<(), AuthError> {
    check_equal("iss", &claims.issuer, &expected.issuer)?;
    check_equal("sub", &claims.subject, &expected.subject)?;
    check_audience(claims, &expected.audience)?;
    check_equal("jti", &claims.id, &expected.id)
}

fn check_required(payload: &[u8], fields: &[&str]) -> Result<(), AuthError> {
    if fields.is_empty() {
        return Ok(());
    }

    let map: RawClaims = serde_json::from_slice(payload)
        .map_err(|e| AuthError::token_form(format!("payload: {e}")))?;
    for field in fields {
        match map.get(*field) {
            Some(value) if !is_zero_value(value) => {}
            _ => return Err(AuthError::missing_key(*field)),
        }
    }
    Ok(())
}

// ============================================================================
// Time validation
// ============================================================================

/// Checks the time window of standard claims.
///
/// - `now - leeway > exp` fails with `Expired`
/// - `now + leeway < nbf` fails with `NotValidYet`
/// - `iat > now + leeway` fails with `IssuedInTheFuture`
///
/// # Errors
///
/// Returns the first violated window, in the order above.
pub fn validate_time(
    claims: &StandardClaims,
    now: OffsetDateTime,
    leeway: Duration,
) -> Result<(), AuthError> {
    let now = now.unix_timestamp();
    let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

    if let Some(exp) = claims.expiry {
        if now.saturating_sub(leeway) > exp.unix_timestamp() {
            return Err(AuthError::Expired);
        }
    }

    if let Some(nbf) = claims.not_before {
        if now.saturating_add(leeway) < nbf.unix_timestamp() {
            return Err(AuthError::NotValidYet);
        }
    }

    if let Some(iat) = claims.issued_at {
        if iat.unix_timestamp() > now.saturating_add(leeway) {
            return Err(AuthError::IssuedInTheFuture);
        }
    }

    Ok(())
}

/// Runs the time checks followed by equality checks against `expected`.
///
/// # Errors
///
/// Returns the first failing check.
pub fn validate(
    claims: &StandardClaims,
    expected: &Expected,
    now: OffsetDateTime,
    leeway: Duration,
) -> Result<(), AuthError> {
    validate_time(claims, now, leeway)?;
    check_expected(claims, expected)
}
