//! Standard and custom claims.
//!
//! Custom claims are any serde type (or a raw JSON map). They are merged with
//! [`StandardClaims`] at the wire level: a token payload is one flat JSON
//! object holding both.

use serde::de::{DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::AuthError;

/// Raw claims as a JSON object.
pub type RawClaims = Map<String, Value>;

// ============================================================================
// Standard Claims
// ============================================================================

/// Registered JWT claims plus the refresh-token origin link.
///
/// Empty strings and `None` mean "unset" and are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardClaims {
    /// Issuer (`iss`).
    #[serde(rename = "iss", default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,

    /// Subject (`sub`).
    #[serde(rename = "sub", default, skip_serializing_if = "String::is_empty")]
    pub subject: String,

    /// Audience (`aud`), one or more values.
    #[serde(rename = "aud", default, skip_serializing_if = "Audience::is_empty")]
    pub audience: Audience,

    /// Expiration time (`exp`).
    #[serde(
        rename = "exp",
        default,
        with = "time::serde::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<OffsetDateTime>,

    /// Not-before time (`nbf`).
    #[serde(
        rename = "nbf",
        default,
        with = "time::serde::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_before: Option<OffsetDateTime>,

    /// Issued-at time (`iat`).
    #[serde(
        rename = "iat",
        default,
        with = "time::serde::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub issued_at: Option<OffsetDateTime>,

    /// Unique token ID (`jti`).
    #[serde(rename = "jti", default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// For refresh tokens, the `jti` of the access token minted alongside.
    #[serde(rename = "origin_jti", default, skip_serializing_if = "String::is_empty")]
    pub origin_id: String,
}

impl StandardClaims {
    /// Time left until expiry, measured from `now`.
    ///
    /// Returns `None` for tokens without an expiry.
    #[must_use]
    pub fn time_left(&self, now: OffsetDateTime) -> Option<time::Duration> {
        self.expiry.map(|exp| exp - now)
    }
}

/// Merges custom claims with standard claims into one payload object.
///
/// Standard fields that are set override same-named custom fields.
pub(crate) fn merge<C: Serialize + ?Sized>(
    claims: &C,
    standard: &StandardClaims,
) -> Result<RawClaims, AuthError> {
    let mut payload = match serde_json::to_value(claims) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(AuthError::invalid_key(format!(
                "claims must serialize to a JSON object, got {}",
                json_kind(&other)
            )));
        }
        Err(e) => return Err(AuthError::invalid_key(format!("unusable claims: {e}"))),
    };

    if let Value::Object(std_map) = serde_json::to_value(standard)
        .map_err(|e| AuthError::internal(format!("standard claims: {e}")))?
    {
        payload.extend(std_map);
    }

    Ok(payload)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Audience
// ============================================================================

/// The `aud` claim: a single string or an array of strings on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(Vec<String>);

impl Audience {
    /// Creates an audience from its values.
    #[must_use]
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    /// Returns `true` if no audience is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the audience values.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if every value of `expected` is present in `self`.
    #[must_use]
    pub fn contains_all(&self, expected: &Audience) -> bool {
        expected.0.iter().all(|aud| self.0.contains(aud))
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            values => values.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            One(String),
            Many(Vec<String>),
        }

        match Option::<Wire>::deserialize(deserializer)? {
            None => Ok(Self::default()),
            Some(Wire::One(value)) if value.is_empty() => Ok(Self::default()),
            Some(Wire::One(value)) => Ok(Self(vec![value])),
            Some(Wire::Many(values)) => Ok(Self(values)),
        }
    }
}

// ============================================================================
// Custom Claims
// ============================================================================

/// A caller-defined claims type carried by tokens.
///
/// `validate` runs after the payload has been decoded into the type; the
/// default accepts everything.
pub trait Claims: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Checks the decoded claims.
    ///
    /// # Errors
    ///
    /// Any error returned here fails verification as-is.
    fn validate(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

impl Claims for RawClaims {}

impl Claims for Value {}

/// Claims types that declare mandatory fields.
///
/// The list is a constant of the type, so the "required field" check needs
/// no per-request reflection. See
/// [`Expectation::required`](super::validation::Expectation::required).
pub trait RequiredClaims {
    /// JSON names of fields that must be present and non-zero.
    const REQUIRED: &'static [&'static str];
}

/// Decodes a raw payload into a claims type and runs its self-validation.
pub(crate) fn decode_claims<T: Claims>(payload: &[u8]) -> Result<T, AuthError> {
    let claims: T = serde_json::from_slice(payload)
        .map_err(|e| AuthError::token_form(format!("claims: {e}")))?;
    claims.validate()?;
    Ok(claims)
}

/// Returns `true` if a JSON value counts as "zero" for required-field checks.
pub(crate) fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        username: String,
    }

    #[test]
    fn test_standard_claims_wire_names() {
        let claims = StandardClaims {
            issuer: "warden".into(),
            subject: "alice".into(),
            audience: "api".into(),
            expiry: Some(datetime!(2030-01-01 0:00 UTC)),
            issued_at: Some(datetime!(2029-12-31 23:45 UTC)),
            id: "jti-1".into(),
            origin_id: "jti-0".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(
            value,
            json!({
                "iss": "warden",
                "sub": "alice",
                "aud": "api",
                "exp": 1893456000,
                "iat": 1893455100,
                "jti": "jti-1",
                "origin_jti": "jti-0"
            })
        );
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let value = serde_json::to_value(StandardClaims::default()).unwrap();
        assert_eq!(value, json!({}));
        let back: StandardClaims = serde_json::from_value(json!({})).unwrap();
        assert_eq!(back, StandardClaims::default());
    }

    #[test]
    fn test_audience_accepts_string_or_array() {
        let one: Audience = serde_json::from_value(json!("api")).unwrap();
        assert_eq!(one.values(), ["api"]);
        let many: Audience = serde_json::from_value(json!(["api", "admin"])).unwrap();
        assert_eq!(many.values().len(), 2);
        assert_eq!(serde_json::to_value(&many).unwrap(), json!(["api", "admin"]));
    }

    #[test]
    fn test_audience_subset() {
        let token = Audience::new(vec!["api".into(), "admin".into()]);
        assert!(token.contains_all(&Audience::from("api")));
        assert!(token.contains_all(&Audience::default()));
        assert!(!token.contains_all(&Audience::new(vec!["api".into(), "billing".into()])));
    }

    #[test]
    fn test_merge_keeps_custom_fields() {
        let standard = StandardClaims {
            id: "abc".into(),
            ..Default::default()
        };
        let merged = merge(&User { username: "alice".into() }, &standard).unwrap();
        assert_eq!(merged["username"], "alice");
        assert_eq!(merged["jti"], "abc");
    }

    #[test]
    fn test_merge_standard_overrides_custom() {
        let custom = json!({"sub": "from-custom", "role": "admin"});
        let standard = StandardClaims {
            subject: "from-standard".into(),
            ..Default::default()
        };
        let merged = merge(&custom, &standard).unwrap();
        assert_eq!(merged["sub"], "from-standard");
        assert_eq!(merged["role"], "admin");
    }

    #[test]
    fn test_merge_rejects_non_object_claims() {
        let err = merge(&Value::Null, &StandardClaims::default()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey { .. }));
        let err = merge(&42, &StandardClaims::default()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey { .. }));
    }

    #[test]
    fn test_zero_values() {
        assert!(is_zero_value(&json!(null)));
        assert!(is_zero_value(&json!("")));
        assert!(is_zero_value(&json!(0)));
        assert!(is_zero_value(&json!(false)));
        assert!(is_zero_value(&json!([])));
        assert!(!is_zero_value(&json!("x")));
        assert!(!is_zero_value(&json!(1)));
    }
}
