//! Compact token encoding and decoding.
//!
//! A token is `base64url(header) . base64url(payload) . base64url(signature)`.
//! The signature covers the first two segments exactly as they were emitted,
//! so verification never re-serializes anything. When the signing key carries
//! a [`PayloadCipher`](super::PayloadCipher) the payload segment holds
//! ciphertext, and the header carries `"enc"`.
//!
//! Verification order is fixed: structure, key lookup and algorithm match,
//! signature, then decryption and claims decoding.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::claims::{self, Claims, StandardClaims};
use super::encryption::PayloadCipher;
use super::key::{Key, KeySet};
use crate::error::AuthError;

/// Value of the `typ` header field.
const TOKEN_TYPE: &str = "JWT";

/// Decoded token header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Signature algorithm name.
    pub alg: String,

    /// Token type, always `JWT` for tokens issued here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// ID of the key that signed the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Payload encryption, when the payload is ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
}

/// The result of a successful verification.
///
/// Holds the original token text, the header, the decrypted raw payload and
/// the standard claims decoded from it.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// The token exactly as presented.
    pub token: String,
    /// Decoded header.
    pub header: Header,
    /// Raw (decrypted) JSON payload.
    pub payload: Vec<u8>,
    /// Standard claims decoded from the payload.
    pub standard_claims: StandardClaims,
}

impl VerifiedToken {
    /// Decodes the payload into a custom claims type and runs its validation.
    ///
    /// # Errors
    ///
    /// Returns `TokenForm` if the payload does not fit the type, or whatever
    /// [`Claims::validate`] returns.
    pub fn claims<T: Claims>(&self) -> Result<T, AuthError> {
        claims::decode_claims(&self.payload)
    }

    /// Returns the ID of the key that signed this token.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.header.kid.as_deref().unwrap_or_default()
    }
}

/// Signs custom claims merged with standard claims.
///
/// Unset standard fields are defaulted from `now`: `iat = now`,
/// `exp = now + key.max_age` (when the key has one) and a random UUID `jti`.
///
/// # Errors
///
/// Returns `InvalidKey` for claims that are not a JSON object or a key that
/// cannot sign, and the mapped signing error if the primitive fails.
pub fn sign<C: Serialize + ?Sized>(
    claims: &C,
    mut standard: StandardClaims,
    key: &Key,
    now: OffsetDateTime,
) -> Result<String, AuthError> {
    let encoding_key = key.encoding_key()?;

    if standard.issued_at.is_none() {
        standard.issued_at = Some(now);
    }
    if standard.expiry.is_none() {
        standard.expiry = key.max_age().map(|max_age| now + max_age);
    }
    if standard.id.is_empty() {
        standard.id = uuid::Uuid::new_v4().to_string();
    }

    let payload = claims::merge(claims, &standard)?;
    let mut payload = serde_json::to_vec(&payload)
        .map_err(|e| AuthError::internal(format!("payload serialization: {e}")))?;

    let mut header = Header {
        alg: key.algorithm().as_str().to_string(),
        typ: Some(TOKEN_TYPE.to_string()),
        kid: Some(key.kid().to_string()),
        enc: None,
    };

    if let Some(cipher) = key.cipher() {
        payload = cipher.encrypt(&payload)?;
        header.enc = Some(PayloadCipher::NAME.to_string());
    }

    let header = serde_json::to_vec(&header)
        .map_err(|e| AuthError::internal(format!("header serialization: {e}")))?;

    let message = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = jsonwebtoken::crypto::sign(
        message.as_bytes(),
        encoding_key,
        key.algorithm().to_jwt_algorithm(),
    )?;

    Ok(format!("{message}.{signature}"))
}

/// Verifies a compact token against a key set.
///
/// This checks structure and signature, decrypts and decodes claims. It does
/// not check time windows or expectations; see
/// [`Verifier`](crate::token::Verifier) for the full pipeline.
///
/// # Errors
///
/// - `Missing` for an empty token
/// - `TokenForm` for malformed structure, base64 or JSON
/// - `TokenAlg` for an unknown `kid` or an `alg` other than the key's
/// - `TokenSignature` when the signature does not verify
/// - `Decrypt` when the payload cannot be decrypted
pub fn verify(token: &str, keys: &KeySet) -> Result<VerifiedToken, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Missing);
    }

    let segments: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        return Err(AuthError::token_form(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| AuthError::token_form(format!("header: {e}")))?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|e| AuthError::token_form(format!("header: {e}")))?;

    let kid = header
        .kid
        .as_deref()
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| AuthError::token_alg("header has no key ID"))?;
    let key = keys
        .get(kid)
        .ok_or_else(|| AuthError::token_alg(format!("unknown key ID: {kid}")))?;

    if header.alg != key.algorithm().as_str() {
        return Err(AuthError::token_alg(format!(
            "header algorithm {} does not match key {kid} ({})",
            header.alg,
            key.algorithm()
        )));
    }

    let message_len = header_b64.len() + 1 + payload_b64.len();
    let message = &token[..message_len];
    let valid = jsonwebtoken::crypto::verify(
        signature_b64,
        message.as_bytes(),
        key.decoding_key(),
        key.algorithm().to_jwt_algorithm(),
    )
    .unwrap_or(false);
    if !valid {
        return Err(AuthError::TokenSignature);
    }

    let raw_payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| AuthError::token_form(format!("payload: {e}")))?;

    let payload = match (header.enc.as_deref(), key.cipher()) {
        (None, None) => raw_payload,
        (Some(PayloadCipher::NAME), Some(cipher)) => cipher.decrypt(&raw_payload)?,
        (Some(enc), Some(_)) => {
            return Err(AuthError::decrypt(format!("unsupported encryption: {enc}")));
        }
        (Some(_), None) => {
            return Err(AuthError::decrypt(format!("key {kid} has no decryption key")));
        }
        (None, Some(_)) => {
            return Err(AuthError::decrypt(format!(
                "key {kid} requires an encrypted payload"
            )));
        }
    };

    let standard_claims: StandardClaims = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::token_form(format!("payload: {e}")))?;

    Ok(VerifiedToken {
        token: token.to_string(),
        header,
        payload,
        standard_claims,
    })
}
