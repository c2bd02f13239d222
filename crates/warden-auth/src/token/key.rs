//! Signing keys and key sets.
//!
//! A [`Key`] binds a key ID to one algorithm, its signing and verification
//! material, an optional default token lifetime and an optional payload
//! cipher. A [`KeySet`] maps key IDs to keys and is immutable once built.
//!
//! ## Example
//!
//! ```ignore
//! use warden_auth::token::{Algorithm, Key, KeySet};
//!
//! let access = Key::hmac("access", Algorithm::HS256, b"a very long shared secret")?
//!     .with_max_age(Duration::from_secs(15 * 60));
//! let keys = KeySet::new([access])?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey};
use p384::SecretKey as EcSecretKey;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
// p384 and rsa share the pkcs8 traits
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};

use super::algorithm::Algorithm;
use super::encryption::PayloadCipher;
use crate::error::AuthError;

/// Minimum HMAC secret length accepted by [`Key::hmac`].
pub const MIN_HMAC_SECRET_LEN: usize = 32;

/// RSA modulus size used by [`generate_rsa_pem`].
const RSA_BITS: usize = 2048;

// ============================================================================
// Key
// ============================================================================

/// A signing/verification key addressed by its key ID.
#[derive(Clone)]
pub struct Key {
    kid: String,
    algorithm: Algorithm,
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    max_age: Option<Duration>,
    cipher: Option<PayloadCipher>,
}

impl Key {
    /// Creates an HMAC key from a shared secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the algorithm is not HMAC or the secret is
    /// shorter than [`MIN_HMAC_SECRET_LEN`].
    pub fn hmac(
        kid: impl Into<String>,
        algorithm: Algorithm,
        secret: &[u8],
    ) -> Result<Self, AuthError> {
        if !algorithm.is_hmac() {
            return Err(AuthError::invalid_key(format!(
                "algorithm {algorithm} is not HMAC-based"
            )));
        }
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(AuthError::invalid_key(format!(
                "HMAC secret must be at least {MIN_HMAC_SECRET_LEN} bytes"
            )));
        }

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key: Some(EncodingKey::from_secret(secret)),
            decoding_key: DecodingKey::from_secret(secret),
            max_age: None,
            cipher: None,
        })
    }

    /// Creates an asymmetric key from PEM-encoded material.
    ///
    /// Either half may be omitted: a key without a private half can only
    /// verify. For RSA and ES384 the public half is derived from the private
    /// one when not given; ES256 and EdDSA need it explicitly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the PEM cannot be parsed for the algorithm or
    /// if no usable verification key can be built.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: Algorithm,
        private_pem: Option<&str>,
        public_pem: Option<&str>,
    ) -> Result<Self, AuthError> {
        if algorithm.is_hmac() {
            return Err(AuthError::invalid_key(format!(
                "algorithm {algorithm} takes a shared secret, not PEM"
            )));
        }

        let encoding_key = private_pem
            .map(|pem| encoding_key_from_pem(algorithm, pem))
            .transpose()?;

        let public_pem = match (public_pem, private_pem) {
            (Some(public), _) => public.to_string(),
            (None, Some(private)) => derive_public_pem(algorithm, private)?,
            (None, None) => {
                return Err(AuthError::invalid_key("key has neither private nor public PEM"));
            }
        };
        let decoding_key = decoding_key_from_pem(algorithm, &public_pem)?;

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            max_age: None,
            cipher: None,
        })
    }

    /// Generates a fresh RSA key (2048-bit) for an RS*/PS* algorithm.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the algorithm is not RSA-based or generation fails.
    pub fn generate_rsa(kid: impl Into<String>, algorithm: Algorithm) -> Result<Self, AuthError> {
        if !algorithm.is_rsa() {
            return Err(AuthError::invalid_key(format!(
                "algorithm {algorithm} is not RSA-based"
            )));
        }
        let (private_pem, public_pem) = generate_rsa_pem()?;
        Self::from_pem(kid, algorithm, Some(&private_pem), Some(&public_pem))
    }

    /// Generates a fresh ECDSA P-384 key for ES384.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if generation fails.
    pub fn generate_ec(kid: impl Into<String>) -> Result<Self, AuthError> {
        let (private_pem, public_pem) = generate_ec_pem()?;
        Self::from_pem(kid, Algorithm::ES384, Some(&private_pem), Some(&public_pem))
    }

    /// Sets the default token lifetime for tokens signed with this key.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Enables payload encryption for tokens signed with this key.
    #[must_use]
    pub fn with_cipher(mut self, cipher: PayloadCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Returns the key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the signature algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns the default token lifetime, if any.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Returns the payload cipher, if encryption is enabled.
    #[must_use]
    pub fn cipher(&self) -> Option<&PayloadCipher> {
        self.cipher.as_ref()
    }

    /// Returns `true` if the key holds private material.
    #[must_use]
    pub fn can_sign(&self) -> bool {
        self.encoding_key.is_some()
    }

    pub(crate) fn encoding_key(&self) -> Result<&EncodingKey, AuthError> {
        self.encoding_key
            .as_ref()
            .ok_or_else(|| AuthError::invalid_key(format!("key {} cannot sign", self.kid)))
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.can_sign())
            .field("max_age", &self.max_age)
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}

fn encoding_key_from_pem(algorithm: Algorithm, pem: &str) -> Result<EncodingKey, AuthError> {
    let key = if algorithm.is_rsa() {
        EncodingKey::from_rsa_pem(pem.as_bytes())
    } else if algorithm.is_ec() {
        EncodingKey::from_ec_pem(pem.as_bytes())
    } else {
        EncodingKey::from_ed_pem(pem.as_bytes())
    };
    key.map_err(|e| AuthError::invalid_key(format!("private key for {algorithm}: {e}")))
}

fn decoding_key_from_pem(algorithm: Algorithm, pem: &str) -> Result<DecodingKey, AuthError> {
    let key = if algorithm.is_rsa() {
        DecodingKey::from_rsa_pem(pem.as_bytes())
    } else if algorithm.is_ec() {
        DecodingKey::from_ec_pem(pem.as_bytes())
    } else {
        DecodingKey::from_ed_pem(pem.as_bytes())
    };
    key.map_err(|e| AuthError::invalid_key(format!("public key for {algorithm}: {e}")))
}

fn derive_public_pem(algorithm: Algorithm, private_pem: &str) -> Result<String, AuthError> {
    if algorithm.is_rsa() {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| AuthError::invalid_key(e.to_string()))?;
        return private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::invalid_key(e.to_string()));
    }

    if algorithm == Algorithm::ES384 {
        let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
            .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
            .map_err(|e| AuthError::invalid_key(e.to_string()))?;
        return secret_key
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::invalid_key(e.to_string()));
    }

    Err(AuthError::invalid_key(format!(
        "public key PEM is required for {algorithm}"
    )))
}

// ============================================================================
// Key generation
// ============================================================================

/// Generates a 2048-bit RSA key pair as `(private PKCS#8 PEM, public SPKI PEM)`.
///
/// # Errors
///
/// Returns `InvalidKey` if generation or encoding fails.
pub fn generate_rsa_pem() -> Result<(String, String), AuthError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| AuthError::invalid_key(format!("RSA key generation failed: {e}")))?;

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AuthError::invalid_key(e.to_string()))?;
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AuthError::invalid_key(e.to_string()))?;

    Ok((private_pem.to_string(), public_pem))
}

/// Generates a P-384 key pair as `(private PKCS#8 PEM, public SPKI PEM)`.
///
/// # Errors
///
/// Returns `InvalidKey` if encoding fails.
pub fn generate_ec_pem() -> Result<(String, String), AuthError> {
    let secret_key = EcSecretKey::random(&mut OsRng);

    // jsonwebtoken only reads PKCS#8 for EC private keys
    let private_pem = secret_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AuthError::invalid_key(e.to_string()))?;
    let public_pem = secret_key
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AuthError::invalid_key(e.to_string()))?;

    Ok((private_pem.to_string(), public_pem))
}

/// Generates a random shared secret of `len` bytes.
#[must_use]
pub fn generate_secret(len: usize) -> Vec<u8> {
    let mut secret = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

// ============================================================================
// Key Set
// ============================================================================

/// Immutable mapping from key ID to key.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<Key>>,
}

impl KeySet {
    /// Builds a key set.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if two keys share a key ID.
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Result<Self, AuthError> {
        let mut map = HashMap::new();
        for key in keys {
            let kid = key.kid.clone();
            if map.insert(kid.clone(), Arc::new(key)).is_some() {
                return Err(AuthError::configuration(format!("duplicate key ID: {kid}")));
            }
        }
        Ok(Self { keys: map })
    }

    /// Looks up a key by ID.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Arc<Key>> {
        self.keys.get(kid)
    }

    /// Returns `true` if a key with this ID exists.
    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl From<Key> for KeySet {
    fn from(key: Key) -> Self {
        let mut keys = HashMap::with_capacity(1);
        keys.insert(key.kid.clone(), Arc::new(key));
        Self { keys }
    }
}
