//! Authenticated encryption of token payloads.
//!
//! Encrypted payloads are laid out as `nonce || ciphertext || tag` and then
//! base64url-encoded into the payload segment. The signature is computed over
//! that encrypted segment, so a token is always verified before it is
//! decrypted.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::error::AuthError;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256-GCM (256 bits).
pub const KEY_SIZE: usize = 32;

/// AES-256-GCM transform applied to token payloads.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: Aes256Gcm,
    additional_data: Vec<u8>,
}

impl PayloadCipher {
    /// Value of the `enc` header field for encrypted tokens.
    pub const NAME: &'static str = "A256GCM";

    /// Creates a cipher from a 32-byte key and optional additional data.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key is not exactly 32 bytes.
    pub fn new(key: &[u8], additional_data: &[u8]) -> Result<Self, AuthError> {
        if key.len() != KEY_SIZE {
            return Err(AuthError::invalid_key(format!(
                "encryption key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AuthError::invalid_key(format!("failed to create cipher: {e}")))?;

        Ok(Self {
            cipher,
            additional_data: additional_data.to_vec(),
        })
    }

    /// Generates a random 32-byte encryption key.
    #[must_use]
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    /// Encrypts a payload, prepending a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the AEAD primitive fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &self.additional_data,
                },
            )
            .map_err(|e| AuthError::internal(format!("payload encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a payload produced by [`PayloadCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `Decrypt` if the data is truncated or the tag does not verify.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        if data.len() < NONCE_SIZE {
            return Err(AuthError::decrypt("ciphertext shorter than nonce"));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce_bytes: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| AuthError::decrypt("ciphertext shorter than nonce"))?;
        let nonce = Nonce::from(nonce_bytes);

        self.cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: &self.additional_data,
                },
            )
            .map_err(|e| AuthError::decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("enc", &Self::NAME)
            .finish_non_exhaustive()
    }
}
