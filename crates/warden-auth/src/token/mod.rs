//! Token signing, verification and claims validation.
//!
//! This module provides:
//!
//! - Signing keys addressed by key ID, for HMAC, RSA, ECDSA and EdDSA
//! - Optional AES-256-GCM payload encryption
//! - The compact token codec
//! - Time-window and expected-value validation of claims
//! - The token service ([`Signer`], [`Verifier`])

pub mod algorithm;
pub mod claims;
pub mod codec;
pub mod encryption;
pub mod key;
pub mod service;
pub mod validation;

pub use algorithm::Algorithm;
pub use claims::{Audience, Claims, RawClaims, RequiredClaims, StandardClaims};
pub use codec::{Header, VerifiedToken, sign, verify};
pub use encryption::PayloadCipher;
pub use key::{Key, KeySet, generate_ec_pem, generate_rsa_pem, generate_secret};
pub use service::{Signer, TokenPair, TokenValidator, Verified, Verifier};
pub use validation::{
    Clock, Expectation, Expected, FixedClock, SharedClock, SystemClock, system_clock, validate,
    validate_time,
};
