//! # warden-auth
//!
//! Token-based authentication for axum services.
//!
//! This crate provides:
//! - A JWT codec with HMAC, RSA, RSA-PSS, ECDSA and EdDSA signatures, key
//!   IDs and optional AES-256-GCM payload encryption
//! - Claims validation with leeway and caller expectations
//! - Token revocation through a pluggable blocklist
//! - A signer/verifier service with access/refresh token pairs
//! - A sign-in, refresh and sign-out orchestrator over pluggable user
//!   providers, with axum handlers and middleware
//!
//! ## Modules
//!
//! - [`config`] - Key, cookie and header configuration
//! - [`token`] - Codec, claims, validation and the token service
//! - [`blocklist`] - Revoked-token storage and the in-memory backend
//! - [`middleware`] - Token extraction and verification middleware
//! - [`session`] - The [`Auth`](session::Auth) orchestrator and its handlers
//! - [`error`] - The error taxonomy
//!
//! ## Example
//!
//! ```ignore
//! use warden_auth::prelude::*;
//!
//! let auth = Auth::<Account>::builder(AuthConfig::generate()?)
//!     .provider(Accounts::new(db))
//!     .build()?;
//! let pair = auth.signin("alice", "secret").await?;
//! let (account, claims) = auth.verify(&pair.access_token).await?;
//! ```

pub mod blocklist;
pub mod config;
pub mod error;
pub mod middleware;
pub mod session;
pub mod token;

pub use blocklist::{Blocklist, MemoryBlocklist};
pub use config::{ACCESS_KID, AuthConfig, ConfigError, REFRESH_KID};
pub use error::{AuthError, ErrorCategory};
pub use session::{Auth, AuthBuilder, AuthUser};
pub use token::{Signer, TokenPair, Verifier};

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use warden_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::blocklist::{Blocklist, MemoryBlocklist, SweepHandle};
    pub use crate::config::{ACCESS_KID, AuthConfig, ConfigError, CookieConfig, KeyConfig, REFRESH_KID};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::middleware::{Extractor, Logout, token_middleware};
    pub use crate::session::{
        Auth, AuthBuilder, AuthUser, ClaimsProvider, DefaultErrorHandler, ErrorHandler, Provider,
        Transformer, User, VerifyState, auth_routes, verify_middleware,
    };
    pub use crate::token::{
        Algorithm, Claims, Expectation, Key, KeySet, RawClaims, Signer, StandardClaims, TokenPair,
        Verified, VerifiedToken, Verifier,
    };
}
