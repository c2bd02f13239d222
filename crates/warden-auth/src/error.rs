//! Authentication error types.
//!
//! Every failure produced by the codec, the claims validator, the blocklist,
//! the token service and the sign-in orchestrator is an [`AuthError`]. The
//! variants are kinds, not wrappers: callers match on them to decide between
//! "reissue a token", "reject as an attack" and "fix the deployment".

use std::fmt;

/// Errors that can occur while issuing, verifying or revoking tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The compact token is malformed (segment count, base64, JSON).
    #[error("Malformed token: {message}")]
    TokenForm {
        /// Description of what is malformed.
        message: String,
    },

    /// The header algorithm or key ID does not match any usable key.
    #[error("Token algorithm mismatch: {message}")]
    TokenAlg {
        /// Description of the mismatch.
        message: String,
    },

    /// The signature or MAC does not verify.
    #[error("Token signature mismatch")]
    TokenSignature,

    /// The payload could not be decrypted.
    #[error("Token payload decryption failed: {message}")]
    Decrypt {
        /// Description of the decryption failure.
        message: String,
    },

    /// No token was presented.
    #[error("Token is missing")]
    Missing,

    /// A required claim field is absent or zero-valued.
    #[error("Required claim is missing: {field}")]
    MissingKey {
        /// Name of the missing field.
        field: String,
    },

    /// A claim does not match its expected value.
    #[error("Claim does not match the expected value: {field}")]
    Unexpected {
        /// Name of the mismatching claim.
        field: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token's not-before time has not been reached.
    #[error("Token not valid yet")]
    NotValidYet,

    /// The token claims to be issued in the future.
    #[error("Token issued in the future")]
    IssuedInTheFuture,

    /// The token has been revoked through the blocklist.
    #[error("Token is blocked")]
    Blocked,

    /// Claims or key material are unusable.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key or claims are unusable.
        message: String,
    },

    /// The caller could not be authenticated.
    #[error("Unauthenticated: {message}")]
    Unauthenticated {
        /// Description of why authentication failed.
        message: String,
    },

    /// The request or a construction argument is invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The service is misconfigured (no provider, refresh disabled, ...).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// A blocklist backend operation failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `TokenForm` error.
    #[must_use]
    pub fn token_form(message: impl Into<String>) -> Self {
        Self::TokenForm {
            message: message.into(),
        }
    }

    /// Creates a new `TokenAlg` error.
    #[must_use]
    pub fn token_alg(message: impl Into<String>) -> Self {
        Self::TokenAlg {
            message: message.into(),
        }
    }

    /// Creates a new `Decrypt` error.
    #[must_use]
    pub fn decrypt(message: impl Into<String>) -> Self {
        Self::Decrypt {
            message: message.into(),
        }
    }

    /// Creates a new `MissingKey` error.
    #[must_use]
    pub fn missing_key(field: impl Into<String>) -> Self {
        Self::MissingKey {
            field: field.into(),
        }
    }

    /// Creates a new `Unexpected` error.
    #[must_use]
    pub fn unexpected(field: impl Into<String>) -> Self {
        Self::Unexpected {
            field: field.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthenticated` error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for structural and cryptographic token failures.
    ///
    /// These are never retried: they indicate tampering or misconfiguration.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenForm { .. }
                | Self::TokenAlg { .. }
                | Self::TokenSignature
                | Self::Decrypt { .. }
                | Self::Missing
        )
    }

    /// Returns `true` for time-window violations.
    #[must_use]
    pub fn is_time_error(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::NotValidYet | Self::IssuedInTheFuture
        )
    }

    /// Returns `true` if the caller is at fault (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if the service is at fault (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Storage { .. } | Self::Internal { .. }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TokenForm { .. }
            | Self::TokenAlg { .. }
            | Self::TokenSignature
            | Self::Decrypt { .. }
            | Self::Missing => ErrorCategory::Token,
            Self::MissingKey { .. }
            | Self::Unexpected { .. }
            | Self::Expired
            | Self::NotValidYet
            | Self::IssuedInTheFuture => ErrorCategory::Validation,
            Self::Blocked | Self::Unauthenticated { .. } => ErrorCategory::Authentication,
            Self::InvalidArgument { .. } => ErrorCategory::Request,
            Self::InvalidKey { .. } | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::TokenSignature,
            ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::token_alg(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidEddsaKey
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::RsaFailedSigning => Self::invalid_key(err.to_string()),
            ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                Self::token_form(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

/// Categories of authentication errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed, mis-signed or undecryptable tokens.
    Token,
    /// Claims that failed time or field validation.
    Validation,
    /// Revoked tokens and rejected credentials.
    Authentication,
    /// Malformed requests.
    Request,
    /// Key or service misconfiguration.
    Configuration,
    /// Backend failures.
    Infrastructure,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Request => write!(f, "request"),
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::token_form("expected 3 segments, got 2");
        assert_eq!(err.to_string(), "Malformed token: expected 3 segments, got 2");

        let err = AuthError::missing_key("username");
        assert_eq!(err.to_string(), "Required claim is missing: username");

        assert_eq!(AuthError::Blocked.to_string(), "Token is blocked");
        assert_eq!(AuthError::TokenSignature.to_string(), "Token signature mismatch");
    }

    #[test]
    fn test_token_and_time_predicates() {
        assert!(AuthError::TokenSignature.is_token_error());
        assert!(AuthError::decrypt("bad tag").is_token_error());
        assert!(!AuthError::Expired.is_token_error());

        assert!(AuthError::Expired.is_time_error());
        assert!(AuthError::NotValidYet.is_time_error());
        assert!(AuthError::IssuedInTheFuture.is_time_error());
        assert!(!AuthError::Blocked.is_time_error());
    }

    #[test]
    fn test_client_server_split() {
        assert!(AuthError::Blocked.is_client_error());
        assert!(AuthError::invalid_argument("no body").is_client_error());
        assert!(AuthError::configuration("no provider").is_server_error());
        assert!(AuthError::storage("redis down").is_server_error());
        assert!(!AuthError::storage("redis down").is_client_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AuthError::TokenSignature.category(), ErrorCategory::Token);
        assert_eq!(AuthError::Expired.category(), ErrorCategory::Validation);
        assert_eq!(AuthError::Blocked.category(), ErrorCategory::Authentication);
        assert_eq!(
            AuthError::invalid_key("nil claims").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            AuthError::storage("timeout").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
    }
}
