//! HTTP middleware for token verification.
//!
//! This module provides:
//!
//! - Raw token extraction (bearer header, query parameter, JSON body field)
//! - The verification middleware for a [`Verifier`](crate::token::Verifier)
//! - Error responses that keep private error details server-side

pub mod error;
pub mod extract;
pub mod verify;

pub use error::{
    DefaultErrorHandler, ErrorBody, ErrorHandler, error_response, reject, status_for,
    status_response,
};
pub use extract::{Extractor, bearer_token, extract_token, is_json};
pub use verify::{Logout, token_middleware};
