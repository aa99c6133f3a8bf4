//! Top-level error types for classpilot.

use thiserror::Error;

use crate::classify::{ApiError, ErrorKind};
use crate::settings::SettingsError;
use crate::store::StoreError;
use crate::token_manager::TokenError;

/// Top-level error type encompassing all classpilot core errors.
#[derive(Debug, Error)]
pub enum ClasspilotError {
    /// Error from credential storage primitives.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error resolving, verifying or saving the token.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Classified GitHub API failure.
    #[error("GitHub API error: {0}")]
    Api(#[from] ApiError),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Settings(#[from] SettingsError),
}

impl ClasspilotError {
    /// The API classification behind this error, if it came from a call to
    /// GitHub.
    pub fn api_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Api(e) => Some(e.kind),
            Self::Token(TokenError::VerificationFailed { source, .. }) => Some(source.kind),
            _ => None,
        }
    }
}
