//! Secret storage primitives.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for OS credential store adapters
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`ConfigFileStore`] - Owner-only JSON token file
//! - [`create_store`] - Helper to select a credential store based on availability
//!
//! Adapters here are pure read/write primitives. Priority between them is
//! decided by [`TokenManager`](crate::token_manager::TokenManager).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod config_file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

pub use config_file::{ConfigFileStore, StoredToken, TokenFile};
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

/// Key under which the GitHub token lives in an OS credential store.
pub const TOKEN_KEY: &str = "github_token";

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose) and is
/// zeroed when dropped. Debug and Display implementations show `[REDACTED]`.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the secret was denied.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// I/O error reading or writing a token file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A stored file could not be parsed. Carries only the position, since
    /// serde messages quote the offending value.
    #[error("malformed {path}: {category} error at line {line} column {column}")]
    Malformed {
        path: String,
        category: &'static str,
        line: usize,
        column: usize,
    },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// The backend cannot be written to.
    #[error("{backend} is read-only")]
    ReadOnly { backend: String },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Describe a parse failure without the serde message.
    pub(crate) fn malformed(path: &std::path::Path, e: &serde_json::Error) -> Self {
        use serde_json::error::Category;

        Self::Malformed {
            path: path.display().to_string(),
            category: match e.classify() {
                Category::Io => "I/O",
                Category::Syntax => "syntax",
                Category::Data => "data",
                Category::Eof => "unexpected end of file",
            },
            line: e.line(),
            column: e.column(),
        }
    }
}

/// Abstraction over OS credential stores (keychain, secret service,
/// credential manager).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Create an OS credential store, falling back to memory when the platform
/// keyring is unavailable or the `keyring-store` feature is disabled.
pub fn create_store(service_name: &str) -> Box<dyn SecretStore> {
    #[cfg(feature = "keyring-store")]
    match KeyringStore::try_new(service_name) {
        Ok(store) => {
            tracing::debug!(service = service_name, "using OS keyring for token storage");
            return Box::new(store);
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to memory store. \
                 Tokens saved to the keychain will not persist across runs.",
                e
            );
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    tracing::warn!(
        service = service_name,
        "keyring-store feature not enabled, keychain backend is memory only"
    );

    Box::new(MemoryStore::new())
}
