//! The places a GitHub token can live, behind one read/write shape.

use std::fmt;
use std::sync::Arc;

use crate::model::{Credential, StorageType};
use crate::store::{ConfigFileStore, Secret, SecretStore, StoreError, TOKEN_KEY, TokenFile};

/// A credential backend. [`TokenManager`](crate::TokenManager) holds these in
/// priority order and takes the first one that yields a token.
pub enum CredentialBackend {
    /// Owner-only JSON token file.
    ConfigFile(ConfigFileStore),

    /// OS credential store entry `(service, github_token)`.
    Keychain {
        store: Arc<dyn SecretStore>,
        service: String,
    },

    /// Read-only environment variable.
    Environment { var: String },
}

impl CredentialBackend {
    pub fn keychain(store: Arc<dyn SecretStore>, service: impl Into<String>) -> Self {
        Self::Keychain {
            store,
            service: service.into(),
        }
    }

    pub fn environment(var: impl Into<String>) -> Self {
        Self::Environment { var: var.into() }
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::ConfigFile(_) => StorageType::ConfigFile,
            Self::Keychain { .. } => StorageType::Keychain,
            Self::Environment { .. } => StorageType::Environment,
        }
    }

    /// Read the credential held by this backend, if any.
    pub async fn read(&self) -> Result<Option<Credential>, StoreError> {
        match self {
            Self::ConfigFile(file) => Ok(file
                .read()?
                .map(TokenFile::into_credential)
                .filter(|c| !c.token.is_blank())),

            Self::Keychain { store, .. } => Ok(store
                .get(TOKEN_KEY)
                .await?
                .filter(|s| !s.is_blank())
                .map(|s| Credential::from_raw(s, StorageType::Keychain))),

            Self::Environment { var } => match std::env::var(var) {
                Ok(value) if value.trim().is_empty() => Ok(None),
                Ok(value) => Ok(Some(Credential::from_raw(
                    Secret::new(value.trim()),
                    StorageType::Environment,
                ))),
                Err(std::env::VarError::NotPresent) => Ok(None),
                Err(std::env::VarError::NotUnicode(_)) => Err(StoreError::BackendError {
                    message: format!("{} is not valid unicode", var),
                }),
            },
        }
    }

    /// Replace whatever this backend holds with `credential`.
    pub async fn write(&self, credential: &Credential) -> Result<(), StoreError> {
        match self {
            Self::ConfigFile(file) => file.write(&TokenFile::from_credential(credential)),
            Self::Keychain { store, .. } => store.set(TOKEN_KEY, &credential.token).await,
            Self::Environment { .. } => Err(StoreError::ReadOnly {
                backend: self.to_string(),
            }),
        }
    }

    /// Remove the token. Removing an absent token is not an error.
    pub async fn remove(&self) -> Result<(), StoreError> {
        match self {
            Self::ConfigFile(file) => file.delete(),
            Self::Keychain { store, .. } => store.delete(TOKEN_KEY).await,
            Self::Environment { .. } => Err(StoreError::ReadOnly {
                backend: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for CredentialBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigFile(file) => write!(f, "config file {}", file.path().display()),
            Self::Keychain { service, .. } => write!(f, "OS keychain ({})", service),
            Self::Environment { var } => write!(f, "environment variable {}", var),
        }
    }
}

impl fmt::Debug for CredentialBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBackend({})", self)
    }
}
