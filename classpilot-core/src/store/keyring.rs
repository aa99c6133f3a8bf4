//! OS keyring-backed credential store.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// OS keyring-backed secret store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service (GNOME Keyring, KWallet), fronted by a kernel
///   keyutils cache
/// - Windows: Credential Manager
///
/// Entries are addressed as service `service_name`, user `key`, so the token
/// lives at (`classpilot`, `github_token`) with the default settings.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        match Entry::new(service_name, "__availability_check__") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    /// The service name entries are stored under.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn create_entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let entry = self.create_entry(key)?;

        match entry.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(e)) => {
                tracing::debug!("keyring access refused: {}", e);
                Err(StoreError::AccessDenied {
                    key: key.to_string(),
                })
            }
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::BackendError {
                message: format!("ambiguous keyring entry for key: {}", key),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        entry
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These avoid asserting on persistence: CI hosts often have no keyring daemon.

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("classpilot-test") {
            Ok(store) => assert_eq!(store.service_name(), "classpilot-test"),
            Err(StoreError::KeyringUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_store_roundtrip_when_available() {
        let store = match KeyringStore::try_new("classpilot-test-ops") {
            Ok(s) => s,
            Err(_) => return,
        };

        let key = format!(
            "test/{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );

        if store.set(&key, &Secret::new("ghp_keyring")).await.is_err() {
            eprintln!("keyring set failed, skipping");
            return;
        }

        // A separate store instance must see the value: nothing is cached per
        // instance.
        let reopened = KeyringStore::try_new("classpilot-test-ops").unwrap();
        if let Ok(Some(retrieved)) = reopened.get(&key).await {
            assert_eq!(retrieved.expose(), "ghp_keyring");
        }

        match store.get(&key).await {
            Ok(Some(retrieved)) => {
                assert_eq!(retrieved.expose(), "ghp_keyring");
                store.delete(&key).await.unwrap();
                assert!(store.get(&key).await.unwrap().is_none());
            }
            _ => {
                let _ = store.delete(&key).await;
            }
        }
    }
}
