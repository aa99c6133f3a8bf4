//! In-memory secret storage implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Secret, SecretStore, StoreError};

/// In-memory credential store for tests and keyring-less hosts.
///
/// Nothing persists past process exit.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store already holding a token under `key`.
    pub fn with_token(key: &str, token: impl Into<String>) -> Self {
        let mut data = HashMap::new();
        data.insert(key.to_string(), Secret::new(token));
        Self {
            data: RwLock::new(data),
        }
    }

    fn poisoned(e: impl std::fmt::Display) -> StoreError {
        StoreError::BackendError {
            message: format!("lock poisoned: {}", e),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.data.read().map(|d| d.len()).unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("keys_count", &count)
            .finish()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let data = self.data.read().map_err(Self::poisoned)?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(Self::poisoned)?;
        data.insert(key.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(Self::poisoned)?;
        data.remove(key);
        Ok(())
    }
}
