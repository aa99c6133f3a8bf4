//! Resolution, verification and persistence of the GitHub token.
//!
//! [`TokenManager`] is the only place the rest of classpilot gets a token
//! from. It holds an ordered list of [`CredentialBackend`]s:
//!
//! 1. the owner-only config file
//! 2. the OS keychain
//! 3. the `GITHUB_TOKEN` environment variable
//!
//! and returns the first token found, with no merging between sources.
//! Reads never hit the network; verification happens once, when a token is
//! saved.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use classpilot_core::{Paths, Settings, TokenManager};
//!
//! let paths = Paths::user()?;
//! let settings = Settings::load(&paths)?;
//! let manager = TokenManager::from_settings(&settings, &paths)?;
//!
//! manager.save_token("ghp_example").await?;
//! let credential = manager.require_token().await?;
//! println!("using {}", credential.masked());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::backend::CredentialBackend;
use crate::classify::ApiError;
use crate::error::ClasspilotError;
use crate::model::{Credential, ExpiryStatus, StorageType, TokenType, is_standard_format, mask_token};
use crate::retry::RetryPolicy;
use crate::settings::{Paths, Settings};
use crate::store::{ConfigFileStore, Secret, StoreError, create_store};
use crate::verify::{GitHubVerifier, TokenVerifier, Verification, missing_scopes};

/// Error type for token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No backend holds a token.
    #[error("no GitHub token found (checked {consulted}); save one with `classpilot token set` or export {env_var}")]
    Missing { consulted: String, env_var: String },

    /// The supplied token was empty.
    #[error("token is empty")]
    Empty,

    /// GitHub rejected the token, or could not be reached to check it.
    #[error("token {masked} failed verification: {source}")]
    VerificationFailed {
        masked: String,
        #[source]
        source: ApiError,
    },

    /// The token is valid but lacks required scopes.
    #[error("token {masked} is missing required scopes: {}", .missing.join(", "))]
    InsufficientScope { masked: String, missing: Vec<String> },

    /// Reading or writing a backend failed.
    #[error("{backend}: {source}")]
    Storage {
        backend: String,
        #[source]
        source: StoreError,
    },

    /// No backend of the requested type is configured.
    #[error("no {storage} backend configured")]
    BackendUnavailable { storage: StorageType },
}

/// What one backend currently holds, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub storage_type: StorageType,
    pub description: String,
    /// Masked token, if the backend holds one.
    pub token: Option<String>,
    pub error: Option<String>,
    /// Whether this backend's token is the one `get_token` returns.
    pub active: bool,
}

pub struct TokenManager {
    backends: Vec<CredentialBackend>,
    verifier: Arc<dyn TokenVerifier>,
    required_scopes: Vec<String>,
    expiry_warning: chrono::Duration,
    default_storage: StorageType,
    retry: RetryPolicy,
    env_var: String,
}

impl TokenManager {
    /// Create a manager over `backends`, consulted in the given order.
    ///
    /// Scope requirements, expiry threshold and retry policy start at the
    /// [`Settings`] defaults.
    pub fn new(backends: Vec<CredentialBackend>, verifier: Arc<dyn TokenVerifier>) -> Self {
        let defaults = Settings::default();
        let env_var = backends
            .iter()
            .find_map(|b| match b {
                CredentialBackend::Environment { var } => Some(var.clone()),
                _ => None,
            })
            .unwrap_or_else(|| defaults.token_env_var.clone());

        Self {
            backends,
            verifier,
            required_scopes: defaults.required_scopes.clone(),
            expiry_warning: defaults.expiry_warning(),
            default_storage: defaults.default_storage,
            retry: defaults.retry,
            env_var,
        }
    }

    /// Build the standard config file → keychain → environment chain.
    pub fn from_settings(settings: &Settings, paths: &Paths) -> Result<Self, ClasspilotError> {
        let verifier = GitHubVerifier::new(settings.api_base_url.clone(), settings.request_timeout())?;
        let backends = vec![
            CredentialBackend::ConfigFile(ConfigFileStore::in_dir(&paths.config_dir)),
            CredentialBackend::keychain(
                Arc::from(create_store(&settings.keyring_service)),
                settings.keyring_service.clone(),
            ),
            CredentialBackend::environment(settings.token_env_var.clone()),
        ];

        Ok(Self::new(backends, Arc::new(verifier)).configure(settings))
    }

    /// Apply scope, expiry, storage and retry settings.
    pub fn configure(mut self, settings: &Settings) -> Self {
        self.required_scopes = settings.required_scopes.clone();
        self.expiry_warning = settings.expiry_warning();
        self.default_storage = settings.default_storage;
        self.retry = settings.retry.clone();
        self
    }

    pub fn with_required_scopes(mut self, scopes: Vec<String>) -> Self {
        self.required_scopes = scopes;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_storage(mut self, storage: StorageType) -> Self {
        self.default_storage = storage;
        self
    }

    pub fn backends(&self) -> &[CredentialBackend] {
        &self.backends
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn backend(&self, storage: StorageType) -> Result<&CredentialBackend, TokenError> {
        self.backends
            .iter()
            .find(|b| b.storage_type() == storage)
            .ok_or(TokenError::BackendUnavailable { storage })
    }

    /// Resolve the token from the first backend that has one.
    ///
    /// Unreadable backends are logged and skipped. Expiration is checked
    /// and logged but never hides a token.
    pub async fn get_token(&self) -> Option<Credential> {
        for backend in &self.backends {
            match backend.read().await {
                Ok(Some(credential)) => {
                    tracing::debug!(
                        backend = %backend,
                        token = %credential.masked(),
                        "resolved GitHub token"
                    );
                    self.check_expiration(&credential);
                    return Some(credential);
                }
                Ok(None) => {
                    tracing::debug!(backend = %backend, "no token");
                }
                Err(e) => {
                    tracing::warn!(backend = %backend, "could not read token: {}", e);
                }
            }
        }
        None
    }

    /// Like [`get_token`](Self::get_token), but absence is an error naming
    /// every backend consulted.
    pub async fn require_token(&self) -> Result<Credential, TokenError> {
        self.get_token().await.ok_or_else(|| TokenError::Missing {
            consulted: self
                .backends
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            env_var: self.env_var.clone(),
        })
    }

    /// Verify `raw` and persist it to the default backend.
    pub async fn save_token(&self, raw: &str) -> Result<Credential, TokenError> {
        self.save_token_to(raw, self.default_storage).await
    }

    /// Verify `raw`, check its scopes, and persist it to `storage`.
    ///
    /// Nothing is written unless verification and the scope check pass.
    pub async fn save_token_to(&self, raw: &str, storage: StorageType) -> Result<Credential, TokenError> {
        let token = Secret::new(raw.trim());
        if token.is_blank() {
            return Err(TokenError::Empty);
        }
        let masked = mask_token(token.expose());
        let backend = self.backend(storage)?;

        let token_type = TokenType::detect(token.expose());
        if !is_standard_format(token.expose()) {
            tracing::warn!(
                token = %masked,
                "token does not look like a GitHub personal access token (expected ghp_ or github_pat_ prefix)"
            );
        }

        tracing::debug!(token = %masked, %token_type, "verifying token");
        let verification = self
            .verify(&token)
            .await
            .map_err(|source| TokenError::VerificationFailed {
                masked: masked.clone(),
                source,
            })?;

        match &verification.scopes {
            Some(granted) => {
                let missing = missing_scopes(&self.required_scopes, granted);
                if !missing.is_empty() {
                    return Err(TokenError::InsufficientScope { masked, missing });
                }
            }
            None => {
                tracing::warn!(
                    token = %masked,
                    %token_type,
                    "GitHub did not report scopes for this token; skipping scope check"
                );
            }
        }

        let credential = Credential {
            token_type,
            scopes: verification.scopes.clone().unwrap_or_default(),
            login: Some(verification.login.clone()),
            account_id: Some(verification.account_id.clone()),
            expires_at: verification.expires_at,
            storage_type: storage,
            token,
        };

        backend
            .write(&credential)
            .await
            .map_err(|source| TokenError::Storage {
                backend: backend.to_string(),
                source,
            })?;

        tracing::info!(
            token = %masked,
            login = %verification.login,
            backend = %backend,
            "saved GitHub token"
        );
        self.check_expiration(&credential);

        Ok(credential)
    }

    /// Verify `token` and compare its scopes to the required set.
    ///
    /// Returns whether the token is usable and a message naming any missing
    /// scope.
    pub async fn validate_token_permissions(&self, token: &str) -> (bool, String) {
        let secret = Secret::new(token.trim());
        let masked = mask_token(secret.expose());

        let verification = match self.verify(&secret).await {
            Ok(v) => v,
            Err(e) => return (false, format!("token {} failed verification: {}", masked, e)),
        };

        match verification.scopes {
            None => (
                true,
                format!(
                    "token {} for {} does not report scopes ({} token); permissions not checked",
                    masked,
                    verification.login,
                    TokenType::detect(secret.expose())
                ),
            ),
            Some(granted) => {
                let missing = missing_scopes(&self.required_scopes, &granted);
                if missing.is_empty() {
                    (
                        true,
                        format!(
                            "token {} for {} has all required scopes ({})",
                            masked,
                            verification.login,
                            self.required_scopes.join(", ")
                        ),
                    )
                } else {
                    (
                        false,
                        format!(
                            "token {} is missing required scopes: {}",
                            masked,
                            missing.join(", ")
                        ),
                    )
                }
            }
        }
    }

    /// Delete the token held by `storage`.
    pub async fn remove_token(&self, storage: StorageType) -> Result<(), TokenError> {
        let backend = self.backend(storage)?;
        backend.remove().await.map_err(|source| TokenError::Storage {
            backend: backend.to_string(),
            source,
        })?;
        tracing::info!(backend = %backend, "removed GitHub token");
        Ok(())
    }

    /// Report what every backend holds, in priority order.
    pub async fn status(&self) -> Vec<BackendStatus> {
        let mut found_active = false;
        let mut report = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let (token, error) = match backend.read().await {
                Ok(Some(c)) => (Some(c.masked()), None),
                Ok(None) => (None, None),
                Err(e) => (None, Some(e.to_string())),
            };
            let active = token.is_some() && !found_active;
            found_active |= active;

            report.push(BackendStatus {
                storage_type: backend.storage_type(),
                description: backend.to_string(),
                token,
                error,
                active,
            });
        }
        report
    }

    async fn verify(&self, token: &Secret) -> Result<Verification, ApiError> {
        let verifier = &self.verifier;
        self.retry.with_retry(|| verifier.verify(token)).await
    }

    fn check_expiration(&self, credential: &Credential) {
        match credential.expiry_status(Utc::now(), self.expiry_warning) {
            ExpiryStatus::Expired { since } => {
                tracing::error!(
                    token = %credential.masked(),
                    expired_days_ago = since.num_days(),
                    "GitHub token has expired; generate a new one and save it again"
                );
            }
            ExpiryStatus::ExpiringSoon { remaining } => {
                tracing::warn!(
                    token = %credential.masked(),
                    days_left = remaining.num_days(),
                    "GitHub token expires soon"
                );
            }
            ExpiryStatus::Valid | ExpiryStatus::NonExpiring => {}
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("backends", &self.backends)
            .field("required_scopes", &self.required_scopes)
            .field("default_storage", &self.default_storage)
            .finish()
    }
}
