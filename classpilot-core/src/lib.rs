//! # classpilot core
//!
//! Credential resolution and resilient GitHub API access for classpilot.
//!
//! This crate provides:
//! - [`TokenManager`] - resolves the GitHub token from the config file, the OS
//!   keychain, or the environment (in that order) and verifies, scope-checks
//!   and persists new tokens
//! - [`RetryPolicy`] - runs API operations with exponential backoff for rate
//!   limits and network failures, failing fast on everything else
//! - [`ApiClient`] - the authenticated, retrying client every feature uses
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use classpilot_core::{ApiClient, Paths, Settings, TokenManager};
//!
//! async fn login() -> Result<String, classpilot_core::ClasspilotError> {
//!     let paths = Paths::user()?;
//!     let settings = Settings::load(&paths)?;
//!     let manager = TokenManager::from_settings(&settings, &paths)?;
//!     let client = ApiClient::connect(&manager, &settings).await?;
//!     Ok(client.current_user().await?.login)
//! }
//! ```

pub mod backend;
pub mod classify;
pub mod client;
pub mod error;
pub mod model;
pub mod retry;
pub mod settings;
pub mod store;
pub mod token_manager;
pub mod verify;

// Re-export commonly used types at crate root
pub use model::{
    Credential,
    ExpiryStatus,
    RateLimit,
    StorageType,
    TokenType,
    mask_token,
};

pub use store::{
    ConfigFileStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use backend::CredentialBackend;

pub use classify::{
    ApiError,
    ErrorKind,
    classify_status,
    classify_transport,
};

pub use retry::{
    RetryContext,
    RetryPolicy,
    with_retry,
};

pub use verify::{
    GitHubVerifier,
    TokenVerifier,
    Verification,
};

pub use token_manager::{
    BackendStatus,
    TokenError,
    TokenManager,
};

pub use client::{
    ApiClient,
    User,
};

pub use settings::{
    Paths,
    Settings,
    SettingsError,
};

pub use error::ClasspilotError;
