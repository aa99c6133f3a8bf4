//! Owner-only JSON token file.
//!
//! The file lives at `<config_dir>/token_config.json`:
//!
//! ```json
//! {
//!   "storage_type": "config_file",
//!   "github_token": {
//!     "token": "<secret>",
//!     "token_type": "classic",
//!     "scopes": ["repo", "read:org", "workflow"],
//!     "expires_at": "2026-01-01T00:00:00Z"
//!   }
//! }
//! ```
//!
//! Writes go to a sibling temp file created with mode 0600 and are renamed
//! over the target, so readers never see a partial file and the token is
//! never world-readable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Secret, StoreError};
use crate::model::{Credential, StorageType, TokenType};

/// File name of the token file inside the config directory.
pub const TOKEN_FILE_NAME: &str = "token_config.json";

/// On-disk layout of the token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    pub storage_type: StorageType,
    pub github_token: StoredToken,
}

/// The `github_token` object of the token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: Secret,
    pub token_type: TokenType,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl TokenFile {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            storage_type: StorageType::ConfigFile,
            github_token: StoredToken {
                token: credential.token.clone(),
                token_type: credential.token_type,
                scopes: credential.scopes.iter().cloned().collect(),
                expires_at: credential.expires_at,
                login: credential.login.clone(),
                account_id: credential.account_id.clone(),
            },
        }
    }

    pub fn into_credential(self) -> Credential {
        let stored = self.github_token;
        // The prefix is authoritative over whatever type the file recorded.
        let token_type = TokenType::detect(stored.token.expose());
        if token_type != stored.token_type {
            tracing::debug!(
                recorded = %stored.token_type,
                detected = %token_type,
                "token file type disagrees with prefix"
            );
        }
        Credential {
            token_type,
            scopes: stored.scopes.iter().cloned().collect(),
            login: stored.login.clone(),
            account_id: stored.account_id.clone(),
            expires_at: stored.expires_at,
            storage_type: StorageType::ConfigFile,
            token: stored.token.clone(),
        }
    }
}

/// Token file store rooted at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigFileStore {
    path: PathBuf,
}

impl ConfigFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config_dir>/token_config.json`.
    pub fn in_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join(TOKEN_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the token file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn read(&self) -> Result<Option<TokenFile>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::malformed(&self.path, &e))
    }

    /// Atomically replace the token file with owner-only permissions.
    ///
    /// Each write goes through its own uniquely named temp file in the same
    /// directory, so concurrent writers never share an inode.
    pub fn write(&self, file: &TokenFile) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        ensure_private_dir(dir)?;

        let json = serde_json::to_string_pretty(file)?;

        // NamedTempFile creates with 0600 on unix and unlinks itself on drop.
        let mut tmp = tempfile::Builder::new()
            .prefix(".token_config.")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;

        restrict_to_owner(tmp.as_file()).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        tracing::debug!(path = %self.path.display(), "wrote token file");
        Ok(())
    }

    /// Remove the token file. Missing files are not an error.
    pub fn delete(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

fn ensure_private_dir(dir: &Path) -> Result<(), StoreError> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| StoreError::io(dir, e))?;
    }

    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}
