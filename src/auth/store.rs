use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::AuthError;
use super::token::TokenRecord;
use crate::crypto::{EncryptedBlob, TokenCipher};

/// Suffix for encrypted token files.
const TOKEN_FILE_SUFFIX: &str = ".token.enc";

/// Filename marker substituted for `@` in identities.
const AT_MARKER: &str = "_at_";

/// Storage abstraction for persisted token records, keyed by identity.
pub trait TokenStore: Send + Sync {
    /// Load the record for an identity. `Ok(None)` when none is stored.
    fn load(&self, identity: &str) -> Result<Option<TokenRecord>, AuthError>;
    fn save(&self, identity: &str, record: &TokenRecord) -> Result<(), AuthError>;
    /// Returns whether a record existed and was removed.
    fn delete(&self, identity: &str) -> Result<bool, AuthError>;
    fn exists(&self, identity: &str) -> Result<bool, AuthError>;
    /// Best-effort display list of stored identities.
    fn list_identities(&self) -> Result<Vec<String>, AuthError>;
}

/// Configuration for file-backed token storage.
#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub base_dir: PathBuf,
}

impl TokenStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Default storage directory: `~/.gmail-mcp/tokens`.
    pub fn default_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".gmail-mcp").join("tokens"))
            .unwrap_or_else(|| PathBuf::from(".gmail-mcp").join("tokens"))
    }
}

/// File-backed token store, encrypted at rest.
///
/// One file per identity, `{sanitized}.token.enc`, owner read/write only.
/// File contents are the JSON form of [`EncryptedBlob`].
#[derive(Debug, Clone)]
pub struct EncryptedFileTokenStore {
    base_dir: PathBuf,
    cipher: TokenCipher,
}

impl EncryptedFileTokenStore {
    /// Create the store, creating the base directory if absent.
    pub fn new(config: TokenStoreConfig, cipher: TokenCipher) -> Result<Self, AuthError> {
        fs::create_dir_all(&config.base_dir).map_err(storage_error)?;
        tracing::info!(dir = %config.base_dir.display(), "token store initialized");
        Ok(Self {
            base_dir: config.base_dir,
            cipher,
        })
    }

    fn token_path(&self, identity: &str) -> Result<PathBuf, AuthError> {
        let safe = sanitize_identity(identity)?;
        Ok(self.base_dir.join(format!("{safe}{TOKEN_FILE_SUFFIX}")))
    }
}

impl TokenStore for EncryptedFileTokenStore {
    fn load(&self, identity: &str) -> Result<Option<TokenRecord>, AuthError> {
        let path = self.token_path(identity)?;
        let raw = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(identity, "no stored token");
                return Ok(None);
            }
            Err(err) => return Err(storage_error(err)),
        };

        let blob: EncryptedBlob =
            serde_json::from_slice(&raw).map_err(|err| AuthError::CorruptToken {
                identity: identity.to_string(),
                reason: format!("invalid blob JSON: {err}"),
            })?;
        let plaintext = self
            .cipher
            .decrypt(&blob)
            .map_err(|_| AuthError::CorruptToken {
                identity: identity.to_string(),
                reason: "decryption failed".to_string(),
            })?;
        let record =
            serde_json::from_slice(&plaintext).map_err(|err| AuthError::CorruptToken {
                identity: identity.to_string(),
                reason: format!("invalid record JSON: {err}"),
            })?;
        tracing::debug!(identity, "loaded stored token");
        Ok(Some(record))
    }

    fn save(&self, identity: &str, record: &TokenRecord) -> Result<(), AuthError> {
        let path = self.token_path(identity)?;
        let plaintext = serde_json::to_vec(record)?;
        let blob = self.cipher.encrypt(&plaintext)?;
        let serialized = serde_json::to_vec_pretty(&blob)?;
        atomic_write(&path, &serialized)?;
        tracing::info!(identity, "saved encrypted token");
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<bool, AuthError> {
        let path = self.token_path(identity)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(identity, "deleted stored token");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_error(err)),
        }
    }

    fn exists(&self, identity: &str) -> Result<bool, AuthError> {
        Ok(self.token_path(identity)?.exists())
    }

    fn list_identities(&self) -> Result<Vec<String>, AuthError> {
        let mut identities = Vec::new();
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(identities),
            Err(err) => return Err(storage_error(err)),
        };
        for entry in entries {
            let entry = entry.map_err(storage_error)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(TOKEN_FILE_SUFFIX) {
                identities.push(stem.replace(AT_MARKER, "@"));
            }
        }
        identities.sort();
        Ok(identities)
    }
}

/// Map an identity to a safe filename stem.
///
/// Keeps ASCII alphanumerics and `- _ .`, maps `@` to `_at_`, drops
/// everything else. Path traversal is impossible because separators never
/// survive the allow-list.
fn sanitize_identity(identity: &str) -> Result<String, AuthError> {
    let filtered: String = identity
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        .collect();
    let safe = filtered.replace('@', AT_MARKER);
    if safe.is_empty() {
        return Err(AuthError::InvalidIdentity(
            identity.chars().take(50).collect(),
        ));
    }
    Ok(safe)
}

fn storage_error(err: std::io::Error) -> AuthError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        AuthError::Storage(format!("permission denied: {err}"))
    } else {
        AuthError::Io(err.to_string())
    }
}

/// Write via a same-directory temp file and rename, so a crash mid-write
/// leaves any previous file intact. Returns only after the payload is
/// flushed.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(storage_error)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| AuthError::Storage(format!("path {} has no file name", path.display())))?;
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_name = format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(storage_error(err));
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(storage_error(err));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(storage_error)?;
    }

    Ok(())
}
