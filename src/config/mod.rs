//! Process configuration for OAuth flows and token storage.
//!
//! Values come from the environment (a `.env` file is honored when
//! present); tests construct configs directly and override endpoints with
//! the `with_*` builders.

use std::fmt;
use std::path::PathBuf;

use crate::auth::error::AuthError;
use crate::auth::store::TokenStoreConfig;
use crate::crypto::TokenCipher;

/// Google OAuth consent endpoint.
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google token endpoint (code exchange, refresh, device polling).
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Google device-authorization endpoint.
pub const GOOGLE_DEVICE_AUTH_URI: &str = "https://oauth2.googleapis.com/device/code";

/// Default local callback port.
pub const DEFAULT_OAUTH_PORT: u16 = 3000;

/// Gmail scopes for read-write operation.
pub const GMAIL_SCOPES_FULL: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.compose",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Gmail scopes for read-only operation.
pub const GMAIL_SCOPES_READONLY: &[&str] = &["https://www.googleapis.com/auth/gmail.readonly"];

/// Scope set for the given server mode.
pub fn gmail_scopes(read_only: bool) -> &'static [&'static str] {
    if read_only {
        GMAIL_SCOPES_READONLY
    } else {
        GMAIL_SCOPES_FULL
    }
}

/// OAuth client configuration plus token-at-rest settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// 64-hex-character encryption key for tokens at rest.
    pub encryption_key: String,
    pub oauth_port: u16,
    pub read_only: bool,
    pub auth_uri: String,
    pub token_uri: String,
    pub device_auth_uri: String,
    pub token_dir: PathBuf,
}

impl AuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        encryption_key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            encryption_key: encryption_key.into(),
            oauth_port: DEFAULT_OAUTH_PORT,
            read_only: false,
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            device_auth_uri: GOOGLE_DEVICE_AUTH_URI.to_string(),
            token_dir: TokenStoreConfig::default_dir(),
        }
    }

    /// Load configuration from the environment.
    ///
    /// Required: `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`,
    /// `TOKEN_ENCRYPTION_KEY` (validated here so a bad key fails at
    /// startup rather than at first save). Optional: `OAUTH_PORT`,
    /// `READ_ONLY`.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();

        let client_id = required_env("GOOGLE_CLIENT_ID")?;
        let client_secret = required_env("GOOGLE_CLIENT_SECRET")?;
        let encryption_key = required_env("TOKEN_ENCRYPTION_KEY")?;
        TokenCipher::from_hex(&encryption_key)?;

        let oauth_port = match std::env::var("OAUTH_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                AuthError::Configuration(format!("OAUTH_PORT is not a valid port: {raw:?}"))
            })?,
            Err(_) => DEFAULT_OAUTH_PORT,
        };
        let read_only = std::env::var("READ_ONLY")
            .map(|raw| parse_bool_flag(&raw))
            .unwrap_or(false);

        Ok(Self {
            oauth_port,
            read_only,
            ..Self::new(client_id, client_secret, encryption_key)
        })
    }

    pub fn with_oauth_port(mut self, port: u16) -> Self {
        self.oauth_port = port;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_auth_uri(mut self, uri: impl Into<String>) -> Self {
        self.auth_uri = uri.into();
        self
    }

    pub fn with_token_uri(mut self, uri: impl Into<String>) -> Self {
        self.token_uri = uri.into();
        self
    }

    pub fn with_device_auth_uri(mut self, uri: impl Into<String>) -> Self {
        self.device_auth_uri = uri.into();
        self
    }

    pub fn with_token_dir(mut self, dir: PathBuf) -> Self {
        self.token_dir = dir;
        self
    }

    /// Scopes for the configured mode.
    pub fn scopes(&self) -> &'static [&'static str] {
        gmail_scopes(self.read_only)
    }

    /// Cipher built from the configured encryption key.
    pub fn cipher(&self) -> Result<TokenCipher, AuthError> {
        TokenCipher::from_hex(&self.encryption_key)
    }

    /// Store configuration for the configured token directory.
    pub fn store_config(&self) -> TokenStoreConfig {
        TokenStoreConfig::new(self.token_dir.clone())
    }

    /// Callback URI for the given bound port.
    pub fn redirect_uri(&self, port: u16) -> String {
        format!("http://localhost:{port}/oauth/callback")
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"..")
            .field("encryption_key", &"..")
            .field("oauth_port", &self.oauth_port)
            .field("read_only", &self.read_only)
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .field("device_auth_uri", &self.device_auth_uri)
            .field("token_dir", &self.token_dir)
            .finish()
    }
}

fn required_env(name: &str) -> Result<String, AuthError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AuthError::Configuration(format!("{name} environment variable not set")))
}

fn parse_bool_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_mode_narrows_scopes() {
        assert_eq!(gmail_scopes(false), GMAIL_SCOPES_FULL);
        assert_eq!(gmail_scopes(true), GMAIL_SCOPES_READONLY);
        assert_eq!(gmail_scopes(true).len(), 1);
    }

    #[test]
    fn bool_flag_parsing_matches_known_values() {
        for raw in ["true", "TRUE", "1", "yes", " Yes "] {
            assert!(parse_bool_flag(raw), "{raw:?} should enable");
        }
        for raw in ["false", "0", "no", "", "on"] {
            assert!(!parse_bool_flag(raw), "{raw:?} should disable");
        }
    }

    #[test]
    fn redirect_uri_uses_the_actual_port() {
        let config = AuthConfig::new("id", "secret", "a".repeat(64));
        assert_eq!(
            config.redirect_uri(3001),
            "http://localhost:3001/oauth/callback"
        );
    }

    #[test]
    fn cipher_rejects_a_bad_configured_key() {
        let config = AuthConfig::new("id", "secret", "not-hex");
        assert!(matches!(
            config.cipher(),
            Err(AuthError::InvalidKeyFormat { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = AuthConfig::new("id", "hunter2", "a".repeat(64));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains(&"a".repeat(64)));
        assert!(rendered.contains("id"));
    }
}
