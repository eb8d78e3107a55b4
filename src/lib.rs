//! Tycho — encrypted OAuth 2.0 credential management for Gmail API clients.
//!
//! Issues, persists, and refreshes Google OAuth credentials so a
//! downstream Gmail client can make authenticated calls without
//! re-prompting the user on every invocation. Two grant flows are
//! supported: an interactive loopback-redirect flow and a headless
//! device-authorization flow. Tokens are AES-256-GCM encrypted at rest,
//! one owner-only file per identity, and a concurrent per-identity cache
//! guarantees a single network refresh per expired identity.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tycho::auth::{AuthService, EncryptedFileTokenStore, TokenStore};
//! use tycho::config::AuthConfig;
//! use tycho::gmail::ClientCache;
//!
//! # async fn example() -> Result<(), tycho::auth::AuthError> {
//! let config = AuthConfig::from_env()?;
//! let store: Arc<dyn TokenStore> = Arc::new(EncryptedFileTokenStore::new(
//!     config.store_config(),
//!     config.cipher()?,
//! )?);
//! let cache = Arc::new(ClientCache::new(store.clone(), config.clone()));
//! let service = AuthService::new(store, cache.clone(), config);
//!
//! service
//!     .login_with_browser("user@example.com", Duration::from_secs(120))
//!     .await?;
//! let client = cache.get_client("user@example.com").await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod crypto;
pub mod gmail;

pub use auth::{AuthError, AuthService, TokenRecord, TokenStore};
pub use config::AuthConfig;
pub use crypto::TokenCipher;
pub use gmail::{ClientCache, GmailClient};
