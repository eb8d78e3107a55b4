use std::sync::Arc;
use std::time::Duration;

use super::device_code::{DeviceAuthorizationFlow, DeviceSession};
use super::error::AuthError;
use super::local_server::LocalServerFlow;
use super::store::TokenStore;
use crate::config::AuthConfig;
use crate::gmail::ClientCache;

/// Login/logout/status facade for tooling built on top of the credential
/// core.
///
/// All I/O decisions (printing, prompting, exit codes) belong to the
/// caller; this type only returns typed results and errors.
pub struct AuthService {
    store: Arc<dyn TokenStore>,
    cache: Arc<ClientCache>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(store: Arc<dyn TokenStore>, cache: Arc<ClientCache>, config: AuthConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Interactive login: opens the browser, waits for the callback, and
    /// stores the resulting token under `identity`.
    pub async fn login_with_browser(
        &self,
        identity: &str,
        timeout: Duration,
    ) -> Result<(), AuthError> {
        let record = LocalServerFlow::new(self.config.clone()).run(timeout).await?;
        self.store.save(identity, &record)?;
        // Drop any entry left over from a previous login of this identity.
        self.cache.invalidate(identity);
        tracing::info!(identity, "interactive login complete");
        Ok(())
    }

    /// Begin a headless login; the caller displays the verification URL
    /// and user code, then calls [`AuthService::finish_device_login`].
    pub async fn start_device_login(&self) -> Result<DeviceSession, AuthError> {
        DeviceAuthorizationFlow::new(self.config.clone()).start().await
    }

    /// Poll a device session to completion and store the token under
    /// `identity`.
    pub async fn finish_device_login(
        &self,
        identity: &str,
        session: &DeviceSession,
        timeout: Duration,
    ) -> Result<(), AuthError> {
        let record = DeviceAuthorizationFlow::new(self.config.clone())
            .poll(session, timeout)
            .await?;
        self.store.save(identity, &record)?;
        self.cache.invalidate(identity);
        tracing::info!(identity, "device login complete");
        Ok(())
    }

    /// Whether stored credentials exist for `identity`.
    pub fn status(&self, identity: &str) -> Result<bool, AuthError> {
        self.store.exists(identity)
    }

    /// All identities with stored credentials (display form).
    pub fn statuses(&self) -> Result<Vec<String>, AuthError> {
        self.store.list_identities()
    }

    /// Remove stored credentials and any cached client for `identity`.
    /// Returns whether a stored token existed.
    pub fn logout(&self, identity: &str) -> Result<bool, AuthError> {
        let removed = self.store.delete(identity)?;
        self.cache.invalidate(identity);
        tracing::info!(identity, removed, "logout");
        Ok(removed)
    }
}
