//! Per-identity credential cache and derived Gmail client handles.
//!
//! [`ClientCache::get_client`] is the single entry point the API-wrapping
//! layer depends on. Two lock levels coordinate concurrent callers: a
//! registry mutex guards the cache map and the per-identity lock table
//! (never held across an await), and a per-identity async mutex serializes
//! load/refresh work so one expired identity triggers exactly one network
//! refresh no matter how many tasks race for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Deserialize;

use crate::auth::error::AuthError;
use crate::auth::store::TokenStore;
use crate::auth::token::TokenRecord;
use crate::config::AuthConfig;

/// Gmail REST base URL.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// An authenticated handle for one identity.
///
/// The raw token never leaves this type: collaborators build requests
/// through [`GmailClient::request`], which attaches the bearer header.
#[derive(Clone)]
pub struct GmailClient {
    identity: String,
    access_token: String,
    base_url: String,
    http: reqwest::Client,
}

impl GmailClient {
    fn new(identity: &str, record: &TokenRecord, base_url: &str, http: reqwest::Client) -> Self {
        Self {
            identity: identity.to_string(),
            access_token: record.access_token.clone(),
            base_url: base_url.to_string(),
            http,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// An authorized request builder for a path under the API base.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
    }
}

impl std::fmt::Debug for GmailClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailClient")
            .field("identity", &self.identity)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

struct CachedEntry {
    record: TokenRecord,
    client: GmailClient,
}

/// Cache of live credentials and their derived clients, keyed by identity.
pub struct ClientCache {
    store: Arc<dyn TokenStore>,
    config: AuthConfig,
    http: reqwest::Client,
    base_url: String,
    entries: Mutex<HashMap<String, CachedEntry>>,
    // Lock order: this registry mutex first, then the per-identity mutex.
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClientCache {
    pub fn new(store: Arc<dyn TokenStore>, config: AuthConfig) -> Self {
        Self {
            store,
            config,
            http: reqwest::Client::new(),
            base_url: GMAIL_API_BASE.to_string(),
            entries: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get an authenticated client for `identity`, loading and refreshing
    /// stored credentials as needed.
    pub async fn get_client(&self, identity: &str) -> Result<GmailClient, AuthError> {
        // Fast path: live cached credential.
        if let Some(client) = self.cached_if_usable(identity) {
            return Ok(client);
        }

        let refresh_lock = self.refresh_lock(identity);
        let _guard = refresh_lock.lock().await;

        // Double-check: another caller may have refreshed while we waited.
        if let Some(client) = self.cached_if_usable(identity) {
            return Ok(client);
        }

        let record = match self.cached_record(identity) {
            Some(record) if record.can_refresh() => {
                self.refresh_and_persist(identity, record).await?
            }
            _ => {
                let loaded = self
                    .store
                    .load(identity)?
                    .ok_or_else(|| AuthError::NotAuthenticated(identity.to_string()))?;
                if loaded.is_usable() {
                    loaded
                } else if loaded.can_refresh() {
                    self.refresh_and_persist(identity, loaded).await?
                } else {
                    // Expired with no refresh token: permanently invalid.
                    self.invalidate(identity);
                    return Err(AuthError::NotAuthenticated(identity.to_string()));
                }
            }
        };

        Ok(self.install(identity, record))
    }

    /// Drop the cached entry for `identity` unconditionally.
    pub fn invalidate(&self, identity: &str) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if entries.remove(identity).is_some() {
            tracing::debug!(identity, "invalidated cached client");
        }
    }

    /// Whether stored credentials exist for `identity`. No network calls.
    pub fn is_authenticated(&self, identity: &str) -> Result<bool, AuthError> {
        self.store.exists(identity)
    }

    fn cached_if_usable(&self, identity: &str) -> Option<GmailClient> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries
            .get(identity)
            .filter(|entry| entry.record.is_usable())
            .map(|entry| entry.client.clone())
    }

    fn cached_record(&self, identity: &str) -> Option<TokenRecord> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries.get(identity).map(|entry| entry.record.clone())
    }

    fn refresh_lock(&self, identity: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("lock registry poisoned");
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn install(&self, identity: &str, record: TokenRecord) -> GmailClient {
        let client = GmailClient::new(identity, &record, &self.base_url, self.http.clone());
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            identity.to_string(),
            CachedEntry {
                record,
                client: client.clone(),
            },
        );
        tracing::debug!(identity, "cached client installed");
        client
    }

    /// Refresh, persist, and hand back the updated record. Must be called
    /// while holding the per-identity lock. Any failure invalidates the
    /// cache entry so the caller re-authenticates rather than reusing a
    /// half-dead credential.
    async fn refresh_and_persist(
        &self,
        identity: &str,
        record: TokenRecord,
    ) -> Result<TokenRecord, AuthError> {
        let refreshed = match self.do_refresh(&record).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                tracing::warn!(identity, error = %err, "token refresh failed");
                self.invalidate(identity);
                return Err(AuthError::RefreshFailed(err.to_string()));
            }
        };
        if let Err(err) = self.store.save(identity, &refreshed) {
            self.invalidate(identity);
            return Err(AuthError::RefreshFailed(format!(
                "refreshed token could not be persisted: {err}"
            )));
        }
        tracing::debug!(identity, "token refreshed and persisted");
        Ok(refreshed)
    }

    async fn do_refresh(&self, record: &TokenRecord) -> Result<TokenRecord, AuthError> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token available".to_string()))?;

        // The secret is never stored with the record; resolve it from
        // configuration here.
        let client_secret = record
            .client_secret
            .clone()
            .unwrap_or_else(|| self.config.client_secret.clone());
        let client_id = if record.client_id.is_empty() {
            self.config.client_id.clone()
        } else {
            record.client_id.clone()
        };
        let token_uri = if record.token_uri.is_empty() {
            self.config.token_uri.clone()
        } else {
            record.token_uri.clone()
        };

        let response = self
            .http
            .post(&token_uri)
            .header("Accept", "application/json")
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed(format!(
                "token endpoint returned status {status}: {body}"
            )));
        }

        let payload: RefreshResponse = response.json().await?;
        Ok(TokenRecord {
            access_token: payload.access_token,
            // Google usually omits the refresh token here; keep the old one.
            refresh_token: payload
                .refresh_token
                .or_else(|| record.refresh_token.clone()),
            token_uri,
            client_id,
            client_secret: None,
            scopes: record.scopes.clone(),
            expiry: payload
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().expect("cache lock poisoned");
        f.debug_struct("ClientCache")
            .field("base_url", &self.base_url)
            .field("cached_identities", &entries.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> TokenRecord {
        TokenRecord {
            access_token: "ya29.cached".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client-id".to_string(),
            client_secret: None,
            scopes: vec![],
            expiry: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn client_requests_carry_the_bearer_token() {
        let client = GmailClient::new(
            "user@example.com",
            &record(),
            GMAIL_API_BASE,
            reqwest::Client::new(),
        );
        let request = client
            .request(reqwest::Method::GET, "users/me/profile")
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/profile"
        );
        assert_eq!(
            request.headers()["authorization"],
            "Bearer ya29.cached"
        );
    }

    #[test]
    fn debug_output_does_not_leak_tokens() {
        let client = GmailClient::new(
            "user@example.com",
            &record(),
            GMAIL_API_BASE,
            reqwest::Client::new(),
        );
        assert!(!format!("{client:?}").contains("ya29.cached"));
    }
}
