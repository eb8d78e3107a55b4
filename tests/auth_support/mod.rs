#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use tycho::auth::{AuthError, TokenRecord, TokenStore};
use tycho::config::AuthConfig;

/// Trait-level store double so cache and service tests do not need a
/// filesystem.
#[derive(Default)]
pub struct InMemoryTokenStore {
    records: Mutex<HashMap<String, TokenRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, identity: &str, record: TokenRecord) {
        self.records
            .lock()
            .expect("store lock poisoned")
            .insert(identity.to_string(), record);
    }

    pub fn get(&self, identity: &str) -> Option<TokenRecord> {
        self.records
            .lock()
            .expect("store lock poisoned")
            .get(identity)
            .cloned()
    }

    pub fn remove(&self, identity: &str) {
        self.records
            .lock()
            .expect("store lock poisoned")
            .remove(identity);
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self, identity: &str) -> Result<Option<TokenRecord>, AuthError> {
        Ok(self.get(identity))
    }

    fn save(&self, identity: &str, record: &TokenRecord) -> Result<(), AuthError> {
        self.seed(identity, record.clone());
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<bool, AuthError> {
        Ok(self
            .records
            .lock()
            .expect("store lock poisoned")
            .remove(identity)
            .is_some())
    }

    fn exists(&self, identity: &str) -> Result<bool, AuthError> {
        Ok(self.get(identity).is_some())
    }

    fn list_identities(&self) -> Result<Vec<String>, AuthError> {
        let mut identities: Vec<String> = self
            .records
            .lock()
            .expect("store lock poisoned")
            .keys()
            .cloned()
            .collect();
        identities.sort();
        Ok(identities)
    }
}

pub fn test_config() -> AuthConfig {
    AuthConfig::new("test-client-id", "test-client-secret", "a".repeat(64))
}

pub fn fresh_record(token_uri: &str) -> TokenRecord {
    TokenRecord {
        access_token: "ya29.fresh".to_string(),
        refresh_token: Some("1//refresh".to_string()),
        token_uri: token_uri.to_string(),
        client_id: "test-client-id".to_string(),
        client_secret: None,
        scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        expiry: Some(Utc::now() + Duration::hours(1)),
    }
}

pub fn expired_record(token_uri: &str) -> TokenRecord {
    TokenRecord {
        expiry: Some(Utc::now() - Duration::hours(1)),
        access_token: "ya29.stale".to_string(),
        ..fresh_record(token_uri)
    }
}
