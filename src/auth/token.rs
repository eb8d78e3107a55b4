use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this many seconds before their recorded
/// expiry, covering one provider round trip plus modest clock drift.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth token material for one identity.
///
/// `client_secret` is never serialized: it is re-attached from process
/// configuration at refresh time, so a record loaded from storage carries
/// `None` until then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token endpoint the refresh grant is sent to.
    pub token_uri: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Whether the access token is past (or within the skew window of) its
    /// recorded expiry. Records without an expiry never report expired.
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) <= Utc::now(),
            None => false,
        }
    }

    /// Whether the record can authenticate a request right now.
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    /// Whether a refresh grant can be attempted.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TokenRecord {
        TokenRecord {
            access_token: "ya29.sample".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client-id".to_string(),
            client_secret: Some("client-secret".to_string()),
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
            expiry: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn fresh_token_is_usable() {
        assert!(record().is_usable());
    }

    #[test]
    fn token_without_expiry_never_expires() {
        let mut token = record();
        token.expiry = None;
        assert!(!token.is_expired());
        assert!(token.is_usable());
    }

    #[test]
    fn token_within_skew_window_counts_as_expired() {
        let mut token = record();
        token.expiry = Some(Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS / 2));
        assert!(token.is_expired());
        assert!(!token.is_usable());
    }

    #[test]
    fn empty_access_token_is_never_usable() {
        let mut token = record();
        token.access_token.clear();
        assert!(!token.is_usable());
    }

    #[test]
    fn empty_refresh_token_cannot_refresh() {
        let mut token = record();
        token.refresh_token = Some(String::new());
        assert!(!token.can_refresh());
        token.refresh_token = None;
        assert!(!token.can_refresh());
    }

    #[test]
    fn client_secret_is_skipped_by_serde() {
        let json = serde_json::to_string(&record()).unwrap();
        assert!(!json.contains("client_secret"));
        assert!(!json.contains("client-secret"));

        let parsed: TokenRecord = serde_json::from_str(&json).unwrap();
        assert!(parsed.client_secret.is_none());
        assert_eq!(parsed.access_token, "ya29.sample");
    }
}
