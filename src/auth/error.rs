use thiserror::Error;

/// Normalized authentication, storage, and flow errors.
///
/// Callers pattern-match on variants rather than string-matching messages;
/// [`AuthError::requires_reauth`] and [`AuthError::is_transient`] give the
/// coarse classification most call sites need.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed process configuration. Fatal, never retried.
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    /// Raw encryption key is not exactly 32 bytes.
    #[error("Encryption key must be {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// Hex-encoded encryption key has the wrong length or non-hex characters.
    #[error("Encryption key must be {expected} hex characters: {reason}")]
    InvalidKeyFormat { expected: usize, reason: String },

    /// AES-GCM encryption failed.
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Authentication tag did not verify. Wrong key, corrupted data, and
    /// tampering are deliberately indistinguishable here.
    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    /// Stored token file exists but cannot be read back into a record.
    #[error("Stored token for {identity} is corrupt: {reason}")]
    CorruptToken { identity: String, reason: String },

    /// Identity sanitized to an empty filename.
    #[error("Identity {0:?} contains no storable characters")]
    InvalidIdentity(String),

    /// Token file operation failed for a non-NotFound reason.
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Callback `state` did not match the value embedded in the consent URL.
    /// Carries no detail: the expected state must never leak.
    #[error("Callback state mismatch: possible CSRF attempt")]
    StateMismatch,

    /// The provider redirected back with an `error` parameter, or rejected
    /// the authorization-code exchange.
    #[error("Provider denied authorization: {0}")]
    ProviderDenied(String),

    /// Callback arrived without `error` or `code`.
    #[error("Callback carried no authorization code")]
    NoAuthorizationCode,

    /// No callback arrived within the flow window.
    #[error("No callback received within {0} seconds")]
    FlowTimedOut(u64),

    /// Every candidate callback port was already bound.
    #[error("No free callback port, tried {0:?}")]
    PortExhausted(Vec<u16>),

    /// Device-authorization endpoint returned non-success or was unreachable.
    #[error("Device flow initiation failed: {0}")]
    DeviceFlowInit(String),

    /// User rejected the consent screen during a device flow.
    #[error("User denied access")]
    UserDeniedAccess,

    /// Device code expired before the user completed consent.
    #[error("Device code expired before authorization completed")]
    DeviceCodeExpired,

    /// Provider returned an error code this flow does not recognize.
    #[error("Device flow error: {0}")]
    DeviceFlow(String),

    /// Device polling exceeded the caller-side timeout.
    #[error("Device authorization not completed within {0} seconds")]
    PollTimedOut(u64),

    /// No stored token for the identity; a login flow must run first.
    #[error("Identity {0} is not authenticated")]
    NotAuthenticated(String),

    /// Refresh against the token endpoint failed; the cached entry has been
    /// invalidated and the caller must re-authenticate.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Whether the caller must re-run a login flow to make progress.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated(_)
                | Self::RefreshFailed(_)
                | Self::UserDeniedAccess
                | Self::DeviceCodeExpired
                | Self::ProviderDenied(_)
        )
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::FlowTimedOut(_) | Self::PollTimedOut(_)
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reauth_classification_covers_cache_and_consent_failures() {
        assert!(AuthError::NotAuthenticated("a@b.c".into()).requires_reauth());
        assert!(AuthError::RefreshFailed("invalid_grant".into()).requires_reauth());
        assert!(AuthError::UserDeniedAccess.requires_reauth());
        assert!(AuthError::DeviceCodeExpired.requires_reauth());
        assert!(!AuthError::Network("reset".into()).requires_reauth());
    }

    #[test]
    fn transient_classification_covers_network_and_timeouts() {
        assert!(AuthError::Network("reset".into()).is_transient());
        assert!(AuthError::FlowTimedOut(120).is_transient());
        assert!(AuthError::PollTimedOut(300).is_transient());
        assert!(!AuthError::DecryptionFailed.is_transient());
        assert!(!AuthError::Configuration("no client id".into()).is_transient());
    }

    #[test]
    fn state_mismatch_message_carries_no_state_value() {
        let message = AuthError::StateMismatch.to_string();
        assert!(message.contains("state mismatch"));
        assert!(!message.contains('='));
    }
}
