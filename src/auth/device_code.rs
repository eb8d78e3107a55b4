//! Device-authorization grant for headless environments.
//!
//! The user visits a verification URL on another device and enters a short
//! code while this process polls the token endpoint until consent
//! completes, bounded by a caller-side timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::AuthError;
use super::token::TokenRecord;
use crate::config::AuthConfig;

/// Added to the poll interval on every `slow_down` response.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// A single device-flow attempt, as issued by the provider.
///
/// Ephemeral: discarded after success, denial, expiry, or timeout.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub device_code: String,
    /// Short code the user types at the verification URL.
    pub user_code: String,
    pub verification_uri: String,
    pub expires_at: DateTime<Utc>,
    /// Provider-directed seconds between poll attempts.
    pub poll_interval: Duration,
}

/// Outcome of a single poll attempt.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    /// User completed consent; token material is ready.
    Authorized { record: TokenRecord },
    /// User has not finished yet; poll again after the current interval.
    Pending,
    /// Provider asked for a longer interval.
    SlowDown,
}

/// Headless device-authorization flow.
pub struct DeviceAuthorizationFlow {
    client: reqwest::Client,
    config: AuthConfig,
}

impl DeviceAuthorizationFlow {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Request a device/user code pair from the provider.
    pub async fn start(&self) -> Result<DeviceSession, AuthError> {
        let scope = self.config.scopes().join(" ");
        let response = self
            .client
            .post(&self.config.device_auth_uri)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|err| AuthError::DeviceFlowInit(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::DeviceFlowInit(format!(
                "status {status}: {body}"
            )));
        }

        let payload: DeviceAuthResponse = response
            .json()
            .await
            .map_err(|err| AuthError::DeviceFlowInit(format!("invalid response: {err}")))?;

        tracing::info!(
            verification_uri = %payload.verification_uri,
            user_code = %payload.user_code,
            "device flow started"
        );
        Ok(DeviceSession {
            device_code: payload.device_code,
            user_code: payload.user_code,
            verification_uri: payload.verification_uri,
            expires_at: Utc::now() + chrono::Duration::seconds(payload.expires_in),
            poll_interval: Duration::from_secs(payload.interval),
        })
    }

    /// Poll until the user completes consent, bounded by `timeout`.
    ///
    /// Transient network errors are retried at the current interval;
    /// provider-terminal errors abort immediately.
    pub async fn poll(
        &self,
        session: &DeviceSession,
        timeout: Duration,
    ) -> Result<TokenRecord, AuthError> {
        let mut interval = session.poll_interval;
        let mut elapsed = Duration::ZERO;

        while elapsed < timeout {
            if Utc::now() >= session.expires_at {
                return Err(AuthError::DeviceCodeExpired);
            }

            match self.poll_once(session).await {
                Ok(DevicePoll::Authorized { record }) => {
                    tracing::info!("device flow completed");
                    return Ok(record);
                }
                Ok(DevicePoll::Pending) => {}
                Ok(DevicePoll::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    tracing::debug!(interval_secs = interval.as_secs(), "slowing down polling");
                }
                Err(err) if matches!(err, AuthError::Network(_)) => {
                    tracing::warn!(error = %err, "network error during device poll, retrying");
                }
                Err(err) => return Err(err),
            }

            tokio::time::sleep(interval).await;
            elapsed += interval;
        }

        Err(AuthError::PollTimedOut(timeout.as_secs()))
    }

    /// One request against the token endpoint.
    ///
    /// Terminal provider errors come back as `Err`; `Ok` variants mean the
    /// loop should continue or finish.
    pub async fn poll_once(&self, session: &DeviceSession) -> Result<DevicePoll, AuthError> {
        let response = self
            .client
            .post(&self.config.token_uri)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("device_code", session.device_code.as_str()),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await?;

        // Google returns poll errors with 4xx statuses and a JSON body, so
        // the body is parsed regardless of status.
        let status = response.status();
        let payload: DeviceTokenResponse = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                return Err(AuthError::DeviceFlow(format!(
                    "unexpected response (status {status}): {err}"
                )))
            }
        };

        if let Some(access_token) = payload.access_token {
            let scopes = match payload.scope {
                Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
                None => self.config.scopes().iter().map(|s| s.to_string()).collect(),
            };
            let record = TokenRecord {
                access_token,
                refresh_token: payload.refresh_token,
                token_uri: self.config.token_uri.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: None,
                scopes,
                expiry: payload
                    .expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            };
            return Ok(DevicePoll::Authorized { record });
        }

        match payload.error.as_deref() {
            Some("authorization_pending") => Ok(DevicePoll::Pending),
            Some("slow_down") => Ok(DevicePoll::SlowDown),
            Some("access_denied") => Err(AuthError::UserDeniedAccess),
            Some("expired_token") => Err(AuthError::DeviceCodeExpired),
            Some(other) => Err(AuthError::DeviceFlow(other.to_string())),
            None => Err(AuthError::DeviceFlow(format!(
                "response (status {status}) carried neither a token nor an error"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    // Google sends `verification_url`, the RFC names it `verification_uri`.
    #[serde(alias = "verification_url")]
    verification_uri: String,
    expires_in: i64,
    #[serde(default = "default_poll_interval")]
    interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct DeviceTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    error: Option<String>,
}
