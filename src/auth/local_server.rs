//! Interactive authorization-code flow with a loopback redirect.
//!
//! Binds a single-use listener on localhost, opens the provider consent
//! URL, and waits for exactly one callback carrying the authorization
//! code. The CSRF `state` value is generated only after the final port is
//! known, so the URL in the browser and the value checked on callback can
//! never disagree under port fallback.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;
use uuid::Uuid;

use super::error::AuthError;
use super::token::TokenRecord;
use crate::config::AuthConfig;

const CALLBACK_PATH: &str = "/oauth/callback";

/// Ports tried before giving up: the configured port plus two fallbacks.
const MAX_PORT_ATTEMPTS: u16 = 3;

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication Successful!</h1>\
     <p>You can close this window and return to the application.</p></body></html>";
const DENIED_PAGE: &str = "<html><body><h1>Authentication Failed</h1>\
     <p>You can close this window.</p></body></html>";
const STATE_PAGE: &str = "<html><body><h1>Security Error</h1>\
     <p>State mismatch. You can close this window.</p></body></html>";
const NO_CODE_PAGE: &str = "<html><body><h1>Error</h1>\
     <p>No authorization code received.</p></body></html>";
const NOT_FOUND_PAGE: &str = "<html><body><h1>Not Found</h1></body></html>";

/// Interactive local-redirect flow.
pub struct LocalServerFlow {
    config: AuthConfig,
    client: reqwest::Client,
    open_browser: bool,
}

impl LocalServerFlow {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            open_browser: true,
        }
    }

    /// Disable launching the system browser; the caller displays
    /// [`PendingAuthorization::authorize_url`] itself.
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Bind the callback listener and build the consent URL.
    ///
    /// Tries the configured port first, then `port+1, port+2`; fails with
    /// [`AuthError::PortExhausted`] naming every attempted port.
    pub async fn bind(&self) -> Result<PendingAuthorization, AuthError> {
        let mut attempted = Vec::new();
        for offset in 0..MAX_PORT_ATTEMPTS {
            let port = self.config.oauth_port + offset;
            attempted.push(port);
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    if offset > 0 {
                        tracing::info!(
                            port,
                            nominal = self.config.oauth_port,
                            "using fallback callback port"
                        );
                    } else {
                        tracing::debug!(port, "callback listener bound");
                    }
                    return self.pending(listener, port);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                    tracing::warn!(port, "callback port in use, trying next");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(AuthError::PortExhausted(attempted))
    }

    /// Run the whole flow: bind, open the browser, wait for the callback,
    /// exchange the code.
    pub async fn run(&self, timeout: Duration) -> Result<TokenRecord, AuthError> {
        let pending = self.bind().await?;
        tracing::info!(url = %pending.authorize_url(), "opening browser for authentication");
        if self.open_browser {
            if let Err(err) = open::that(pending.authorize_url()) {
                // The URL is already logged above; the user can open it by hand.
                tracing::warn!(error = %err, "failed to open browser");
            }
        }
        pending.wait(timeout).await
    }

    // State is generated here, after the final redirect URI is known.
    fn pending(&self, listener: TcpListener, port: u16) -> Result<PendingAuthorization, AuthError> {
        let redirect_uri = self.config.redirect_uri(port);
        let state = generate_state();

        let mut authorize_url = Url::parse(&self.config.auth_uri)
            .map_err(|err| AuthError::Configuration(format!("invalid auth URI: {err}")))?;
        authorize_url
            .query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes().join(" "))
            .append_pair("state", &state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "false");

        Ok(PendingAuthorization {
            listener,
            port,
            authorize_url: authorize_url.into(),
            redirect_uri,
            state,
            client: self.client.clone(),
            config: self.config.clone(),
        })
    }
}

/// A bound listener awaiting its single callback.
#[derive(Debug)]
pub struct PendingAuthorization {
    listener: TcpListener,
    port: u16,
    authorize_url: String,
    redirect_uri: String,
    state: String,
    client: reqwest::Client,
    config: AuthConfig,
}

impl PendingAuthorization {
    /// The consent URL to open in a browser.
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// The redirect URI actually sent to the provider (reflects port
    /// fallback).
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// The port the listener bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the callback, then exchange the code for tokens.
    ///
    /// The listener is released before the exchange; exceeding `timeout`
    /// fails with [`AuthError::FlowTimedOut`] and leaves nothing stored.
    pub async fn wait(self, timeout: Duration) -> Result<TokenRecord, AuthError> {
        let PendingAuthorization {
            listener,
            redirect_uri,
            state,
            client,
            config,
            ..
        } = self;

        let code = tokio::time::timeout(timeout, await_callback(&listener, &state))
            .await
            .map_err(|_| AuthError::FlowTimedOut(timeout.as_secs()))??;
        drop(listener);

        exchange_code(&client, &config, &code, &redirect_uri).await
    }
}

/// Accept connections until the callback path arrives, then settle it
/// exactly once. Stray requests (favicon and friends) get a 404 and do not
/// consume the attempt.
async fn await_callback(listener: &TcpListener, expected_state: &str) -> Result<String, AuthError> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        match handle_connection(stream, expected_state).await {
            Ok(CallbackOutcome::Code(code)) => return Ok(code),
            Ok(CallbackOutcome::NotCallback) => continue,
            Ok(CallbackOutcome::Failed(err)) => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "error handling callback connection");
                continue;
            }
        }
    }
}

enum CallbackOutcome {
    /// The callback carried a valid state and code.
    Code(String),
    /// Some other path; keep waiting.
    NotCallback,
    /// The callback settled the flow with a failure.
    Failed(AuthError),
}

async fn handle_connection(
    mut stream: TcpStream,
    expected_state: &str,
) -> std::io::Result<CallbackOutcome> {
    let target = read_request_target(&mut stream).await?;

    let is_callback = |t: &String| {
        t.as_str() == CALLBACK_PATH || t.starts_with("/oauth/callback?")
    };
    let Some(target) = target.filter(is_callback) else {
        respond(&mut stream, 404, "Not Found", NOT_FOUND_PAGE).await?;
        return Ok(CallbackOutcome::NotCallback);
    };

    let query = parse_query(&target);

    // Precedence: provider error, then CSRF state, then the code itself.
    if let Some(error_code) = query.iter().find(|(k, _)| k == "error").map(|(_, v)| v) {
        respond(&mut stream, 400, "Bad Request", DENIED_PAGE).await?;
        return Ok(CallbackOutcome::Failed(AuthError::ProviderDenied(
            error_code.clone(),
        )));
    }

    let returned_state = query.iter().find(|(k, _)| k == "state").map(|(_, v)| v);
    if returned_state.map(String::as_str) != Some(expected_state) {
        // The expected value must not appear in the response or the error.
        respond(&mut stream, 400, "Bad Request", STATE_PAGE).await?;
        return Ok(CallbackOutcome::Failed(AuthError::StateMismatch));
    }

    match query.iter().find(|(k, _)| k == "code").map(|(_, v)| v) {
        Some(code) if !code.is_empty() => {
            respond(&mut stream, 200, "OK", SUCCESS_PAGE).await?;
            Ok(CallbackOutcome::Code(code.clone()))
        }
        _ => {
            respond(&mut stream, 400, "Bad Request", NO_CODE_PAGE).await?;
            Ok(CallbackOutcome::Failed(AuthError::NoAuthorizationCode))
        }
    }
}

/// Read the request line and drain headers; returns the request target for
/// GET requests, `None` otherwise.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut header = String::new();
    loop {
        header.clear();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    if method == "GET" && target.starts_with('/') {
        Ok(Some(target))
    } else {
        Ok(None)
    }
}

fn parse_query(target: &str) -> Vec<(String, String)> {
    match Url::parse(&format!("http://localhost{target}")) {
        Ok(url) => url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn respond(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// 256 bits of CSRF state, hyphen-free.
fn generate_state() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Exchange an authorization code for token material.
///
/// The returned record deliberately omits the client secret: it is
/// resolved from configuration again at refresh time, never persisted.
async fn exchange_code(
    client: &reqwest::Client,
    config: &AuthConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenRecord, AuthError> {
    tracing::debug!(token_uri = %config.token_uri, "exchanging authorization code");
    let response = client
        .post(&config.token_uri)
        .header("Accept", "application/json")
        .form(&[
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::ProviderDenied(format!(
            "code exchange failed with status {status}: {body}"
        )));
    }

    let payload: ExchangeResponse = response.json().await?;
    let scopes = match payload.scope {
        Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
        None => config.scopes().iter().map(|s| s.to_string()).collect(),
    };
    tracing::info!("authorization code exchanged for tokens");
    Ok(TokenRecord {
        access_token: payload.access_token,
        refresh_token: payload.refresh_token,
        token_uri: config.token_uri.clone(),
        client_id: config.client_id.clone(),
        client_secret: None,
        scopes,
        expiry: payload
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_values_are_long_random_and_hyphen_free() {
        let first = generate_state();
        let second = generate_state();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!first.contains('-'));
        assert_ne!(first, second);
    }

    #[test]
    fn query_parsing_decodes_pairs() {
        let pairs = parse_query("/oauth/callback?code=4%2FabcDEF&state=xyz");
        assert_eq!(
            pairs,
            vec![
                ("code".to_string(), "4/abcDEF".to_string()),
                ("state".to_string(), "xyz".to_string()),
            ]
        );
        assert!(parse_query(CALLBACK_PATH).is_empty());
    }
}
