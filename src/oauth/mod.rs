//! Salesforce OAuth 2.0 connection manager.
//!
//! Owns the authorization-code lifecycle:
//! 1. `build_authorization_url` sends the user to Salesforce
//! 2. Salesforce redirects back with a code
//! 3. `exchange_code` turns the code into a [`Connection`]
//! 4. `get_access_token` hands out the token, refreshing lazily when the
//!    stored one is expired or about to expire
//! 5. `revoke` invalidates the refresh token upstream (best-effort)
//!
//! States: Disconnected → AuthPending → Connected → (Refreshing) →
//! Connected | Disconnected. The connection itself lives in the encrypted
//! session cookie; the manager is stateless between calls.

use crate::config::AppConfig;
use crate::session::Connection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Timeout for outbound Salesforce calls (fail fast, never hang a request)
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Refresh when the access token is within this margin of expiry
const REFRESH_MARGIN_SECS: i64 = 60;

/// Conservative fallback TTL when the provider reports zero or no
/// expires_in. Never treat a missing TTL as "never expires".
const DEFAULT_TOKEN_TTL_SECS: i64 = 1800;

/// OAuth scopes requested from the connected app
const OAUTH_SCOPES: &str = "api refresh_token";

/// Connection manager errors
#[derive(Debug)]
pub enum ConnectionError {
    /// Caller passed an empty or malformed Salesforce domain
    InvalidDomain(String),
    /// No connection present for an operation that requires one
    NotConnected,
    /// Refresh failed (revoked/expired refresh token); the session must be
    /// cleared and the user sent back through the OAuth flow
    ReauthRequired(String),
    /// Code exchange rejected by Salesforce or returned a malformed payload
    TokenExchange(String),
    /// Transport-level failure talking to Salesforce
    Upstream(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::InvalidDomain(msg) => write!(f, "Invalid domain: {}", msg),
            ConnectionError::NotConnected => write!(f, "No Salesforce connection"),
            ConnectionError::ReauthRequired(msg) => {
                write!(f, "Re-authentication required: {}", msg)
            }
            ConnectionError::TokenExchange(msg) => write!(f, "Token exchange failed: {}", msg),
            ConnectionError::Upstream(msg) => write!(f, "Salesforce request failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// OAuth token endpoint response (Salesforce flavor of RFC 6749)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    instance_url: Option<String>,
    /// Identity URL: https://login.salesforce.com/id/{orgId}/{userId}
    #[serde(default)]
    id: Option<String>,
    /// Seconds-to-live; Salesforce omits this on some grants
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Result of [`ConnectionManager::get_access_token`]
pub struct AccessToken {
    /// Token to use against the Salesforce API
    pub token: String,
    /// Present when a refresh happened; the caller must re-persist this
    /// connection (re-encode the session cookie)
    pub refreshed: Option<Connection>,
}

/// Connection health, safe to render to any caller. Never refreshes as a
/// side effect and never errors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    /// "oauth" for a live session, "env" for dev-mode static credentials,
    /// "none" otherwise
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

/// Manages the OAuth lifecycle against Salesforce.
#[derive(Clone)]
pub struct ConnectionManager {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scheme: String,
}

impl ConnectionManager {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            client_id: config.sf_client_id.clone(),
            client_secret: config.sf_client_secret.clone(),
            redirect_uri: config.redirect_uri(),
            scheme: config.sf_scheme.clone(),
        })
    }

    /// Build the authorization URL for a Salesforce domain.
    ///
    /// Transition: Disconnected → AuthPending (the caller stores the domain
    /// in the transit cookie for the callback leg).
    pub fn build_authorization_url(&self, domain: &str) -> Result<String, ConnectionError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(ConnectionError::InvalidDomain(
                "Salesforce domain must not be empty".to_string(),
            ));
        }

        Ok(format!(
            "{}://{}/services/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.scheme,
            domain,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
        ))
    }

    /// Exchange an authorization code for tokens and build a connection.
    ///
    /// Transition: AuthPending → Connected.
    pub async fn exchange_code(
        &self,
        code: &str,
        domain: &str,
    ) -> Result<Connection, ConnectionError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(ConnectionError::InvalidDomain(
                "Salesforce domain must not be empty".to_string(),
            ));
        }

        let token_url = format!("{}://{}/services/oauth2/token", self.scheme, domain);

        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.redirect_uri.as_str());
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());

        debug!(domain = %domain, "Exchanging authorization code for tokens");

        let response = self
            .http
            .post(&token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ConnectionError::Upstream(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ConnectionError::TokenExchange(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            ConnectionError::TokenExchange(format!("Malformed token response: {}", e))
        })?;

        let identity_url = token_response.id.clone();
        let mut connection = connection_from_token_response(token_response, Utc::now())?;

        // Best-effort identity lookup for the display name; an anonymous
        // connection is still a valid connection
        if let Some(url) = &identity_url {
            connection.user_name = self
                .fetch_user_name(url, &connection.access_token)
                .await
                .unwrap_or_default();
        }

        debug!(
            org_id = %connection.org_id,
            instance_url = %connection.instance_url,
            "Code exchange complete"
        );

        Ok(connection)
    }

    /// Return a usable access token, refreshing first when the stored one
    /// is expired or within the safety margin of expiry.
    ///
    /// Transition: Connected → Refreshing → Connected, or → Disconnected
    /// when the refresh token itself is dead (`ReauthRequired`; the caller
    /// clears the session).
    pub async fn get_access_token(
        &self,
        connection: &Connection,
    ) -> Result<AccessToken, ConnectionError> {
        if !is_expired(connection, Utc::now()) {
            return Ok(AccessToken {
                token: connection.access_token.clone(),
                refreshed: None,
            });
        }

        debug!(org_id = %connection.org_id, "Access token expired, refreshing");
        let refreshed = self.refresh(connection).await?;

        Ok(AccessToken {
            token: refreshed.access_token.clone(),
            refreshed: Some(refreshed),
        })
    }

    /// Status snapshot for health displays. Read-only.
    pub fn connection_status(&self, connection: Option<&Connection>) -> ConnectionStatus {
        match connection {
            Some(conn) => ConnectionStatus {
                connected: true,
                source: "oauth".to_string(),
                instance_url: Some(conn.instance_url.clone()),
                org_id: Some(conn.org_id.clone()),
            },
            None => ConnectionStatus {
                connected: false,
                source: "none".to_string(),
                instance_url: None,
                org_id: None,
            },
        }
    }

    /// Revoke the refresh token at Salesforce. Best-effort: a failed
    /// revocation is logged and swallowed so local logout always proceeds.
    pub async fn revoke(&self, connection: &Connection) {
        let revoke_url = format!("{}/services/oauth2/revoke", connection.instance_url);

        let mut form = HashMap::new();
        form.insert("token", connection.refresh_token.as_str());

        match self.http.post(&revoke_url).form(&form).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(org_id = %connection.org_id, "Refresh token revoked");
            }
            Ok(response) => {
                warn!(
                    org_id = %connection.org_id,
                    status = %response.status(),
                    "Token revocation rejected by Salesforce"
                );
            }
            Err(e) => {
                warn!(org_id = %connection.org_id, error = %e, "Token revocation failed");
            }
        }
    }

    async fn refresh(&self, connection: &Connection) -> Result<Connection, ConnectionError> {
        let token_url = format!("{}/services/oauth2/token", connection.instance_url);

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", connection.refresh_token.as_str());
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());

        let response = self
            .http
            .post(&token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ConnectionError::Upstream(format!("Refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                org_id = %connection.org_id,
                status = %status,
                "Refresh rejected; connection must be re-established"
            );
            return Err(ConnectionError::ReauthRequired(format!(
                "Refresh rejected with status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            ConnectionError::ReauthRequired(format!("Malformed refresh response: {}", e))
        })?;

        Ok(refreshed_connection(connection, token_response, Utc::now()))
    }

    /// Look up the display name at the identity URL the token endpoint
    /// returned. Failures yield `None`.
    async fn fetch_user_name(&self, identity_url: &str, access_token: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct Identity {
            display_name: Option<String>,
            username: Option<String>,
        }

        let response = self
            .http
            .get(identity_url)
            .bearer_auth(access_token)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let identity: Identity = response.json().await.ok()?;
        identity.display_name.or(identity.username)
    }
}

/// An access token at or past its expiry (minus the safety margin) is
/// expired. `expires_at == now` counts as expired.
pub fn is_expired(connection: &Connection, now: DateTime<Utc>) -> bool {
    connection.expires_at <= now + Duration::seconds(REFRESH_MARGIN_SECS)
}

/// Build a connection from a code-exchange response.
fn connection_from_token_response(
    response: TokenResponse,
    now: DateTime<Utc>,
) -> Result<Connection, ConnectionError> {
    let refresh_token = response.refresh_token.ok_or_else(|| {
        ConnectionError::TokenExchange("Token response missing refresh_token".to_string())
    })?;
    let instance_url = response.instance_url.ok_or_else(|| {
        ConnectionError::TokenExchange("Token response missing instance_url".to_string())
    })?;

    Ok(Connection {
        access_token: response.access_token,
        refresh_token,
        org_id: org_id_from_identity_url(response.id.as_deref()).unwrap_or_default(),
        instance_url,
        user_name: String::new(),
        issued_at: now,
        expires_at: expiry_from_ttl(now, response.expires_in),
    })
}

/// Fold a refresh response into an existing connection. Salesforce only
/// rotates the refresh token sometimes; keep the old one when it is absent.
fn refreshed_connection(
    old: &Connection,
    response: TokenResponse,
    now: DateTime<Utc>,
) -> Connection {
    Connection {
        access_token: response.access_token,
        refresh_token: response.refresh_token.unwrap_or_else(|| old.refresh_token.clone()),
        instance_url: response.instance_url.unwrap_or_else(|| old.instance_url.clone()),
        org_id: old.org_id.clone(),
        user_name: old.user_name.clone(),
        issued_at: now,
        expires_at: expiry_from_ttl(now, response.expires_in),
    }
}

/// Provider-reported TTL, with zero/missing mapped to the conservative
/// default.
fn effective_ttl(expires_in: Option<i64>) -> i64 {
    match expires_in {
        Some(secs) if secs > 0 => secs,
        _ => DEFAULT_TOKEN_TTL_SECS,
    }
}

/// Expiry instant for a provider-reported TTL. The token endpoint host
/// comes from the caller, so a TTL large enough to overflow the timestamp
/// arithmetic falls back to the default instead of panicking.
fn expiry_from_ttl(now: DateTime<Utc>, expires_in: Option<i64>) -> DateTime<Utc> {
    Duration::try_seconds(effective_ttl(expires_in))
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_TTL_SECS))
}

/// Extract the org id from a Salesforce identity URL
/// (…/id/{orgId}/{userId}).
fn org_id_from_identity_url(id: Option<&str>) -> Option<String> {
    let id = id?;
    let mut segments = id.rsplit('/');
    let _user_id = segments.next()?;
    let org_id = segments.next()?;
    if org_id.is_empty() {
        return None;
    }
    Some(org_id.to_string())
}
