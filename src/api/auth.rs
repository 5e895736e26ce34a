//! Salesforce connection endpoints: initiate, callback, status, logout,
//! disconnect, and the token verification route used by API callers.

use super::{cookie_value, ApiError, AppState};
use crate::audit::{AuthContext, AuthEventKind};
use crate::oauth::{ConnectionError, ConnectionStatus};
use crate::session::{
    build_session_cookie, clear_session_cookie, Connection, SESSION_COOKIE_NAME,
};
use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Cookie binding "auth initiated" to "callback received". Carries the
/// target Salesforce domain; expires after 10 minutes.
pub const TRANSIT_COOKIE_NAME: &str = "wd_oauth_domain";

/// Transit cookie lifetime (10 minutes)
pub const TRANSIT_COOKIE_MAX_AGE_SECS: i64 = 600;

#[derive(Deserialize)]
pub struct AuthUrlQuery {
    domain: Option<String>,
}

#[derive(Serialize)]
pub struct AuthUrlResponse {
    #[serde(rename = "authUrl")]
    auth_url: String,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    ok: bool,
    source: String,
}

fn build_transit_cookie(domain: &str, production: bool) -> String {
    let secure = if production { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax{}",
        TRANSIT_COOKIE_NAME, domain, TRANSIT_COOKIE_MAX_AGE_SECS, secure
    )
}

fn clear_transit_cookie(production: bool) -> String {
    let secure = if production { "; Secure" } else { "" };
    format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax{}",
        TRANSIT_COOKIE_NAME, secure
    )
}

fn error_redirect(reason: &str) -> Redirect {
    Redirect::to(&format!("/?sf_error={}", urlencoding::encode(reason)))
}

/// Current connection, decoded from the session cookie if present.
fn current_connection(state: &AppState, headers: &HeaderMap) -> Option<Connection> {
    cookie_value(headers, SESSION_COOKIE_NAME).and_then(|blob| state.codec.decode(&blob))
}

/// GET /api/salesforce/auth-url?domain=acme.my.salesforce.com
///
/// Returns the authorization URL for the given Salesforce domain and sets
/// the transit cookie the callback leg will read.
/// Transition: Disconnected → AuthPending.
pub async fn auth_url(
    State(state): State<AppState>,
    Query(query): Query<AuthUrlQuery>,
) -> Result<Response, ApiError> {
    let domain = query
        .domain
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::Validation("Missing 'domain' parameter".to_string()))?;

    let auth_url = state.manager.build_authorization_url(domain)?;

    debug!(domain = %domain, "Issued authorization URL");

    let mut headers = HeaderMap::new();
    if let Ok(value) =
        HeaderValue::from_str(&build_transit_cookie(domain, state.config.production))
    {
        headers.insert(SET_COOKIE, value);
    }

    Ok((headers, Json(AuthUrlResponse { auth_url })).into_response())
}

/// GET /api/salesforce/callback
///
/// The browser lands here after the user authenticates at Salesforce.
/// Every outcome is a redirect back to the application root; failures
/// carry a short URL-encoded reason, never a stack trace.
/// Transition: AuthPending → Connected.
pub async fn callback(
    State(state): State<AppState>,
    Query(callback): Query<OAuthCallback>,
    headers: HeaderMap,
) -> Response {
    let production = state.config.production;

    // User denied, or Salesforce reported an error: no exchange attempted
    if let Some(error) = callback.error {
        let description = callback.error_description.unwrap_or_else(|| error.clone());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        state.audit.record_auth_event(
            None,
            AuthEventKind::AuthFailed,
            format!("OAuth error: {}", description),
        );
        return with_cookie(error_redirect(&description), &clear_transit_cookie(production));
    }

    let Some(code) = callback.code else {
        warn!("OAuth callback missing authorization code");
        return with_cookie(
            error_redirect("Missing authorization code"),
            &clear_transit_cookie(production),
        );
    };

    // Callback without transit state is an expired initiation, never a
    // default domain
    let Some(domain) = cookie_value(&headers, TRANSIT_COOKIE_NAME) else {
        warn!("OAuth callback without transit cookie");
        state.audit.record_auth_event(
            None,
            AuthEventKind::AuthFailed,
            "Callback received without transit state",
        );
        return with_cookie(
            error_redirect("Session expired, please try connecting again"),
            &clear_transit_cookie(production),
        );
    };

    match state.manager.exchange_code(&code, &domain).await {
        Ok(connection) => {
            let Ok(blob) = state.codec.encode(&connection) else {
                return with_cookie(
                    error_redirect("Connection failed"),
                    &clear_transit_cookie(production),
                );
            };

            info!(
                org_id = %connection.org_id,
                instance_url = %connection.instance_url,
                "Salesforce connection established"
            );
            state.audit.record_auth_event(
                Some(&AuthContext::from_connection(&connection)),
                AuthEventKind::Login,
                format!("Connected to {}", connection.instance_url),
            );

            let target = format!(
                "/?sf_connected=true&sf_org={}",
                urlencoding::encode(&connection.instance_url)
            );

            let mut response = Redirect::to(&target).into_response();
            append_cookie(&mut response, &build_session_cookie(blob.as_str(), production));
            append_cookie(&mut response, &clear_transit_cookie(production));
            response
        }
        Err(e) => {
            warn!(error = %e, "Authorization code exchange failed");
            state.audit.record_auth_event(
                None,
                AuthEventKind::AuthFailed,
                format!("Code exchange failed: {}", e),
            );
            with_cookie(
                error_redirect("Connection failed"),
                &clear_transit_cookie(production),
            )
        }
    }
}

/// GET /api/salesforce/status
///
/// Connection health for the UI. Read-only; never refreshes, never errors.
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Json<ConnectionStatus> {
    let connection = current_connection(&state, &headers);

    if connection.is_none() && state.config.has_dev_credentials() {
        return Json(ConnectionStatus {
            connected: true,
            source: "env".to_string(),
            instance_url: state.config.dev_instance_url.clone(),
            org_id: None,
        });
    }

    Json(state.manager.connection_status(connection.as_ref()))
}

/// POST /api/salesforce/logout
///
/// Soft logout: deletes the local session without contacting Salesforce
/// (idle timeout path). A no-op success when already disconnected.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(connection) = current_connection(&state, &headers) {
        state.audit.record_auth_event(
            Some(&AuthContext::from_connection(&connection)),
            AuthEventKind::Logout,
            "Session cleared (soft logout)",
        );
    }

    let mut response = Json(SuccessResponse { success: true }).into_response();
    append_cookie(&mut response, &clear_session_cookie(state.config.production));
    response
}

/// POST /api/salesforce/disconnect
///
/// Explicit disconnect: revokes the refresh token at Salesforce
/// (best-effort), then clears the local session either way.
pub async fn disconnect(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(connection) = current_connection(&state, &headers) {
        state.manager.revoke(&connection).await;
        state.audit.record_auth_event(
            Some(&AuthContext::from_connection(&connection)),
            AuthEventKind::LogoutRevoked,
            "Session cleared and refresh token revoked",
        );
    }

    let mut response = Json(SuccessResponse { success: true }).into_response();
    append_cookie(&mut response, &clear_session_cookie(state.config.production));
    response
}

/// GET /api/crm/verify
///
/// Confirms the connection can produce a usable access token, refreshing
/// transparently when it is expired. A successful refresh re-persists the
/// session cookie; a failed refresh clears it and reports that the user
/// must reconnect.
pub async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(connection) = current_connection(&state, &headers) else {
        // Behind the guard this only happens in dev mode
        if state.config.has_dev_credentials() {
            return Json(VerifyResponse {
                ok: true,
                source: "env".to_string(),
            })
            .into_response();
        }
        return ApiError::NotConnected.into_response();
    };

    match state.manager.get_access_token(&connection).await {
        Ok(access) => {
            let mut response = Json(VerifyResponse {
                ok: true,
                source: "oauth".to_string(),
            })
            .into_response();

            if let Some(refreshed) = access.refreshed {
                match state.codec.encode(&refreshed) {
                    Ok(blob) => append_cookie(
                        &mut response,
                        &build_session_cookie(&blob, state.config.production),
                    ),
                    Err(e) => {
                        warn!(error = %e, "Failed to re-encode refreshed session");
                    }
                }
            }
            response
        }
        Err(ConnectionError::ReauthRequired(detail)) => {
            warn!(org_id = %connection.org_id, detail = %detail, "Refresh failed, clearing session");
            state.audit.record_auth_event(
                Some(&AuthContext::from_connection(&connection)),
                AuthEventKind::AuthFailed,
                "Token refresh rejected; re-authentication required",
            );
            let mut response = ApiError::ReauthRequired.into_response();
            append_cookie(&mut response, &clear_session_cookie(state.config.production));
            response
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn with_cookie(redirect: Redirect, cookie: &str) -> Response {
    let mut response = redirect.into_response();
    append_cookie(&mut response, cookie);
    response
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}
