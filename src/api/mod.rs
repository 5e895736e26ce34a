//! HTTP API: OAuth endpoints, CSRF issuance, PII audit, request guard.

pub mod audit_log;
pub mod auth;
pub mod guard;
pub mod security;

use crate::audit::AuditRecorder;
use crate::config::AppConfig;
use crate::oauth::{ConnectionError, ConnectionManager};
use crate::session::SessionCodec;
use axum::{
    http::{
        header::{CONTENT_TYPE, COOKIE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub manager: Arc<ConnectionManager>,
    pub codec: SessionCodec,
    pub audit: AuditRecorder,
}

/// Structured error body: `{"error": ..., "errorCode": ...}`
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(rename = "errorCode")]
    error_code: &'static str,
}

/// API error taxonomy. Upstream variants carry full detail for server
/// logs; the client only ever sees a generic message.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    ForbiddenOrigin,
    Csrf,
    NotConnected,
    ReauthRequired,
    TokenExchange(String),
    Upstream(String),
}

impl From<ConnectionError> for ApiError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::InvalidDomain(msg) => ApiError::Validation(msg),
            ConnectionError::NotConnected => ApiError::NotConnected,
            ConnectionError::ReauthRequired(_) => ApiError::ReauthRequired,
            ConnectionError::TokenExchange(msg) => ApiError::TokenExchange(msg),
            ConnectionError::Upstream(msg) => ApiError::Upstream(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            ApiError::ForbiddenOrigin => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN_ORIGIN",
                "Request origin not allowed".to_string(),
            ),
            ApiError::Csrf => (
                StatusCode::FORBIDDEN,
                "CSRF_ERROR",
                "CSRF token missing or invalid".to_string(),
            ),
            ApiError::NotConnected => (
                StatusCode::UNAUTHORIZED,
                "NOT_CONNECTED",
                "No Salesforce connection".to_string(),
            ),
            ApiError::ReauthRequired => (
                StatusCode::UNAUTHORIZED,
                "REAUTH_REQUIRED",
                "Salesforce connection expired, please reconnect".to_string(),
            ),
            ApiError::TokenExchange(detail) => {
                error!(detail = %detail, "Token exchange failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TOKEN_EXCHANGE_FAILED",
                    "Failed to complete Salesforce authorization".to_string(),
                )
            }
            ApiError::Upstream(detail) => {
                error!(detail = %detail, "Salesforce request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "UPSTREAM_ERROR",
                    "Salesforce request failed".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code,
        });

        (status, body).into_response()
    }
}

/// Pull one cookie value out of the Cookie header.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some((key, value)) = pair.split_once('=') {
            if key == name {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// CORS restricted to the configured application origin. Cookies ride on
/// these requests, so no wildcard.
fn build_cors_layer(app_origin: &str) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-csrf-token")])
        .allow_credentials(true);

    match app_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(e) => warn!(origin = %app_origin, error = %e, "Unparseable app origin, CORS disabled"),
    }

    cors
}

/// Assemble the full application router with the guard applied.
pub fn create_app_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.app_origin);
    Router::new()
        .route("/api/salesforce/auth-url", get(auth::auth_url))
        .route("/api/salesforce/callback", get(auth::callback))
        .route("/api/salesforce/status", get(auth::status))
        .route("/api/salesforce/logout", post(auth::logout))
        .route("/api/salesforce/disconnect", post(auth::disconnect))
        .route("/api/crm/verify", get(auth::verify))
        .route("/api/csrf-token", get(security::issue_csrf_token))
        .route("/api/audit/pii-access", post(audit_log::record_pii_access))
        .route("/api/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), guard::guard))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
