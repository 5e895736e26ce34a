//! Request guard: per-request edge policy applied before any handler runs.
//!
//! Check order: origin → CSRF → session presence. Any failure
//! short-circuits with a structured JSON error and the handler never
//! executes. Security headers are attached to every response, pass or
//! fail.

use super::{cookie_value, ApiError, AppState};
use crate::csrf;
use crate::session::SESSION_COOKIE_NAME;
use axum::{
    extract::{Request, State},
    http::{header::ORIGIN, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Paths a cross-origin browser navigation legitimately lands on
/// (Salesforce redirects the user agent here)
const ORIGIN_EXEMPT_PATHS: &[&str] = &["/api/salesforce/callback"];

/// Paths exempt from the CSRF double-submit check
const CSRF_EXEMPT_PATHS: &[&str] = &[
    "/api/salesforce/callback",
    "/api/salesforce/status",
    "/api/csrf-token",
];

/// Route prefixes that require an authenticated Salesforce session
const SESSION_REQUIRED_PREFIXES: &[&str] = &["/api/crm/", "/api/audit/"];

pub async fn guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let headers = req.headers().clone();

    let mut response = match check_request(&state, &path, &method, &headers) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    };

    apply_security_headers(response.headers_mut());
    response
}

fn check_request(
    state: &AppState,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    // 1. Origin: when the browser sends one, it must be our own
    if let Some(origin) = headers.get(ORIGIN) {
        let origin = origin.to_str().unwrap_or("");
        if origin != state.config.app_origin && !origin_exempt(path) {
            warn!(path = %path, origin = %origin, "Rejected cross-origin request");
            return Err(ApiError::ForbiddenOrigin);
        }
    }

    // 2. CSRF: mutating methods only, minus the exempt paths
    if is_mutating(method) && !csrf_exempt(path) {
        let cookie = cookie_value(headers, csrf::CSRF_COOKIE_NAME);
        let header = headers
            .get(csrf::CSRF_HEADER_NAME)
            .and_then(|v| v.to_str().ok());
        if !csrf::validate(cookie.as_deref(), header) {
            warn!(path = %path, "Rejected request with missing or mismatched CSRF token");
            return Err(ApiError::Csrf);
        }
    }

    // 3. Session presence for protected routes. Dev-mode static
    //    credentials stand in only behind the explicit flag.
    if requires_session(path) {
        let has_session = cookie_value(headers, SESSION_COOKIE_NAME)
            .and_then(|blob| state.codec.decode(&blob))
            .is_some();
        if !has_session && !state.config.has_dev_credentials() {
            return Err(ApiError::NotConnected);
        }
    }

    Ok(())
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn origin_exempt(path: &str) -> bool {
    ORIGIN_EXEMPT_PATHS.contains(&path)
}

fn csrf_exempt(path: &str) -> bool {
    CSRF_EXEMPT_PATHS.contains(&path)
}

fn requires_session(path: &str) -> bool {
    SESSION_REQUIRED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
}
