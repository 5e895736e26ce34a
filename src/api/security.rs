//! CSRF token issuance endpoint.

use super::AppState;
use crate::csrf;
use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

#[derive(Serialize)]
pub struct CsrfTokenResponse {
    token: String,
}

/// GET /api/csrf-token
///
/// Mints a fresh token, sets it as the CSRF cookie, and mirrors the same
/// value in the body for the client to replay in the `x-csrf-token`
/// header. Calling again rotates the pair.
pub async fn issue_csrf_token(State(state): State<AppState>) -> Response {
    let token = csrf::issue_token();

    let mut headers = HeaderMap::new();
    if let Ok(value) =
        HeaderValue::from_str(&csrf::build_cookie(&token, state.config.production))
    {
        headers.insert(SET_COOKIE, value);
    }

    (headers, Json(CsrfTokenResponse { token })).into_response()
}
