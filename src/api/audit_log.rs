//! PII-access audit endpoint.
//!
//! The UI calls this when a masked sensitive field is revealed on screen.
//! Input is validated fully before any audit write happens; the write
//! itself is fire-and-forget.

use super::{cookie_value, ApiError, AppState};
use crate::audit::{validate_client_label, AuthContext, PiiField};
use crate::session::SESSION_COOKIE_NAME;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tracing::debug;

/// POST /api/audit/pii-access
///
/// Body: `{"field": "ssn" | "idNumber" | "bankAcct", "clientLabel": …}`.
/// Rejects unknown fields and overlong labels with a validation error.
pub async fn record_pii_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let field = body
        .get("field")
        .cloned()
        .ok_or_else(|| ApiError::Validation("Missing 'field'".to_string()))?;
    let field: PiiField = serde_json::from_value(field).map_err(|_| {
        ApiError::Validation("'field' must be one of: ssn, idNumber, bankAcct".to_string())
    })?;

    let client_label = body
        .get("clientLabel")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::Validation("Missing 'clientLabel'".to_string()))?;
    validate_client_label(client_label).map_err(ApiError::Validation)?;

    let ctx = cookie_value(&headers, SESSION_COOKIE_NAME)
        .and_then(|blob| state.codec.decode(&blob))
        .map(|conn| AuthContext::from_connection(&conn));

    debug!(field = field.as_str(), "Recording PII reveal");
    state
        .audit
        .record_pii_access(ctx.as_ref(), field, client_label);

    Ok(StatusCode::NO_CONTENT)
}
