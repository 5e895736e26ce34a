//! Audit trail for authentication and sensitive-data-access events.
//!
//! Writes are best-effort and fire-and-forget: the [`AuditRecorder`]
//! detaches each write onto a blocking task and swallows failures, so an
//! unavailable audit store can never fail a user-facing request.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

mod store;

pub use store::{AuditEvent, AuditStore};

/// Maximum accepted length for a PII subject label
pub const MAX_CLIENT_LABEL_LEN: usize = 200;

/// What happened, from the auth/security perspective.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    Login,
    Logout,
    LogoutRevoked,
    AuthFailed,
    PiiReveal,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::Login => "login",
            AuthEventKind::Logout => "logout",
            AuthEventKind::LogoutRevoked => "logout_revoked",
            AuthEventKind::AuthFailed => "auth_failed",
            AuthEventKind::PiiReveal => "pii_reveal",
        }
    }
}

/// Masked sensitive fields a user may reveal. Fixed allowlist; anything
/// else is rejected at the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PiiField {
    #[serde(rename = "ssn")]
    Ssn,
    #[serde(rename = "idNumber")]
    IdNumber,
    #[serde(rename = "bankAcct")]
    BankAcct,
}

impl PiiField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiField::Ssn => "ssn",
            PiiField::IdNumber => "idNumber",
            PiiField::BankAcct => "bankAcct",
        }
    }
}

/// Org/user identity attached to audit events, when known.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub org_id: Option<String>,
    pub user_name: Option<String>,
}

impl AuthContext {
    pub fn from_connection(connection: &crate::session::Connection) -> Self {
        Self {
            org_id: Some(connection.org_id.clone()),
            user_name: Some(connection.user_name.clone()),
        }
    }
}

/// Reject overlong subject labels before anything touches the store.
pub fn validate_client_label(label: &str) -> Result<(), String> {
    if label.is_empty() {
        return Err("clientLabel must not be empty".to_string());
    }
    if label.chars().count() > MAX_CLIENT_LABEL_LEN {
        return Err(format!(
            "clientLabel must be at most {} characters",
            MAX_CLIENT_LABEL_LEN
        ));
    }
    Ok(())
}

/// Fire-and-forget front end over the [`AuditStore`].
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<AuditStore>) -> Self {
        Self { store }
    }

    /// Record an authentication event. Detached; never blocks the caller
    /// and never surfaces a failure.
    pub fn record_auth_event(
        &self,
        ctx: Option<&AuthContext>,
        kind: AuthEventKind,
        detail: impl Into<String>,
    ) {
        let store = Arc::clone(&self.store);
        let ctx = ctx.cloned().unwrap_or_default();
        let detail = detail.into();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.record_auth_event(&ctx, kind, &detail) {
                warn!(kind = kind.as_str(), error = %e, "Audit write failed");
            }
        });
    }

    /// Record that a masked PII field was revealed. The revealed value is
    /// never written, only which field and whose record.
    pub fn record_pii_access(
        &self,
        ctx: Option<&AuthContext>,
        field: PiiField,
        subject_label: impl Into<String>,
    ) {
        let store = Arc::clone(&self.store);
        let ctx = ctx.cloned().unwrap_or_default();
        let subject_label = subject_label.into();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.record_pii_access(&ctx, field, &subject_label) {
                warn!(field = field.as_str(), error = %e, "PII audit write failed");
            }
        });
    }
}
