//! SQLite-backed audit storage.
//!
//! The connection is opened and the schema ensured lazily on first use.
//! Schema creation is idempotent (`CREATE TABLE IF NOT EXISTS`), so
//! concurrent first callers converge on the same ready state.

use super::{AuthContext, AuthEventKind, PiiField};
use anyhow::{Context as _, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// A recorded audit entry, as read back from the store.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub id: String,
    pub kind: String,
    pub org_id: Option<String>,
    pub user_name: Option<String>,
    pub detail: String,
    pub created_at: String,
}

/// Relational store for audit/analytics records.
///
/// Holds tables for practice snapshots, the per-org pattern cache, generic
/// events, and the audit log. Only the audit log is written by this crate;
/// the other tables are ensured here because schema setup is this layer's
/// job and must happen exactly once before any writer touches the file.
pub struct AuditStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl AuditStore {
    /// Create a handle. No I/O happens until the first write or read.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Mutex::new(None),
        }
    }

    /// Record an authentication event.
    pub fn record_auth_event(
        &self,
        ctx: &AuthContext,
        kind: AuthEventKind,
        detail: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO audit_log (id, kind, org_id, user_name, detail, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    kind.as_str(),
                    ctx.org_id,
                    ctx.user_name,
                    detail,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert audit event")?;
            Ok(())
        })
    }

    /// Record a PII reveal. Stores the field name and the subject's
    /// human-readable label, never the revealed value.
    pub fn record_pii_access(
        &self,
        ctx: &AuthContext,
        field: PiiField,
        subject_label: &str,
    ) -> Result<()> {
        let detail = format!("Revealed {} for {}", field.as_str(), subject_label);
        self.record_auth_event(ctx, AuthEventKind::PiiReveal, &detail)
    }

    /// Most recent audit entries, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, kind, org_id, user_name, detail, created_at
                    FROM audit_log
                    ORDER BY created_at DESC
                    LIMIT ?1
                    "#,
                )
                .context("Failed to prepare query")?;

            let events = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(AuditEvent {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        org_id: row.get(2)?,
                        user_name: row.get(3)?,
                        detail: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .context("Failed to execute query")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read rows")?;

            Ok(events)
        })
    }

    /// Run `f` against the connection, opening the database and ensuring
    /// the schema first if this is the initial use.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap();

        if guard.is_none() {
            let conn = Connection::open(&self.path).context("Failed to open audit database")?;
            ensure_schema(&conn)?;
            *guard = Some(conn);
        }

        f(guard.as_ref().expect("connection initialized above"))
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY,
            org_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            taken_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS pattern_cache (
            org_id TEXT PRIMARY KEY,
            patterns TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            org_id TEXT,
            user_name TEXT,
            detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log(created_at);
        "#,
    )
    .context("Failed to ensure audit schema")?;

    Ok(())
}
