use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use wealthdesk::api::{create_app_router, AppState};
use wealthdesk::audit::{AuditRecorder, AuditStore};
use wealthdesk::config::AppConfig;
use wealthdesk::oauth::ConnectionManager;
use wealthdesk::session::SessionCodec;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wealthdesk=info".into()),
        )
        .init();

    let config = Arc::new(AppConfig::from_env());

    let codec = SessionCodec::new(&config.session_key)?;
    let manager = Arc::new(ConnectionManager::new(&config)?);
    let audit = AuditRecorder::new(Arc::new(AuditStore::new(&config.audit_db_path)));

    let state = AppState {
        config: Arc::clone(&config),
        manager,
        codec,
        audit,
    };

    let app = create_app_router(state);

    let addr = std::env::var("WEALTHDESK_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "WealthDesk listening");

    axum::serve(listener, app).await?;

    Ok(())
}
