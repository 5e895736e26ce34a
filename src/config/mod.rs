use serde::{Deserialize, Serialize};

/// Application configuration, built from environment variables at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Salesforce connected-app client id
    pub sf_client_id: String,
    /// Salesforce connected-app client secret
    pub sf_client_secret: String,
    /// URL scheme for Salesforce endpoints. Always "https" outside of
    /// tests that point the manager at a local stub server.
    pub sf_scheme: String,
    /// Base URL this server is reachable at (used for the OAuth redirect URI
    /// and as the expected Origin on guarded requests)
    pub app_origin: String,
    /// Base64-encoded 32-byte master key for the session codec
    pub session_key: String,
    /// Path to the SQLite audit database
    pub audit_db_path: String,
    /// Production flag: controls the Secure attribute on cookies
    pub production: bool,
    /// Explicit development-mode flag. Only when true may statically
    /// configured credentials stand in for a live session. Never inferred
    /// from credential presence.
    pub dev_mode: bool,
    /// Static access token for local development (ignored unless dev_mode)
    pub dev_access_token: Option<String>,
    /// Instance URL paired with the static token (ignored unless dev_mode)
    pub dev_instance_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sf_client_id: String::new(),
            sf_client_secret: String::new(),
            sf_scheme: "https".to_string(),
            app_origin: "http://localhost:3000".to_string(),
            session_key: String::new(),
            audit_db_path: "wealthdesk.db".to_string(),
            production: false,
            dev_mode: false,
            dev_access_token: None,
            dev_instance_url: None,
        }
    }
}

impl AppConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("WEALTHDESK_SF_CLIENT_ID") {
            cfg.sf_client_id = v;
        }
        if let Ok(v) = std::env::var("WEALTHDESK_SF_CLIENT_SECRET") {
            cfg.sf_client_secret = v;
        }
        if let Ok(v) = std::env::var("WEALTHDESK_APP_ORIGIN") {
            cfg.app_origin = v;
        }
        if let Ok(v) = std::env::var("WEALTHDESK_SESSION_KEY") {
            cfg.session_key = v;
        }
        if let Ok(v) = std::env::var("WEALTHDESK_AUDIT_DB_PATH") {
            cfg.audit_db_path = v;
        }
        if let Ok(v) = std::env::var("WEALTHDESK_ENV") {
            cfg.production = v == "production";
        }
        if let Ok(v) = std::env::var("WEALTHDESK_DEV_MODE") {
            if let Ok(b) = v.parse::<bool>() {
                cfg.dev_mode = b;
            }
        }
        cfg.dev_access_token = std::env::var("WEALTHDESK_DEV_SF_ACCESS_TOKEN").ok();
        cfg.dev_instance_url = std::env::var("WEALTHDESK_DEV_SF_INSTANCE_URL").ok();

        cfg
    }

    /// Redirect URI registered with the Salesforce connected app.
    pub fn redirect_uri(&self) -> String {
        format!("{}/api/salesforce/callback", self.app_origin)
    }

    /// True only when dev mode is explicitly on and both static credentials
    /// are configured. Production requests never take this path.
    pub fn has_dev_credentials(&self) -> bool {
        self.dev_mode
            && !self.production
            && self.dev_access_token.is_some()
            && self.dev_instance_url.is_some()
    }
}
